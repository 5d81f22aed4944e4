// HTTP request wrapper for the platform API
// Obtains a valid token from the manager and attaches it to every call.
// Single attempt per request: retry policy is not this layer's business.

use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::Form;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::auth::TokenManager;
use crate::error::{Error, Result};

/// Token-injecting wrapper over `reqwest::Client`
pub struct WxClient {
    client: Client,
    auth: Arc<TokenManager>,
    api_base: String,
}

impl WxClient {
    pub fn new(
        auth: Arc<TokenManager>,
        api_base: String,
        connect_timeout_secs: u64,
        request_timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| Error::Network {
                kind: "client_build",
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            auth,
            api_base,
        })
    }

    /// GET with the access token and extra query parameters
    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let token = self.auth.get_access_token().await?;
        let url = self.url(path);
        debug!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .query(&[("access_token", token.access_token.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        parse_platform_json(status, &bytes)
    }

    /// POST a JSON body with the access token
    pub async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        let token = self.auth.get_access_token().await?;
        let url = self.url(path);
        debug!(%url, "POST json");

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", token.access_token.as_str())])
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        parse_platform_json(status, &bytes)
    }

    /// POST a multipart form (media upload) with the access token
    pub async fn post_multipart(
        &self,
        path: &str,
        query: &[(&str, &str)],
        form: Form,
    ) -> Result<Value> {
        let token = self.auth.get_access_token().await?;
        let url = self.url(path);
        debug!(%url, "POST multipart");

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", token.access_token.as_str())])
            .query(query)
            .multipart(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        parse_platform_json(status, &bytes)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}

/// Decode a platform response body.
///
/// The platform answers HTTP 200 almost unconditionally; failures are
/// reported as `{errcode, errmsg}` in the body. errcode 0 accompanies some
/// successful responses and is not an error.
pub fn parse_platform_json(status: u16, bytes: &[u8]) -> Result<Value> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| Error::UnexpectedResponse {
        status,
        detail: format!(
            "{}; body: {}",
            e,
            String::from_utf8_lossy(&bytes[..bytes.len().min(512)])
        ),
    })?;

    if let Some(code) = value.get("errcode").and_then(Value::as_i64) {
        if code != 0 {
            let message = value
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(Error::RemoteAuth { code, message });
        }
    }

    Ok(value)
}
