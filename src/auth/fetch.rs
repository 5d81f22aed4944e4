// Token fetch
// One-shot request to the platform authorization endpoint; no retries here

use reqwest::Client;
use tracing::{debug, info};

use super::types::{CachedToken, Credentials, TokenReply};
use crate::error::{Error, Result};

/// Authorization endpoint under the platform base URL
pub fn token_url(api_base: &str) -> String {
    format!("{}/cgi-bin/token", api_base.trim_end_matches('/'))
}

/// Fetch a fresh access token for the given credentials.
///
/// GET /cgi-bin/token?grant_type=client_credential&appid=...&secret=...
/// The platform answers HTTP 200 for both grants and errors; the two are
/// told apart by body shape.
pub async fn fetch_access_token(
    client: &Client,
    api_base: &str,
    credentials: &Credentials,
) -> Result<CachedToken> {
    debug!(
        app_id = %credentials.redacted_app_id(),
        "requesting access token"
    );

    let response = client
        .get(token_url(api_base))
        .query(&[
            ("grant_type", "client_credential"),
            ("appid", credentials.app_id.as_str()),
            ("secret", credentials.app_secret.as_str()),
        ])
        .send()
        .await?;

    let status = response.status().as_u16();
    let bytes = response.bytes().await?;

    match serde_json::from_slice::<TokenReply>(&bytes) {
        Ok(TokenReply::Grant(grant)) => {
            let token = CachedToken::from_grant(grant.access_token, grant.expires_in);
            info!(
                expires_at = %token.expires_at.to_rfc3339(),
                "access token acquired"
            );
            Ok(token)
        }
        Ok(TokenReply::Err(err)) => Err(Error::RemoteAuth {
            code: err.errcode,
            message: err.errmsg,
        }),
        Err(de_err) => Err(Error::UnexpectedResponse {
            status,
            detail: format!("{}; body: {}", de_err, redacted_body(&bytes)),
        }),
    }
}

/// Body excerpt safe for error messages: any access_token value is masked
/// and the result is truncated.
fn redacted_body(bytes: &[u8]) -> String {
    let mut body = String::from_utf8_lossy(bytes).to_string();
    if let Ok(mut v) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(obj) = v.as_object_mut() {
            if obj.contains_key("access_token") {
                obj.insert(
                    "access_token".to_string(),
                    serde_json::Value::String("[redacted]".into()),
                );
            }
        }
        if let Ok(s) = serde_json::to_string(&v) {
            body = s;
        }
    }
    if body.len() > 1024 {
        body.truncate(1024);
        body.push_str("...");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_url() {
        assert_eq!(
            token_url("https://api.weixin.qq.com"),
            "https://api.weixin.qq.com/cgi-bin/token"
        );
        // Trailing slash does not double up
        assert_eq!(
            token_url("http://127.0.0.1:8123/"),
            "http://127.0.0.1:8123/cgi-bin/token"
        );
    }

    #[test]
    fn test_redacted_body_masks_token() {
        let body = br#"{"access_token":"SENSITIVE","extra":1}"#;
        let redacted = redacted_body(body);
        assert!(!redacted.contains("SENSITIVE"));
        assert!(redacted.contains("[redacted]"));
    }

    #[test]
    fn test_redacted_body_truncates() {
        let body = vec![b'x'; 4096];
        let redacted = redacted_body(&body);
        assert!(redacted.len() <= 1024 + 3);
        assert!(redacted.ends_with("..."));
    }
}
