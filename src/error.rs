// Error handling module
// Defines the core error taxonomy and HTTP response conversion for serve mode

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the credential store, token manager and API wrapper.
///
/// Everything propagates to the command layer unchanged; the command layer
/// turns it into the JSON error envelope and a non-zero exit code. Clone is
/// required so callers attached to one in-flight token fetch can all receive
/// its failure.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// No app_id/app_secret available; raised before any network call
    #[error("credentials not configured; run `wxmp-cli config set` or set WXMP_APP_ID/WXMP_APP_SECRET")]
    MissingCredentials,

    /// Credential store could not be created or opened
    #[error("credential store unavailable: {0}")]
    StoreInit(String),

    /// Credential store exists but a write failed
    #[error("failed to persist state: {0}")]
    Persist(String),

    /// Transport-level failure reaching the platform
    #[error("network error ({kind}): {message}")]
    Network { kind: &'static str, message: String },

    /// Platform reachable but returned an API-level error code
    #[error("weixin error {code}: {message}")]
    RemoteAuth { code: i64, message: String },

    /// Response body parses as neither success nor a platform error
    #[error("unexpected response (status {status}): {detail}")]
    UnexpectedResponse { status: u16, detail: String },

    /// Bad command input (unreadable file, malformed article JSON)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Stable code string used in the JSON error envelope.
    /// Remote errors carry the platform errcode verbatim.
    pub fn envelope_code(&self) -> String {
        match self {
            Error::MissingCredentials => "missing_credentials".to_string(),
            Error::StoreInit(_) => "store_init".to_string(),
            Error::Persist(_) => "persist".to_string(),
            Error::Network { .. } => "network".to_string(),
            Error::RemoteAuth { code, .. } => code.to_string(),
            Error::UnexpectedResponse { .. } => "unexpected_response".to_string(),
            Error::InvalidInput(_) => "invalid_input".to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connection_failed"
        } else if e.is_request() {
            "request_error"
        } else if e.is_body() {
            "body_error"
        } else if e.is_decode() {
            "decode_error"
        } else {
            "unknown"
        };
        Error::Network {
            kind,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::MissingCredentials => StatusCode::UNAUTHORIZED,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::StoreInit(_) | Error::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Network { .. }
            | Error::RemoteAuth { .. }
            | Error::UnexpectedResponse { .. } => StatusCode::BAD_GATEWAY,
        };

        let body = Json(json!({
            "ok": false,
            "error": {
                "code": self.envelope_code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
