// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Environment variable supplying the app id
pub const ENV_APP_ID: &str = "WXMP_APP_ID";
/// Environment variable supplying the app secret
pub const ENV_APP_SECRET: &str = "WXMP_APP_SECRET";

/// Stored application credentials.
///
/// app_id and app_secret are required before any token can be requested;
/// token and encoding_aes_key are user-owned callback settings carried along
/// but unused by the API calls here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub app_id: String,
    pub app_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_aes_key: Option<String>,
}

/// Credentials taken from the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            app_id: std::env::var(ENV_APP_ID).ok().filter(|s| !s.is_empty()),
            app_secret: std::env::var(ENV_APP_SECRET).ok().filter(|s| !s.is_empty()),
        }
    }
}

/// Result of merging stored credentials with environment overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Credentials to use for this invocation, if any are available
    pub effective: Option<Credentials>,
    /// True when the effective credentials differ from what is stored
    /// and should be written back
    pub store_update: bool,
}

impl Credentials {
    /// Merge stored credentials with environment overrides.
    ///
    /// Environment values win field-by-field. The store is only updated when
    /// the merge actually changed something, so repeated invocations with a
    /// static environment do not rewrite the store.
    pub fn merged_with_env(stored: Option<Credentials>, env: &EnvOverrides) -> MergeOutcome {
        match stored {
            Some(stored) => {
                let mut effective = stored.clone();
                if let Some(ref app_id) = env.app_id {
                    effective.app_id = app_id.clone();
                }
                if let Some(ref app_secret) = env.app_secret {
                    effective.app_secret = app_secret.clone();
                }
                let store_update = effective != stored;
                MergeOutcome {
                    effective: Some(effective),
                    store_update,
                }
            }
            None => match (&env.app_id, &env.app_secret) {
                (Some(app_id), Some(app_secret)) => MergeOutcome {
                    effective: Some(Credentials {
                        app_id: app_id.clone(),
                        app_secret: app_secret.clone(),
                        token: None,
                        encoding_aes_key: None,
                    }),
                    store_update: true,
                },
                _ => MergeOutcome {
                    effective: None,
                    store_update: false,
                },
            },
        }
    }

    /// App id with the middle elided, safe for logs
    pub fn redacted_app_id(&self) -> String {
        redact_id(&self.app_id)
    }
}

/// A token together with its absolute expiry.
///
/// Replaced wholesale on refresh, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Build from a grant response, anchoring expiry at the current time
    pub fn from_grant(access_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            expires_at: Utc::now() + Duration::seconds(expires_in as i64),
        }
    }

    /// True while `now < expires_at - margin`
    pub fn is_fresh(&self, margin_secs: i64) -> bool {
        Utc::now() + Duration::seconds(margin_secs) < self.expires_at
    }
}

/// Successful grant from the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: u64,
}

/// Platform-level error payload, returned with HTTP 200
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformError {
    pub errcode: i64,
    pub errmsg: String,
}

/// Raw token endpoint reply (success or platform error)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TokenReply {
    Grant(TokenGrant),
    Err(PlatformError),
}

/// Keep first and last two characters of an identifier for logs
pub fn redact_id(id: &str) -> String {
    if id.len() <= 4 {
        format!("{}***", id)
    } else {
        format!("{}***{}", &id[..2], &id[id.len() - 2..])
    }
}
