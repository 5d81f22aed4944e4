// Token lifecycle manager
// Serves cached tokens until near expiry, then re-acquires. Callers that
// arrive while a fetch is in flight attach to the same pending future and
// observe its outcome, so at most one upstream fetch runs at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::fetch;
use super::store::CredentialStore;
use super::types::{CachedToken, Credentials, EnvOverrides};
use crate::error::{Error, Result};

/// Default platform base URL
pub const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com";

/// Seconds before literal expiry at which a token counts as expiring
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 300;

type SharedFetch = Shared<BoxFuture<'static, Result<CachedToken>>>;

/// Construction-time knobs for [`TokenManager`]
#[derive(Debug, Clone)]
pub struct TokenManagerOptions {
    pub api_base: String,
    pub safety_margin_secs: i64,
    pub request_timeout_secs: u64,
    pub env: EnvOverrides,
}

impl Default for TokenManagerOptions {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            safety_margin_secs: DEFAULT_SAFETY_MARGIN_SECS,
            request_timeout_secs: 30,
            env: EnvOverrides::default(),
        }
    }
}

/// Access-token lifecycle manager.
///
/// Owns the in-memory token and is the only writer of it. Tokens are written
/// through to the credential store so a process started moments later reuses
/// a still-valid token instead of refreshing redundantly.
pub struct TokenManager {
    inner: Arc<ManagerInner>,
    /// In-flight fetch that late callers attach to; cleared once settled
    pending: Mutex<Option<(u64, SharedFetch)>>,
    generation: AtomicU64,
}

struct ManagerInner {
    store: Mutex<CredentialStore>,
    credentials: Option<Credentials>,
    cached: RwLock<Option<CachedToken>>,
    /// Serializes actual network fetches
    fetch_lock: Mutex<()>,
    client: Client,
    api_base: String,
    safety_margin_secs: i64,
}

impl TokenManager {
    /// Build a manager over the given store.
    ///
    /// Loads persisted credentials, applies environment overrides (writing
    /// them back only when they changed something), and warms the in-memory
    /// cache from the persisted token record.
    pub fn new(store: CredentialStore, options: TokenManagerOptions) -> Result<Self> {
        let stored = store.load_config()?;
        let merge = Credentials::merged_with_env(stored, &options.env);

        if merge.store_update {
            if let Some(ref credentials) = merge.effective {
                debug!(
                    app_id = %credentials.redacted_app_id(),
                    "environment credentials differ from store; updating"
                );
                store.save_config(credentials)?;
            }
        }

        let cached = match merge.effective {
            Some(ref credentials) => store.load_cached_token(&credentials.app_id)?,
            None => None,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .build()
            .map_err(|e| Error::Network {
                kind: "client_build",
                message: e.to_string(),
            })?;

        Ok(Self {
            inner: Arc::new(ManagerInner {
                store: Mutex::new(store),
                credentials: merge.effective,
                cached: RwLock::new(cached),
                fetch_lock: Mutex::new(()),
                client,
                api_base: options.api_base,
                safety_margin_secs: options.safety_margin_secs,
            }),
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Effective credentials for this process, if configured
    pub fn credentials(&self) -> Option<&Credentials> {
        self.inner.credentials.as_ref()
    }

    /// Return a token valid for at least the safety margin, fetching if the
    /// cache is empty or expiring.
    ///
    /// All callers arriving during a fetch await that same fetch and receive
    /// its token or its failure; no second request is started.
    pub async fn get_access_token(&self) -> Result<CachedToken> {
        if let Some(token) = self.inner.fresh_cached().await {
            return Ok(token);
        }
        if self.inner.credentials.is_none() {
            return Err(Error::MissingCredentials);
        }

        let (generation, fut) = {
            let mut pending = self.pending.lock().await;
            match pending.as_ref() {
                Some((generation, fut)) => {
                    debug!("attaching to in-flight token fetch");
                    (*generation, fut.clone())
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let fut = async move { inner.fetch_once(false).await }.boxed().shared();
                    *pending = Some((generation, fut.clone()));
                    (generation, fut)
                }
            }
        };

        let result = fut.await;

        // Clear the settled future so the next stale period starts fresh
        let mut pending = self.pending.lock().await;
        if matches!(pending.as_ref(), Some((g, _)) if *g == generation) {
            *pending = None;
        }
        result
    }

    /// Drop any cached token and fetch a new one unconditionally
    pub async fn refresh_access_token(&self) -> Result<CachedToken> {
        self.inner.fetch_once(true).await
    }
}

impl ManagerInner {
    async fn fresh_cached(&self) -> Option<CachedToken> {
        let guard = self.cached.read().await;
        guard
            .as_ref()
            .filter(|t| t.is_fresh(self.safety_margin_secs))
            .cloned()
    }

    async fn fetch_once(&self, force: bool) -> Result<CachedToken> {
        let credentials = self.credentials.as_ref().ok_or(Error::MissingCredentials)?;

        let _guard = self.fetch_lock.lock().await;

        if force {
            self.cached.write().await.take();
        } else if let Some(token) = self.fresh_cached().await {
            // A fetch completed while we waited for the lock
            return Ok(token);
        }

        let token = fetch::fetch_access_token(&self.client, &self.api_base, credentials).await?;

        *self.cached.write().await = Some(token.clone());
        self.store
            .lock()
            .await
            .save_cached_token(&credentials.app_id, &token)?;

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn store_with(credentials: Option<&Credentials>) -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(&dir.path().join("data.sqlite3")).unwrap();
        if let Some(c) = credentials {
            store.save_config(c).unwrap();
        }
        (dir, store)
    }

    fn credentials() -> Credentials {
        Credentials {
            app_id: "wx1234567890".to_string(),
            app_secret: "s3cret".to_string(),
            token: None,
            encoding_aes_key: None,
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_fails_before_network() {
        let (_dir, store) = store_with(None);
        let manager = TokenManager::new(store, TokenManagerOptions::default()).unwrap();
        let err = manager.get_access_token().await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials));
    }

    #[tokio::test]
    async fn test_fresh_cached_respects_margin() {
        let (_dir, store) = store_with(Some(&credentials()));
        let manager = TokenManager::new(store, TokenManagerOptions::default()).unwrap();

        *manager.inner.cached.write().await = Some(CachedToken {
            access_token: "T1".to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(600),
        });
        assert_eq!(
            manager.inner.fresh_cached().await.unwrap().access_token,
            "T1"
        );

        // Within the 300 s margin: treated as expiring
        *manager.inner.cached.write().await = Some(CachedToken {
            access_token: "T1".to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(120),
        });
        assert!(manager.inner.fresh_cached().await.is_none());
    }

    #[tokio::test]
    async fn test_warm_start_reuses_persisted_token() {
        let (_dir, store) = store_with(Some(&credentials()));
        let token = CachedToken {
            access_token: "persisted".to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(7000),
        };
        store.save_cached_token("wx1234567890", &token).unwrap();

        let manager = TokenManager::new(store, TokenManagerOptions::default()).unwrap();
        let got = manager.get_access_token().await.unwrap();
        assert_eq!(got.access_token, "persisted");
    }

    #[tokio::test]
    async fn test_env_credentials_written_back_once() {
        let (dir, store) = store_with(None);
        let options = TokenManagerOptions {
            env: EnvOverrides {
                app_id: Some("wx1234567890".to_string()),
                app_secret: Some("from-env".to_string()),
            },
            ..TokenManagerOptions::default()
        };
        let manager = TokenManager::new(store, options).unwrap();
        assert_eq!(manager.credentials().unwrap().app_secret, "from-env");

        // A fresh store handle sees the persisted merge
        let store = CredentialStore::open(&dir.path().join("data.sqlite3")).unwrap();
        assert_eq!(store.load_config().unwrap().unwrap().app_secret, "from-env");
    }
}
