// Credential persistence
// SQLite key/value table with JSON payloads in the user's config directory

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};

use super::types::{CachedToken, Credentials};
use crate::error::{Error, Result};

const CONFIG_KEY: &str = "wxmp:config";

/// Token records are keyed per app so switching credentials never serves
/// another application's token.
fn token_key(app_id: &str) -> String {
    format!("wxmp:access-token:{app_id}")
}

/// Durable store for credentials and the last-known access token.
///
/// Exclusively owns the on-disk record. Writes are synchronous: once a save
/// call returns, a process started immediately afterwards observes the data.
#[derive(Debug)]
pub struct CredentialStore {
    conn: Connection,
}

impl CredentialStore {
    /// Well-known store location scoped to the tool's configuration directory
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| Error::StoreInit("no configuration directory on this system".into()))?;
        Ok(base.join("wxmp-cli").join("data.sqlite3"))
    }

    /// Open (creating if necessary) the store at `path`. Idempotent.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::StoreInit(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::StoreInit(format!("cannot open {}: {}", path.display(), e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS store_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .map_err(|e| Error::StoreInit(e.to_string()))?;

        Ok(Self { conn })
    }

    /// Previously saved credentials, or None if never configured
    pub fn load_config(&self) -> Result<Option<Credentials>> {
        self.read_json(CONFIG_KEY)
    }

    /// Merge the given fields over the stored credentials and persist
    /// synchronously before returning.
    pub fn save_config(&self, credentials: &Credentials) -> Result<()> {
        self.write_json(CONFIG_KEY, credentials)
    }

    /// Last-known access token for `app_id`, if one was persisted
    pub fn load_cached_token(&self, app_id: &str) -> Result<Option<CachedToken>> {
        self.read_json(&token_key(app_id))
    }

    /// Persist the freshly fetched token for reuse by later processes
    pub fn save_cached_token(&self, app_id: &str, token: &CachedToken) -> Result<()> {
        self.write_json(&token_key(app_id), token)
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM store_kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| Error::StoreInit(e.to_string()))?;

        match raw {
            Some(s) => {
                let value = serde_json::from_str(&s)
                    .map_err(|e| Error::StoreInit(format!("corrupt record {key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|e| Error::Persist(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO store_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, json.as_str()],
            )
            .map_err(|e| Error::Persist(e.to_string()))?;
        Ok(())
    }
}
