// Authentication module
// Credential persistence and access-token lifecycle

mod fetch;
mod manager;
mod store;
mod types;

pub use manager::{TokenManager, TokenManagerOptions, DEFAULT_API_BASE, DEFAULT_SAFETY_MARGIN_SECS};
pub use store::CredentialStore;
pub use types::{redact_id, CachedToken, Credentials, EnvOverrides, PlatformError};
