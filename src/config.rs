use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};

use crate::auth::{
    CredentialStore, EnvOverrides, TokenManager, TokenManagerOptions, DEFAULT_API_BASE,
    DEFAULT_SAFETY_MARGIN_SECS,
};

/// wxmp-cli - WeChat Official Account command-line client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the credential store (defaults to the user config directory)
    #[arg(long, env = "WXMP_STORE_FILE", global = true)]
    pub store_file: Option<String>,

    /// Platform API base URL
    #[arg(long, env = "WXMP_API_BASE", global = true)]
    pub api_base: Option<String>,

    /// Seconds before expiry at which a token counts as expiring
    #[arg(long, env = "WXMP_TOKEN_SAFETY_MARGIN", global = true)]
    pub token_safety_margin: Option<i64>,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "WXMP_HTTP_CONNECT_TIMEOUT", global = true)]
    pub http_connect_timeout: Option<u64>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "WXMP_HTTP_TIMEOUT", global = true)]
    pub http_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage stored credentials
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the current access token (fetching one if needed)
    Token {
        #[command(subcommand)]
        action: Option<TokenAction>,
    },
    /// Permanent media assets
    Media {
        #[command(subcommand)]
        action: MediaAction,
    },
    /// Draft articles
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },
    /// Run the resident JSON-over-HTTP server
    Serve {
        /// Listen address
        #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Listen port
        #[arg(short, long, env = "SERVER_PORT", default_value = "8923")]
        port: u16,

        /// Bearer key required from clients; unset disables the check
        #[arg(long, env = "WXMP_SERVE_KEY")]
        api_key: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Save credentials; prompts for anything not passed as a flag
    Set {
        #[arg(long)]
        app_id: Option<String>,
        #[arg(long)]
        app_secret: Option<String>,
        /// Callback verification token (optional)
        #[arg(long)]
        token: Option<String>,
        /// Callback message encryption key (optional)
        #[arg(long)]
        encoding_aes_key: Option<String>,
    },
    /// Show stored credentials (secret redacted)
    Get,
}

#[derive(Subcommand, Debug)]
pub enum TokenAction {
    /// Discard the cached token and fetch a new one
    Refresh,
}

#[derive(Subcommand, Debug)]
pub enum MediaAction {
    /// Upload a local file as permanent material
    Upload {
        file: PathBuf,
        /// image, voice, video or thumb
        #[arg(long = "type", value_name = "TYPE", default_value = "image")]
        media_type: String,
        /// Video title (video uploads only)
        #[arg(long)]
        title: Option<String>,
        /// Video introduction (video uploads only)
        #[arg(long, default_value = "")]
        introduction: String,
    },
    /// List stored material of one type
    List {
        #[arg(long = "type", value_name = "TYPE", default_value = "image")]
        media_type: String,
        #[arg(long, default_value = "0")]
        offset: u32,
        #[arg(long, default_value = "20")]
        count: u32,
    },
    /// Per-type material totals
    Count,
}

#[derive(Subcommand, Debug)]
pub enum DraftAction {
    /// Create a draft from a JSON file of articles
    Add {
        /// JSON file: an article, an array, or {"articles": [...]}
        file: PathBuf,
    },
    /// Fetch one draft
    Get { media_id: String },
    /// Replace one article inside a draft
    Update {
        media_id: String,
        /// Article position within the draft
        #[arg(long, default_value = "0")]
        index: u32,
        /// JSON file containing the replacement article
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete a draft
    Delete { media_id: String },
    /// Page through drafts
    List {
        #[arg(long, default_value = "0")]
        offset: u32,
        #[arg(long, default_value = "20")]
        count: u32,
        /// Omit article bodies from the listing
        #[arg(long)]
        no_content: bool,
    },
    /// Total draft count
    Count,
}

/// Resolved runtime settings, CLI > env > defaults
#[derive(Clone, Debug)]
pub struct Config {
    pub store_file: PathBuf,
    pub api_base: String,
    pub token_safety_margin: i64,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub log_level: String,
}

/// Load .env and parse the command line
pub fn parse() -> Cli {
    dotenvy::dotenv().ok();
    Cli::parse()
}

impl Config {
    pub fn from_cli(cli: &Cli) -> crate::error::Result<Self> {
        let store_file = match &cli.store_file {
            Some(path) => expand_tilde(path),
            None => CredentialStore::default_path()?,
        };

        Ok(Self {
            store_file,
            api_base: cli
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            token_safety_margin: cli
                .token_safety_margin
                .unwrap_or(DEFAULT_SAFETY_MARGIN_SECS),
            http_connect_timeout: cli.http_connect_timeout.unwrap_or(10),
            http_request_timeout: cli.http_timeout.unwrap_or(30),
            log_level: cli.log_level.clone().unwrap_or_else(|| "warn".to_string()),
        })
    }

    /// Open the store and build a token manager from these settings
    pub fn build_manager(&self) -> crate::error::Result<TokenManager> {
        let store = CredentialStore::open(&self.store_file)?;
        TokenManager::new(store, self.manager_options())
    }

    pub fn manager_options(&self) -> TokenManagerOptions {
        TokenManagerOptions {
            api_base: self.api_base.clone(),
            safety_margin_secs: self.token_safety_margin,
            request_timeout_secs: self.http_request_timeout,
            env: EnvOverrides::from_env(),
        }
    }
}

/// Prompt for whichever credential pieces were not passed as flags
pub fn prompt_missing_credentials(
    app_id: Option<String>,
    app_secret: Option<String>,
) -> Result<(String, String)> {
    let app_id = match app_id {
        Some(id) => id,
        None => Input::new()
            .with_prompt("AppID")
            .interact_text()
            .context("failed to read AppID")?,
    };

    let app_secret = match app_secret {
        Some(secret) => secret,
        None => Password::new()
            .with_prompt("AppSecret")
            .interact()
            .context("failed to read AppSecret")?,
    };

    if app_id.is_empty() || app_secret.is_empty() {
        anyhow::bail!("AppID and AppSecret cannot be empty");
    }

    Ok((app_id, app_secret))
}

/// Expand tilde (~) in file paths to the user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/wxmp/data.sqlite3");
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.to_string_lossy().ends_with("wxmp/data.sqlite3"));

        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
        // Just "~" without slash does not expand
        assert_eq!(expand_tilde("~"), PathBuf::from("~"));
    }

    #[test]
    fn test_config_defaults() {
        let cli = Cli::parse_from(["wxmp-cli", "--store-file", "/tmp/s.db", "token"]);
        let config = Config::from_cli(&cli).unwrap();
        assert_eq!(config.store_file, PathBuf::from("/tmp/s.db"));
        assert_eq!(config.api_base, "https://api.weixin.qq.com");
        assert_eq!(config.token_safety_margin, 300);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_config_overrides() {
        let cli = Cli::parse_from([
            "wxmp-cli",
            "--store-file",
            "/tmp/s.db",
            "--api-base",
            "http://127.0.0.1:9000",
            "--token-safety-margin",
            "60",
            "token",
        ]);
        let config = Config::from_cli(&cli).unwrap();
        assert_eq!(config.api_base, "http://127.0.0.1:9000");
        assert_eq!(config.token_safety_margin, 60);
    }
}
