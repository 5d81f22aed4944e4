// Command handlers
// Thin glue between the CLI surface and the core: builds the manager and
// wrapper, invokes one operation, returns the envelope data.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::auth::{redact_id, CredentialStore, Credentials};
use crate::config::{Config, ConfigAction, DraftAction, MediaAction, TokenAction};
use crate::draft;
use crate::error::{Error, Result};
use crate::http_client::WxClient;
use crate::media;

/// Run a `config` subcommand
pub fn config_command(config: &Config, action: ConfigAction) -> Result<Value> {
    let store = CredentialStore::open(&config.store_file)?;

    match action {
        ConfigAction::Set {
            app_id,
            app_secret,
            token,
            encoding_aes_key,
        } => {
            let (app_id, app_secret) = crate::config::prompt_missing_credentials(app_id, app_secret)
                .map_err(|e| Error::InvalidInput(e.to_string()))?;

            // Fields not passed keep their stored values
            let existing = store.load_config()?;
            let credentials = Credentials {
                app_id,
                app_secret,
                token: token.or_else(|| existing.as_ref().and_then(|c| c.token.clone())),
                encoding_aes_key: encoding_aes_key
                    .or_else(|| existing.as_ref().and_then(|c| c.encoding_aes_key.clone())),
            };
            store.save_config(&credentials)?;

            Ok(json!({
                "app_id": credentials.app_id,
                "store_file": config.store_file.display().to_string(),
            }))
        }
        ConfigAction::Get => match store.load_config()? {
            Some(credentials) => Ok(json!({
                "app_id": credentials.app_id,
                "app_secret": redact_id(&credentials.app_secret),
                "token": credentials.token,
                "encoding_aes_key": credentials.encoding_aes_key,
                "store_file": config.store_file.display().to_string(),
            })),
            None => Err(Error::MissingCredentials),
        },
    }
}

/// Run a `token` subcommand
pub async fn token_command(config: &Config, action: Option<TokenAction>) -> Result<Value> {
    let manager = config.build_manager()?;
    let token = match action {
        None => manager.get_access_token().await?,
        Some(TokenAction::Refresh) => manager.refresh_access_token().await?,
    };
    Ok(json!({
        "access_token": token.access_token,
        "expires_at": token.expires_at.to_rfc3339(),
    }))
}

/// Run a `media` subcommand
pub async fn media_command(config: &Config, action: MediaAction) -> Result<Value> {
    let wx = build_wx(config)?;

    match action {
        MediaAction::Upload {
            file,
            media_type,
            title,
            introduction,
        } => {
            let media_type = media::MaterialType::parse(&media_type)?;
            let description = title.map(|title| media::VideoDescription {
                title,
                introduction,
            });
            media::upload(&wx, media_type, &file, description.as_ref()).await
        }
        MediaAction::List {
            media_type,
            offset,
            count,
        } => {
            let media_type = media::MaterialType::parse(&media_type)?;
            media::list(&wx, media_type, offset, count).await
        }
        MediaAction::Count => media::count(&wx).await,
    }
}

/// Run a `draft` subcommand
pub async fn draft_command(config: &Config, action: DraftAction) -> Result<Value> {
    let wx = build_wx(config)?;

    match action {
        DraftAction::Add { file } => {
            let articles = draft::articles_from_json(&read_input_file(&file)?)?;
            draft::add(&wx, &articles).await
        }
        DraftAction::Get { media_id } => draft::get(&wx, &media_id).await,
        DraftAction::Update {
            media_id,
            index,
            file,
        } => {
            let articles = draft::articles_from_json(&read_input_file(&file)?)?;
            let article = articles.into_iter().next().ok_or_else(|| {
                Error::InvalidInput("update takes exactly one article".to_string())
            })?;
            draft::update(&wx, &media_id, index, &article).await
        }
        DraftAction::Delete { media_id } => draft::delete(&wx, &media_id).await,
        DraftAction::List {
            offset,
            count,
            no_content,
        } => draft::list(&wx, offset, count, no_content).await,
        DraftAction::Count => draft::count(&wx).await,
    }
}

fn build_wx(config: &Config) -> Result<WxClient> {
    let manager = Arc::new(config.build_manager()?);
    WxClient::new(
        manager,
        config.api_base.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )
}

fn read_input_file(path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("cannot read {}: {}", path.display(), e)))
}
