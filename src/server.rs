// Serve mode
// Resident JSON-over-HTTP wrapper around the command surface, for callers
// that want a long-lived process instead of one-shot CLI invocations.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path as UrlPath, Query, State},
    http::Request,
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::auth::{redact_id, TokenManager};
use crate::config::Config;
use crate::draft;
use crate::error::Error;
use crate::http_client::WxClient;
use crate::media;
use crate::output;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<TokenManager>,
    pub wx: Arc<WxClient>,
    pub api_key: Option<String>,
}

/// Build the application state from runtime settings
pub fn build_state(config: &Config, api_key: Option<String>) -> crate::error::Result<AppState> {
    let auth = Arc::new(config.build_manager()?);
    let wx = Arc::new(WxClient::new(
        auth.clone(),
        config.api_base.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);
    Ok(AppState { auth, wx, api_key })
}

/// Assemble the router: health endpoints stay open, everything else sits
/// behind the optional key check.
pub fn build_app(state: AppState) -> Router {
    let health = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler));

    let api = Router::new()
        .route("/token", get(token_handler))
        .route("/token/refresh", post(token_refresh_handler))
        .route("/config", get(config_handler))
        .route("/media", get(media_list_handler).post(media_upload_handler))
        .route("/media/count", get(media_count_handler))
        .route("/drafts", get(draft_list_handler).post(draft_add_handler))
        .route("/drafts/count", get(draft_count_handler))
        .route(
            "/drafts/:media_id",
            get(draft_get_handler)
                .put(draft_update_handler)
                .delete(draft_delete_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            key_middleware,
        ))
        .with_state(state);

    Router::new().merge(health).merge(api).layer(cors_layer())
}

/// Start serving and block until shutdown
pub async fn serve(config: &Config, host: &str, port: u16, api_key: Option<String>) -> anyhow::Result<()> {
    let state = build_state(config, api_key)?;

    // Probe the token once at startup so misconfiguration is visible
    // immediately; the server keeps running either way.
    match state.auth.get_access_token().await {
        Ok(token) => info!(
            expires_at = %token.expires_at.to_rfc3339(),
            "startup token probe succeeded"
        ),
        Err(e) => warn!("startup token probe failed: {e}"),
    }

    let app = build_app(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("serving on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

/// Bearer-key check; disabled when no key was configured
async fn key_middleware(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let Some(ref expected) = state.api_key else {
        return next.run(request).await;
    };

    if let Some(header) = request.headers().get("authorization") {
        if let Ok(value) = header.to_str() {
            if value == format!("Bearer {expected}") {
                return next.run(request).await;
            }
        }
    }
    if let Some(header) = request.headers().get("x-api-key") {
        if let Ok(value) = header.to_str() {
            if value == expected {
                return next.run(request).await;
            }
        }
    }

    warn!(
        "rejected {} {} (invalid or missing key)",
        request.method(),
        request.uri().path()
    );
    let body = Json(json!({
        "ok": false,
        "error": { "code": "unauthorized", "message": "invalid or missing API key" }
    }));
    (axum::http::StatusCode::UNAUTHORIZED, body).into_response()
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "wxmp-cli server is running",
        "version": VERSION,
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": VERSION,
    }))
}

async fn token_handler(State(state): State<AppState>) -> Result<Json<Value>, Error> {
    let token = state.auth.get_access_token().await?;
    Ok(Json(output::success(json!({
        "access_token": token.access_token,
        "expires_at": token.expires_at.to_rfc3339(),
    }))))
}

async fn token_refresh_handler(State(state): State<AppState>) -> Result<Json<Value>, Error> {
    let token = state.auth.refresh_access_token().await?;
    Ok(Json(output::success(json!({
        "access_token": token.access_token,
        "expires_at": token.expires_at.to_rfc3339(),
    }))))
}

async fn config_handler(State(state): State<AppState>) -> Result<Json<Value>, Error> {
    let credentials = state.auth.credentials().ok_or(Error::MissingCredentials)?;
    Ok(Json(output::success(json!({
        "app_id": credentials.app_id,
        "app_secret": redact_id(&credentials.app_secret),
    }))))
}

#[derive(Deserialize)]
struct MediaListParams {
    #[serde(rename = "type", default = "default_media_type")]
    media_type: String,
    #[serde(default)]
    offset: u32,
    #[serde(default = "default_page_count")]
    count: u32,
}

fn default_media_type() -> String {
    "image".to_string()
}

fn default_page_count() -> u32 {
    20
}

async fn media_list_handler(
    State(state): State<AppState>,
    Query(params): Query<MediaListParams>,
) -> Result<Json<Value>, Error> {
    let media_type = media::MaterialType::parse(&params.media_type)?;
    let data = media::list(&state.wx, media_type, params.offset, params.count).await?;
    Ok(Json(output::success(data)))
}

/// Upload request: the server reads the file from its own filesystem,
/// which is the point of a locally resident wrapper.
#[derive(Deserialize)]
struct MediaUploadRequest {
    path: PathBuf,
    #[serde(rename = "type", default = "default_media_type")]
    media_type: String,
    title: Option<String>,
    #[serde(default)]
    introduction: String,
}

async fn media_upload_handler(
    State(state): State<AppState>,
    Json(request): Json<MediaUploadRequest>,
) -> Result<Json<Value>, Error> {
    let media_type = media::MaterialType::parse(&request.media_type)?;
    let description = request.title.map(|title| media::VideoDescription {
        title,
        introduction: request.introduction,
    });
    let data = media::upload(&state.wx, media_type, &request.path, description.as_ref()).await?;
    Ok(Json(output::success(data)))
}

async fn media_count_handler(State(state): State<AppState>) -> Result<Json<Value>, Error> {
    let data = media::count(&state.wx).await?;
    Ok(Json(output::success(data)))
}

#[derive(Deserialize)]
struct DraftAddRequest {
    articles: Vec<draft::Article>,
}

async fn draft_add_handler(
    State(state): State<AppState>,
    Json(request): Json<DraftAddRequest>,
) -> Result<Json<Value>, Error> {
    if request.articles.is_empty() {
        return Err(Error::InvalidInput("no articles given".to_string()));
    }
    for article in &request.articles {
        article.validate()?;
    }
    let data = draft::add(&state.wx, &request.articles).await?;
    Ok(Json(output::success(data)))
}

#[derive(Deserialize)]
struct DraftListParams {
    #[serde(default)]
    offset: u32,
    #[serde(default = "default_page_count")]
    count: u32,
    #[serde(default)]
    no_content: bool,
}

async fn draft_list_handler(
    State(state): State<AppState>,
    Query(params): Query<DraftListParams>,
) -> Result<Json<Value>, Error> {
    let data = draft::list(&state.wx, params.offset, params.count, params.no_content).await?;
    Ok(Json(output::success(data)))
}

async fn draft_count_handler(State(state): State<AppState>) -> Result<Json<Value>, Error> {
    let data = draft::count(&state.wx).await?;
    Ok(Json(output::success(data)))
}

async fn draft_get_handler(
    State(state): State<AppState>,
    UrlPath(media_id): UrlPath<String>,
) -> Result<Json<Value>, Error> {
    let data = draft::get(&state.wx, &media_id).await?;
    Ok(Json(output::success(data)))
}

#[derive(Deserialize)]
struct DraftUpdateRequest {
    #[serde(default)]
    index: u32,
    article: draft::Article,
}

async fn draft_update_handler(
    State(state): State<AppState>,
    UrlPath(media_id): UrlPath<String>,
    Json(request): Json<DraftUpdateRequest>,
) -> Result<Json<Value>, Error> {
    let data = draft::update(&state.wx, &media_id, request.index, &request.article).await?;
    Ok(Json(output::success(data)))
}

async fn draft_delete_handler(
    State(state): State<AppState>,
    UrlPath(media_id): UrlPath<String>,
) -> Result<Json<Value>, Error> {
    let data = draft::delete(&state.wx, &media_id).await?;
    Ok(Json(output::success(data)))
}

/// Resolve on ctrl-c or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install ctrl-c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
