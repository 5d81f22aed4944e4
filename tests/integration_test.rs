// Integration tests for wxmp-cli
//
// Runs the token lifecycle, API wrapper and serve-mode router against a mock
// platform server. No test touches the real WeChat API.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use mockito::Matcher;
use serde_json::{json, Value};
use tower::ServiceExt;

use wxmp_cli::{
    auth::{
        CachedToken, CredentialStore, Credentials, EnvOverrides, TokenManager, TokenManagerOptions,
    },
    config::Config,
    draft,
    error::Error,
    http_client::WxClient,
    server,
};

// ==================================================================================================
// Test helpers
// ==================================================================================================

const APP_ID: &str = "wx1234567890";
const APP_SECRET: &str = "test-secret";

fn credentials() -> Credentials {
    Credentials {
        app_id: APP_ID.to_string(),
        app_secret: APP_SECRET.to_string(),
        token: None,
        encoding_aes_key: None,
    }
}

/// A store in its own temp directory, optionally pre-configured
fn temp_store(dir: &tempfile::TempDir, configured: bool) -> CredentialStore {
    let store = CredentialStore::open(&dir.path().join("data.sqlite3")).unwrap();
    if configured {
        store.save_config(&credentials()).unwrap();
    }
    store
}

fn options(api_base: &str) -> TokenManagerOptions {
    TokenManagerOptions {
        api_base: api_base.to_string(),
        safety_margin_secs: 300,
        request_timeout_secs: 5,
        env: EnvOverrides::default(),
    }
}

/// Mock the authorization endpoint with a grant for `token`
async fn mock_token_grant(
    server: &mut mockito::ServerGuard,
    token: &str,
    hits: usize,
) -> mockito::Mock {
    server
        .mock("GET", "/cgi-bin/token")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "client_credential".into()),
            Matcher::UrlEncoded("appid".into(), APP_ID.into()),
            Matcher::UrlEncoded("secret".into(), APP_SECRET.into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "access_token": token, "expires_in": 7200 }).to_string())
        .expect(hits)
        .create_async()
        .await
}

// ==================================================================================================
// Token lifecycle
// ==================================================================================================

#[tokio::test]
async fn test_fetch_parses_grant_and_anchors_expiry() {
    let mut server = mockito::Server::new_async().await;
    let mock = mock_token_grant(&mut server, "T1", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let manager = TokenManager::new(temp_store(&dir, true), options(&server.url())).unwrap();

    let before = Utc::now();
    let token = manager.get_access_token().await.unwrap();
    assert_eq!(token.access_token, "T1");

    let lifetime = token.expires_at - before;
    assert!(lifetime.num_seconds() > 7190 && lifetime.num_seconds() <= 7200);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_repeated_calls_hit_cache_not_network() {
    let mut server = mockito::Server::new_async().await;
    let mock = mock_token_grant(&mut server, "T1", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let manager = TokenManager::new(temp_store(&dir, true), options(&server.url())).unwrap();

    for _ in 0..5 {
        let token = manager.get_access_token().await.unwrap();
        assert_eq!(token.access_token, "T1");
    }
    // Exactly one upstream fetch for all five calls
    mock.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_callers_coalesce_into_one_fetch() {
    let mut server = mockito::Server::new_async().await;
    let mock = mock_token_grant(&mut server, "T1", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let manager =
        Arc::new(TokenManager::new(temp_store(&dir, true), options(&server.url())).unwrap());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_access_token().await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().access_token, "T1");
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_forced_refresh_bypasses_cache() {
    let mut server = mockito::Server::new_async().await;
    let mock = mock_token_grant(&mut server, "T1", 2).await;

    let dir = tempfile::tempdir().unwrap();
    let manager = TokenManager::new(temp_store(&dir, true), options(&server.url())).unwrap();

    manager.get_access_token().await.unwrap();
    manager.refresh_access_token().await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_token_within_safety_margin_is_refetched() {
    let mut server = mockito::Server::new_async().await;
    let mock = mock_token_grant(&mut server, "T2", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir, true);
    // Persisted token technically valid, but inside the 300 s margin
    store
        .save_cached_token(
            APP_ID,
            &CachedToken {
                access_token: "stale".to_string(),
                expires_at: Utc::now() + Duration::seconds(100),
            },
        )
        .unwrap();

    let manager = TokenManager::new(store, options(&server.url())).unwrap();
    let token = manager.get_access_token().await.unwrap();
    assert_eq!(token.access_token, "T2");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_second_process_reuses_persisted_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = mock_token_grant(&mut server, "T1", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.sqlite3");

    {
        let store = CredentialStore::open(&path).unwrap();
        store.save_config(&credentials()).unwrap();
        let manager = TokenManager::new(store, options(&server.url())).unwrap();
        manager.get_access_token().await.unwrap();
    }

    // Fresh construction over the same store: still no second fetch
    let manager =
        TokenManager::new(CredentialStore::open(&path).unwrap(), options(&server.url())).unwrap();
    let token = manager.get_access_token().await.unwrap();
    assert_eq!(token.access_token, "T1");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_error_code_carried_verbatim() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/cgi-bin/token")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({ "errcode": 40001, "errmsg": "invalid credential" }).to_string())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = TokenManager::new(temp_store(&dir, true), options(&server.url())).unwrap();

    match manager.get_access_token().await.unwrap_err() {
        Error::RemoteAuth { code, message } => {
            assert_eq!(code, 40001);
            assert_eq!(message, "invalid credential");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_credentials_makes_no_network_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/cgi-bin/token")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = TokenManager::new(temp_store(&dir, false), options(&server.url())).unwrap();

    assert!(matches!(
        manager.get_access_token().await.unwrap_err(),
        Error::MissingCredentials
    ));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_network_error() {
    // Nothing listens on this port
    let dir = tempfile::tempdir().unwrap();
    let manager =
        TokenManager::new(temp_store(&dir, true), options("http://127.0.0.1:1")).unwrap();

    assert!(matches!(
        manager.get_access_token().await.unwrap_err(),
        Error::Network { .. }
    ));
}

// ==================================================================================================
// API wrapper
// ==================================================================================================

fn wx_client(server_url: &str, dir: &tempfile::TempDir) -> WxClient {
    let manager = Arc::new(TokenManager::new(temp_store(dir, true), options(server_url)).unwrap());
    WxClient::new(manager, server_url.to_string(), 5, 5).unwrap()
}

#[tokio::test]
async fn test_wrapper_attaches_access_token_to_calls() {
    let mut server = mockito::Server::new_async().await;
    let _token_mock = mock_token_grant(&mut server, "T1", 1).await;
    let count_mock = server
        .mock("GET", "/cgi-bin/draft/count")
        .match_query(Matcher::UrlEncoded("access_token".into(), "T1".into()))
        .with_status(200)
        .with_body(json!({ "total_count": 3 }).to_string())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let wx = wx_client(&server.url(), &dir);

    let data = draft::count(&wx).await.unwrap();
    assert_eq!(data["total_count"], 3);
    count_mock.assert_async().await;
}

#[tokio::test]
async fn test_wrapper_surfaces_api_errcode() {
    let mut server = mockito::Server::new_async().await;
    let _token_mock = mock_token_grant(&mut server, "T1", 1).await;
    let _count_mock = server
        .mock("GET", "/cgi-bin/draft/count")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({ "errcode": 45009, "errmsg": "reach max api daily quota limit" }).to_string(),
        )
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let wx = wx_client(&server.url(), &dir);

    match draft::count(&wx).await.unwrap_err() {
        Error::RemoteAuth { code, .. } => assert_eq!(code, 45009),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_draft_add_posts_articles() {
    let mut server = mockito::Server::new_async().await;
    let _token_mock = mock_token_grant(&mut server, "T1", 1).await;
    let add_mock = server
        .mock("POST", "/cgi-bin/draft/add")
        .match_query(Matcher::UrlEncoded("access_token".into(), "T1".into()))
        .match_body(Matcher::PartialJson(json!({
            "articles": [{ "title": "Hello", "thumb_media_id": "THUMB" }]
        })))
        .with_status(200)
        .with_body(json!({ "media_id": "DRAFT_MID" }).to_string())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let wx = wx_client(&server.url(), &dir);

    let articles = vec![draft::Article {
        title: "Hello".to_string(),
        author: None,
        digest: None,
        content: "<p>body</p>".to_string(),
        content_source_url: None,
        thumb_media_id: "THUMB".to_string(),
        need_open_comment: None,
        only_fans_can_comment: None,
    }];
    let data = draft::add(&wx, &articles).await.unwrap();
    assert_eq!(data["media_id"], "DRAFT_MID");
    add_mock.assert_async().await;
}

// ==================================================================================================
// Serve mode
// ==================================================================================================

fn serve_config(server_url: &str, dir: &tempfile::TempDir) -> Config {
    Config {
        store_file: dir.path().join("data.sqlite3"),
        api_base: server_url.to_string(),
        token_safety_margin: 300,
        http_connect_timeout: 5,
        http_request_timeout: 5,
        log_level: "warn".to_string(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint_is_open() {
    let server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    temp_store(&dir, true);

    let state = server::build_state(&serve_config(&server.url(), &dir), None).unwrap();
    let app = server::build_app(state);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_token_endpoint_returns_envelope() {
    let mut server = mockito::Server::new_async().await;
    let _token_mock = mock_token_grant(&mut server, "T1", 1).await;
    let dir = tempfile::tempdir().unwrap();
    temp_store(&dir, true);

    let state = server::build_state(&serve_config(&server.url(), &dir), None).unwrap();
    let app = server::build_app(state);

    let response = app
        .oneshot(Request::get("/token").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["access_token"], "T1");
}

#[tokio::test]
async fn test_missing_credentials_maps_to_unauthorized_envelope() {
    let server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    temp_store(&dir, false);

    let state = server::build_state(&serve_config(&server.url(), &dir), None).unwrap();
    let app = server::build_app(state);

    let response = app
        .oneshot(Request::get("/token").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "missing_credentials");
}

#[tokio::test]
async fn test_api_key_guard() {
    let server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    temp_store(&dir, true);

    let state = server::build_state(
        &serve_config(&server.url(), &dir),
        Some("secret-key".to_string()),
    )
    .unwrap();
    let app = server::build_app(state);

    // Missing key is rejected
    let response = app
        .clone()
        .oneshot(Request::get("/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unauthorized");

    // Bearer key passes
    let response = app
        .clone()
        .oneshot(
            Request::get("/config")
                .header("authorization", "Bearer secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["app_id"], APP_ID);

    // x-api-key passes too; health stays open without a key
    let response = app
        .clone()
        .oneshot(
            Request::get("/config")
                .header("x-api-key", "secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_draft_routes_proxy_to_platform() {
    let mut server = mockito::Server::new_async().await;
    let _token_mock = mock_token_grant(&mut server, "T1", 1).await;
    let _list_mock = server
        .mock("POST", "/cgi-bin/draft/batchget")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({ "offset": 0, "count": 10 })))
        .with_status(200)
        .with_body(json!({ "total_count": 1, "item_count": 1, "item": [] }).to_string())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    temp_store(&dir, true);

    let state = server::build_state(&serve_config(&server.url(), &dir), None).unwrap();
    let app = server::build_app(state);

    let response = app
        .oneshot(
            Request::get("/drafts?offset=0&count=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["total_count"], 1);
}
