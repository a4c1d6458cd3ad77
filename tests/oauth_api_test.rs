// Integration tests for the OAuth and integrations HTTP API

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use growth_connect::api::{create_router, ApiState};
use growth_connect::config::{ProviderSettings, ServiceConfig};
use growth_connect::oauth::OAuthService;
use growth_connect::store::Store;
use mockito::{Server, ServerGuard};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use url::Url;

const REDIRECT: &str = "https://preview-42.lovable.app/integrations";
const FALLBACK: &str = "https://app.growthhub.io/integrations";

struct TestApp {
    router: Router,
    service: Arc<OAuthService>,
    _temp_dir: TempDir,
}

fn test_config(provider_url: &str) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.server.public_base_url = "https://connect.growthhub.io".to_string();
    config.redirect.allowed_origins = vec!["https://app.growthhub.io".to_string()];
    config.redirect.fallback_url = FALLBACK.to_string();
    config.secrets.state_secret = Some("test-state-secret".to_string());
    config.secrets.encryption_key = Some("test-encryption-secret".to_string());
    config.providers.insert(
        "google".to_string(),
        ProviderSettings {
            client_id: "google-client".to_string(),
            client_secret: "google-secret".to_string(),
            token_url: Some(format!("{}/token", provider_url)),
            userinfo_url: Some(format!("{}/userinfo", provider_url)),
            ..Default::default()
        },
    );
    config
}

fn create_test_app(config: &ServiceConfig) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(temp_dir.path().join("connect.db")).unwrap());
    let service = Arc::new(OAuthService::new(config, store).unwrap());

    let router = create_router(
        ApiState {
            service: Arc::clone(&service),
        },
        &config.redirect.allowed_origins,
    );

    TestApp {
        router,
        service,
        _temp_dir: temp_dir,
    }
}

async fn mock_provider(server: &mut ServerGuard) {
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"AT1","refresh_token":"RT1","expires_in":3600,"scope":"a b"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/userinfo")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"1001","email":"growth@example.com","name":"Growth"}"#)
        .create_async()
        .await;
}

fn initiate_request(body: Value, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/oauth/initiate")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_response(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn query(url: &str) -> HashMap<String, String> {
    Url::parse(url).unwrap().query_pairs().into_owned().collect()
}

fn location(response: &axum::response::Response) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

/// Run initiation through the router and return the state parameter
async fn initiate(app: &TestApp) -> String {
    let response = app
        .router
        .clone()
        .oneshot(initiate_request(
            json!({"workspace_id": "W1", "provider": "google", "redirect_url": REDIRECT}),
            Some("user-1"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_response(response).await;
    let auth_url = json["auth_url"].as_str().unwrap();
    query(auth_url)["state"].clone()
}

async fn callback(app: &TestApp, query_string: &str) -> axum::response::Response {
    app.router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/oauth/callback?{}", query_string))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app(&test_config("http://127.0.0.1:1"));

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_response(response).await["status"], "ok");
}

#[tokio::test]
async fn test_full_oauth_flow() {
    let mut server = Server::new_async().await;
    mock_provider(&mut server).await;
    let app = create_test_app(&test_config(&server.url()));

    let state = initiate(&app).await;
    let response = callback(&app, &format!("code=abc&state={}", urlencoding::encode(&state))).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert!(target.starts_with(REDIRECT));
    let flags = query(&target);
    assert_eq!(flags["oauth"], "success");
    assert_eq!(flags["provider"], "google");

    let tokens = app.service.load_tokens("W1", "google").unwrap().unwrap();
    assert_eq!(tokens.access_token, "AT1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("RT1"));

    // Listing exposes metadata only
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/workspaces/W1/integrations")
                .header(header::AUTHORIZATION, "Bearer user-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_response(response).await;
    let integrations = json["integrations"].as_array().unwrap();
    assert_eq!(integrations.len(), 1);
    assert_eq!(integrations[0]["provider"], "google");
    assert_eq!(integrations[0]["status"], "active");
    assert_eq!(integrations[0]["scopes"], json!(["a", "b"]));
    assert_eq!(integrations[0]["account_name"], "growth@example.com");
    let raw = json.to_string();
    assert!(!raw.contains("AT1"));
    assert!(!raw.contains("RT1"));
}

#[tokio::test]
async fn test_callback_replay_redirects_with_error() {
    let mut server = Server::new_async().await;
    mock_provider(&mut server).await;
    let app = create_test_app(&test_config(&server.url()));

    let state = initiate(&app).await;
    let query_string = format!("code=abc&state={}", urlencoding::encode(&state));

    let first = callback(&app, &query_string).await;
    assert_eq!(query(&location(&first))["oauth"], "success");

    let second = callback(&app, &query_string).await;
    assert_eq!(second.status(), StatusCode::FOUND);
    let target = location(&second);
    assert!(target.starts_with(FALLBACK));
    let flags = query(&target);
    assert_eq!(flags["oauth"], "error");
    assert_eq!(flags["error_type"], "replay_detected");
}

#[tokio::test]
async fn test_callback_denied() {
    let app = create_test_app(&test_config("http://127.0.0.1:1"));
    let state = initiate(&app).await;

    let response = callback(
        &app,
        &format!(
            "error=access_denied&error_description=User+cancelled&state={}",
            urlencoding::encode(&state)
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert!(target.starts_with(REDIRECT));
    assert_eq!(query(&target)["error_type"], "oauth_denied");
}

#[tokio::test]
async fn test_callback_without_query_redirects_to_fallback() {
    let app = create_test_app(&test_config("http://127.0.0.1:1"));

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/oauth/callback")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert!(target.starts_with(FALLBACK));
    assert_eq!(query(&target)["error_type"], "missing_params");
}

#[tokio::test]
async fn test_callback_token_exchange_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;
    let app = create_test_app(&test_config(&server.url()));

    let state = initiate(&app).await;
    let response = callback(&app, &format!("code=bad&state={}", urlencoding::encode(&state))).await;

    let target = location(&response);
    assert!(target.starts_with(REDIRECT));
    assert_eq!(query(&target)["error_type"], "token_exchange_failed");
    assert!(app.service.list_integrations("W1").unwrap().is_empty());
}

#[tokio::test]
async fn test_initiate_requires_bearer() {
    let app = create_test_app(&test_config("http://127.0.0.1:1"));

    let response = app
        .router
        .clone()
        .oneshot(initiate_request(
            json!({"workspace_id": "W1", "provider": "google", "redirect_url": REDIRECT}),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_initiate_rejects_bad_input() {
    let app = create_test_app(&test_config("http://127.0.0.1:1"));

    for body in [
        json!({"workspace_id": "W1", "provider": "google", "redirect_url": "https://lovable.app.evil.com/x"}),
        json!({"workspace_id": "W1", "provider": "google", "redirect_url": "evil.com/lovable.app"}),
        json!({"workspace_id": "W1", "provider": "tiktok", "redirect_url": REDIRECT}),
        json!({"workspace_id": "", "provider": "google", "redirect_url": REDIRECT}),
    ] {
        let response = app
            .router
            .clone()
            .oneshot(initiate_request(body, Some("user-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_initiate_unconfigured_provider() {
    let app = create_test_app(&test_config("http://127.0.0.1:1"));

    let response = app
        .router
        .clone()
        .oneshot(initiate_request(
            json!({"workspace_id": "W1", "provider": "meta", "redirect_url": REDIRECT}),
            Some("user-1"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_response(response).await;
    // Configuration details stay in the logs
    assert!(!json["error"].as_str().unwrap().contains("GROWTH_"));
}

#[tokio::test]
async fn test_disconnect_integration() {
    let mut server = Server::new_async().await;
    mock_provider(&mut server).await;
    let app = create_test_app(&test_config(&server.url()));

    let state = initiate(&app).await;
    callback(&app, &format!("code=abc&state={}", urlencoding::encode(&state))).await;

    let delete = |uri: &str| {
        Request::builder()
            .method("DELETE")
            .uri(uri.to_string())
            .header(header::AUTHORIZATION, "Bearer user-1")
            .body(Body::empty())
            .unwrap()
    };

    let response = app
        .router
        .clone()
        .oneshot(delete("/api/workspaces/W1/integrations/google"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.service.load_tokens("W1", "google").unwrap().is_none());

    let response = app
        .router
        .clone()
        .oneshot(delete("/api/workspaces/W1/integrations/meta"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .router
        .clone()
        .oneshot(delete("/api/workspaces/W1/integrations/tiktok"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_integrations_requires_bearer() {
    let app = create_test_app(&test_config("http://127.0.0.1:1"));

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/workspaces/W1/integrations")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
