//! OAuth endpoints.
//!
//! - POST /api/oauth/initiate: returns the provider authorization URL
//! - GET /api/oauth/callback: provider redirect target; always answers 302

use super::{ApiState, AppError};
use crate::auth::extract_bearer_token;
use crate::oauth::{CallbackParams, InitiateError, InitiateRequest};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Initiation response
#[derive(Serialize)]
pub struct InitiateResponse {
    auth_url: String,
}

/// Create OAuth API router
pub fn create_oauth_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/oauth/initiate", post(oauth_initiate))
        .route("/api/oauth/callback", get(oauth_callback))
        .with_state(Arc::new(state))
}

/// POST /api/oauth/initiate
///
/// # Security
/// - Requires bearer token (the token identifies the initiating user)
/// - Redirect URL checked against the allow-list before a nonce is stored
async fn oauth_initiate(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>, AppError> {
    let user_id = extract_bearer_token(&headers)
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

    debug!(
        workspace_id = %request.workspace_id,
        provider = %request.provider,
        "OAuth initiation requested"
    );

    let auth_url = state
        .service
        .initiate(&user_id, &request)
        .map_err(|e| match e {
            InitiateError::InvalidRequest(msg) => AppError::BadRequest(msg),
            InitiateError::UnknownProvider(provider) => {
                AppError::BadRequest(format!("Unknown provider '{}'", provider))
            }
            InitiateError::InvalidRedirect => {
                warn!(redirect_url = %request.redirect_url, "Initiation with disallowed redirect URL");
                AppError::BadRequest("Redirect URL is not allowed".to_string())
            }
            InitiateError::Config(msg) => {
                error!(provider = %request.provider, reason = %msg, "OAuth not configured");
                AppError::ServerError("OAuth is not configured for this provider".to_string())
            }
            InitiateError::Storage(e) => {
                error!(error = %e, "Failed to create OAuth state");
                AppError::ServerError("Failed to start OAuth flow".to_string())
            }
        })?;

    Ok(Json(InitiateResponse { auth_url }))
}

/// GET /api/oauth/callback
///
/// Every outcome, including malformed query strings, is a 302 to the
/// dashboard with an `oauth` flag.
async fn oauth_callback(
    State(state): State<Arc<ApiState>>,
    query: Option<Query<CallbackParams>>,
) -> Response {
    let params = query.map(|Query(params)| params).unwrap_or_default();
    let instruction = state.service.handle_callback(params).await;
    found(&instruction.location)
}

/// 302 Found with a Location header
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            error!(location = %location, "Redirect target is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_params_deserialization() {
        // Success case
        let query = "code=auth_code_123&state=csrf_state_456";
        let callback: CallbackParams = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.code, Some("auth_code_123".to_string()));
        assert_eq!(callback.state, Some("csrf_state_456".to_string()));
        assert_eq!(callback.error, None);

        // Error case
        let query = "error=access_denied&error_description=User+cancelled";
        let callback: CallbackParams = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.error, Some("access_denied".to_string()));
        assert_eq!(callback.error_description, Some("User cancelled".to_string()));
        assert_eq!(callback.code, None);
    }

    #[test]
    fn test_found_response() {
        let response = found("http://localhost:5173/integrations?oauth=success&provider=google");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://localhost:5173/integrations?oauth=success&provider=google"
        );
    }

    #[test]
    fn test_initiate_response_serialization() {
        let response = InitiateResponse {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth?state=x".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"auth_url\""));
    }
}
