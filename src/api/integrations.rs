//! Integration status endpoints for the dashboard.
//!
//! Responses carry integration metadata only; tokens never leave the service
//! over HTTP.
//!
//! # Security
//! These handlers only require that a bearer token is present. They do not
//! check that the caller belongs to `workspace_id`; workspace authorization is
//! enforced by the dashboard gateway in front of this service, and the routes
//! must not be exposed without it.

use super::{ApiState, AppError};
use crate::auth::extract_bearer_token;
use crate::oauth::is_supported;
use crate::store::Integration;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::{delete, get},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

/// Response for listing integrations
#[derive(Serialize)]
pub struct ListIntegrationsResponse {
    integrations: Vec<Integration>,
}

/// Response for disconnecting an integration
#[derive(Serialize)]
pub struct DisconnectResponse {
    success: bool,
}

/// Create integrations API router
pub fn create_integrations_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/workspaces/:workspace_id/integrations", get(list_integrations))
        .route(
            "/api/workspaces/:workspace_id/integrations/:provider",
            delete(disconnect_integration),
        )
        .with_state(Arc::new(state))
}

/// GET /api/workspaces/:workspace_id/integrations
///
/// Any bearer token is accepted for any workspace; membership is checked
/// upstream by the gateway.
async fn list_integrations(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(workspace_id): Path<String>,
) -> Result<Json<ListIntegrationsResponse>, AppError> {
    extract_bearer_token(&headers)
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

    let integrations = state.service.list_integrations(&workspace_id).map_err(|e| {
        error!(workspace_id = %workspace_id, error = %e, "Failed to list integrations");
        AppError::ServerError("Failed to list integrations".to_string())
    })?;

    debug!(workspace_id = %workspace_id, count = integrations.len(), "Listed integrations");

    Ok(Json(ListIntegrationsResponse { integrations }))
}

/// DELETE /api/workspaces/:workspace_id/integrations/:provider
///
/// Marks the integration inactive and deletes its stored tokens. Returns 404
/// if the workspace never connected the provider. Like the listing, this
/// relies on the gateway for workspace authorization.
async fn disconnect_integration(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((workspace_id, provider)): Path<(String, String)>,
) -> Result<Json<DisconnectResponse>, AppError> {
    extract_bearer_token(&headers)
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

    if !is_supported(&provider) {
        return Err(AppError::NotFound(format!("Provider '{}' not found", provider)));
    }

    let disconnected = state.service.disconnect(&workspace_id, &provider).map_err(|e| {
        error!(
            workspace_id = %workspace_id,
            provider = %provider,
            error = %e,
            "Failed to disconnect integration"
        );
        AppError::ServerError("Failed to disconnect integration".to_string())
    })?;

    if !disconnected {
        return Err(AppError::NotFound(format!(
            "No integration found for provider '{}'",
            provider
        )));
    }

    Ok(Json(DisconnectResponse { success: true }))
}
