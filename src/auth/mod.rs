//! Caller identity for the JSON endpoints.
//!
//! Sessions are verified by the dashboard's gateway before requests reach this
//! service. The bearer token it forwards is the opaque user id that gets bound
//! to each OAuth state and recorded as `connected_by`.

use axum::http::HeaderMap;
use thiserror::Error;


/// Longest accepted user id
const MAX_TOKEN_LEN: usize = 512;

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Parse bearer token from Authorization header value
fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    if token.len() > MAX_TOKEN_LEN || token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(TokenError::InvalidFormat);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Error, Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header not present
    #[error("Authorization token not provided")]
    Missing,
    /// Not "Bearer <token>", or the token has illegal characters
    #[error("Invalid authorization token format")]
    InvalidFormat,
    /// Token is empty string
    #[error("Authorization token is empty")]
    Empty,
}
