//! Error types for the OAuth flow.
//!
//! Callback failures are only ever surfaced to the browser as an opaque
//! `error_type` flag; the messages here are for server-side logs.

use thiserror::Error;

/// Nonce/state manager failures
#[derive(Error, Debug)]
pub enum StateError {
    #[error("redirect URL is not allow-listed")]
    InvalidRedirect,

    #[error("state is malformed, unknown, or has a bad signature")]
    InvalidState,

    #[error("state was already consumed")]
    ReplayDetected,

    #[error("state has expired")]
    StateExpired,

    #[error("state storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Initiation failures
#[derive(Error, Debug)]
pub enum InitiateError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("redirect URL is not allow-listed")]
    InvalidRedirect,

    #[error("OAuth is not configured: {0}")]
    Config(String),

    #[error("failed to create state: {0}")]
    Storage(anyhow::Error),
}

impl From<StateError> for InitiateError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::InvalidRedirect => InitiateError::InvalidRedirect,
            StateError::Storage(e) => InitiateError::Storage(e),
            // create_state never yields the consume-side variants
            other => InitiateError::Storage(anyhow::anyhow!(other.to_string())),
        }
    }
}

/// Callback failures, one variant per `error_type` flag
#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("provider reported '{0}'")]
    OAuthDenied(String),

    #[error("callback is missing code or state")]
    MissingParams,

    #[error("server misconfiguration: {0}")]
    Config(String),

    #[error("invalid state")]
    InvalidState,

    #[error("state replay detected")]
    ReplayDetected,

    #[error("state expired")]
    StateExpired,

    #[error("bound redirect URL failed validation")]
    InvalidRedirect,

    #[error("token exchange failed: {0:#}")]
    TokenExchange(anyhow::Error),

    #[error("failed to save integration: {0:#}")]
    Save(anyhow::Error),
}

impl CallbackError {
    /// Value of the `error_type` query flag
    pub fn error_type(&self) -> &'static str {
        match self {
            CallbackError::OAuthDenied(_) => "oauth_denied",
            CallbackError::MissingParams => "missing_params",
            CallbackError::Config(_) => "config_error",
            CallbackError::InvalidState => "invalid_state",
            CallbackError::ReplayDetected => "replay_detected",
            CallbackError::StateExpired => "state_expired",
            CallbackError::InvalidRedirect => "invalid_redirect",
            CallbackError::TokenExchange(_) => "token_exchange_failed",
            CallbackError::Save(_) => "save_failed",
        }
    }
}

impl From<StateError> for CallbackError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::InvalidRedirect => CallbackError::InvalidRedirect,
            StateError::InvalidState => CallbackError::InvalidState,
            StateError::ReplayDetected => CallbackError::ReplayDetected,
            StateError::StateExpired => CallbackError::StateExpired,
            // A nonce that cannot be read cannot be trusted
            StateError::Storage(_) => CallbackError::InvalidState,
        }
    }
}
