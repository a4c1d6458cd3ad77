// HTTP API
pub mod api;

// Bearer token extraction
pub mod auth;

// Service configuration (TOML + environment)
pub mod config;

// Token encryption at rest
pub mod credentials;

// OAuth flow: state manager, provider exchange, callback orchestration
pub mod oauth;

// Redirect allow-list
pub mod redirect;

// SQLite persistence
pub mod store;
