//! Service configuration.
//!
//! Non-secret settings come from an optional TOML file; secrets and provider
//! client credentials come from environment variables. The resulting
//! [`ServiceConfig`] is built once at startup and injected into the state
//! manager and the OAuth service.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

/// Complete service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redirect: RedirectConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    /// Client credentials keyed by provider name ("google", "meta")
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
}

/// Listener and persistence settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Public base URL of this service; the OAuth callback lives under it
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_path() -> String {
    "growth_connect.db".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database_path: default_database_path(),
            public_base_url: default_public_base_url(),
        }
    }
}

/// Allow-list of application origins that may receive redirects
#[derive(Debug, Clone, Deserialize)]
pub struct RedirectConfig {
    /// Exact origins, e.g. "https://app.example.com" or "http://localhost:5173"
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Trusted domain whose HTTPS sub-domains are accepted, e.g. "lovable.app"
    #[serde(default = "default_trusted_domain_suffix")]
    pub trusted_domain_suffix: Option<String>,
    /// Where the callback sends users when no trusted redirect URL is known
    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:8080".to_string(),
    ]
}

fn default_trusted_domain_suffix() -> Option<String> {
    Some("lovable.app".to_string())
}

fn default_fallback_url() -> String {
    "http://localhost:5173/integrations".to_string()
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            trusted_domain_suffix: default_trusted_domain_suffix(),
            fallback_url: default_fallback_url(),
        }
    }
}

/// Nonce lifetime and garbage collection
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_ttl")]
    pub ttl_seconds: i64,
    /// How long consumed or expired nonces are kept for replay detection
    #[serde(default = "default_retention")]
    pub retention_seconds: i64,
    #[serde(default = "default_gc_interval")]
    pub gc_interval_seconds: u64,
}

fn default_state_ttl() -> i64 {
    600
}

fn default_retention() -> i64 {
    86_400
}

fn default_gc_interval() -> u64 {
    3_600
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_state_ttl(),
            retention_seconds: default_retention(),
            gc_interval_seconds: default_gc_interval(),
        }
    }
}

/// Outbound HTTP client settings (provider calls)
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    15
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
        }
    }
}

/// Server-held secrets. Never read from the TOML file in production; populated
/// from the environment by [`ServiceConfig::apply_env`].
#[derive(Clone, Default, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub state_secret: Option<String>,
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("state_secret", &self.state_secret.as_ref().map(|_| "<redacted>"))
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// OAuth client credentials for one provider, plus optional endpoint
/// overrides (staging tenants, API version pinning, tests)
#[derive(Clone, Default, Deserialize)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub userinfo_url: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redirect: RedirectConfig::default(),
            state: StateConfig::default(),
            http: HttpConfig::default(),
            secrets: SecretsConfig::default(),
            providers: HashMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Load from `GROWTH_CONFIG` (if set) and then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("GROWTH_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values from an environment lookup.
    ///
    /// Takes the lookup as a closure so tests can feed a fake environment.
    pub fn apply_env<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("GROWTH_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = get("GROWTH_DATABASE_PATH") {
            self.server.database_path = v;
        }
        if let Some(v) = get("GROWTH_PUBLIC_BASE_URL") {
            self.server.public_base_url = v;
        }
        if let Some(v) = get("GROWTH_FALLBACK_URL") {
            self.redirect.fallback_url = v;
        }
        if let Some(v) = get("GROWTH_ALLOWED_ORIGINS") {
            self.redirect.allowed_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("GROWTH_STATE_TTL_SECONDS") {
            match v.parse::<i64>() {
                Ok(n) => self.state.ttl_seconds = n,
                Err(_) => warn!(
                    value = %v,
                    default = self.state.ttl_seconds,
                    "Ignoring invalid GROWTH_STATE_TTL_SECONDS"
                ),
            }
        }
        if let Some(v) = get("GROWTH_HTTP_TIMEOUT_SECONDS") {
            match v.parse::<u64>() {
                Ok(n) => self.http.timeout_seconds = n,
                Err(_) => warn!(
                    value = %v,
                    default = self.http.timeout_seconds,
                    "Ignoring invalid GROWTH_HTTP_TIMEOUT_SECONDS"
                ),
            }
        }
        if let Some(v) = get("GROWTH_STATE_SECRET") {
            self.secrets.state_secret = Some(v);
        }
        if let Some(v) = get("GROWTH_ENCRYPTION_KEY") {
            self.secrets.encryption_key = Some(v);
        }

        for provider in crate::oauth::SUPPORTED_PROVIDERS {
            let prefix = provider.to_uppercase();
            let client_id = get(&format!("GROWTH_OAUTH_{}_CLIENT_ID", prefix));
            let client_secret = get(&format!("GROWTH_OAUTH_{}_CLIENT_SECRET", prefix));
            if let (Some(client_id), Some(client_secret)) = (client_id, client_secret) {
                let settings = self.providers.entry(provider.to_string()).or_default();
                settings.client_id = client_id;
                settings.client_secret = client_secret;
            }
        }
    }

    /// Absolute URL of the OAuth callback endpoint
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/oauth/callback",
            self.server.public_base_url.trim_end_matches('/')
        )
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<ServiceConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: ServiceConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
