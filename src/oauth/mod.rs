//! OAuth 2.0 authorization flow for workspace integrations.
//!
//! Implements the authorization code flow:
//! 1. Dashboard calls POST /api/oauth/initiate with workspace, provider, and
//!    the URL to return to
//! 2. A signed single-use state is persisted and the provider authorization
//!    URL is returned
//! 3. User authorizes on the provider's site
//! 4. Provider redirects to GET /api/oauth/callback
//! 5. State is consumed, code exchanged for tokens, tokens encrypted and the
//!    integration saved in one transaction
//! 6. Browser is redirected back to the dashboard with an outcome flag

mod error;
mod exchange;
mod provider;
mod state_manager;

pub use error::{CallbackError, InitiateError, StateError};
pub use exchange::{ProviderIdentity, TokenGrant};
pub use provider::{is_supported, parse_scopes, ProviderConfig, SUPPORTED_PROVIDERS};
pub use state_manager::{run_nonce_gc, StateContext, StateManager};

use crate::config::ServiceConfig;
use crate::credentials::{self, TokenCipher, TokenSet};
use crate::redirect::{append_query, RedirectPolicy};
use crate::store::{Integration, IntegrationStatus, IntegrationUpsert, Store};
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Body of an initiation request
#[derive(Clone, Debug, Deserialize)]
pub struct InitiateRequest {
    pub workspace_id: String,
    pub provider: String,
    pub redirect_url: String,
}

/// OAuth callback query parameters
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where the callback sends the browser
#[derive(Clone, Debug, PartialEq)]
pub struct RedirectInstruction {
    pub location: String,
    /// `None` on success
    pub error_type: Option<&'static str>,
}

/// Initiation, callback handling, and token access for integrations
pub struct OAuthService {
    store: Arc<Store>,
    policy: RedirectPolicy,
    state_manager: Option<StateManager>,
    cipher: Option<TokenCipher>,
    providers: HashMap<String, ProviderConfig>,
    http: reqwest::Client,
    callback_url: String,
}

impl OAuthService {
    /// Build the service from configuration.
    ///
    /// Missing secrets or provider credentials do not fail startup; the
    /// affected requests report a configuration error instead.
    pub fn new(config: &ServiceConfig, store: Arc<Store>) -> Result<Self> {
        let policy = RedirectPolicy::from_config(&config.redirect);

        let ttl = Duration::try_seconds(config.state.ttl_seconds)
            .ok_or_else(|| anyhow!("State TTL out of range: {}", config.state.ttl_seconds))?;

        let state_manager = match config.secrets.state_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Some(
                StateManager::new(Arc::clone(&store), policy.clone(), secret, ttl)
                    .context("Failed to create state manager")?,
            ),
            _ => {
                warn!("State secret not set, OAuth initiation is disabled");
                None
            }
        };

        let cipher = match config.secrets.encryption_key.as_deref() {
            Some(key) if !key.is_empty() => {
                Some(TokenCipher::from_secret(key).context("Failed to derive token encryption key")?)
            }
            _ => {
                warn!("Encryption key not set, OAuth callbacks cannot store tokens");
                None
            }
        };

        let mut providers = HashMap::new();
        for name in SUPPORTED_PROVIDERS {
            match provider::get_provider_config(name, config.providers.get(*name)) {
                Some(provider_config) => {
                    debug!(provider = %name, "OAuth provider configured");
                    providers.insert(name.to_string(), provider_config);
                }
                None => warn!(provider = %name, "OAuth provider has no client credentials"),
            }
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            store,
            policy,
            state_manager,
            cipher,
            providers,
            http,
            callback_url: config.callback_url(),
        })
    }

    pub fn state_manager(&self) -> Option<&StateManager> {
        self.state_manager.as_ref()
    }

    /// Start an OAuth flow and return the provider authorization URL.
    pub fn initiate(&self, user_id: &str, request: &InitiateRequest) -> Result<String, InitiateError> {
        if request.workspace_id.trim().is_empty() {
            return Err(InitiateError::InvalidRequest("workspace_id is required".to_string()));
        }

        if !is_supported(&request.provider) {
            return Err(InitiateError::UnknownProvider(request.provider.clone()));
        }

        let state_manager = self
            .state_manager
            .as_ref()
            .ok_or_else(|| InitiateError::Config("state secret is not set".to_string()))?;

        if self.cipher.is_none() {
            return Err(InitiateError::Config("encryption key is not set".to_string()));
        }

        let provider_config = self.providers.get(&request.provider).ok_or_else(|| {
            InitiateError::Config(format!(
                "set GROWTH_OAUTH_{}_CLIENT_ID and GROWTH_OAUTH_{}_CLIENT_SECRET",
                request.provider.to_uppercase(),
                request.provider.to_uppercase()
            ))
        })?;

        let state = state_manager.create_state(&StateContext {
            workspace_id: request.workspace_id.clone(),
            user_id: user_id.to_string(),
            provider: request.provider.clone(),
            redirect_url: request.redirect_url.clone(),
        })?;

        info!(
            workspace_id = %request.workspace_id,
            provider = %request.provider,
            user_id = %user_id,
            "OAuth flow initiated"
        );

        Ok(provider_config.build_auth_url(&state, &self.callback_url))
    }

    /// Process a provider callback. Never fails: every outcome is a redirect.
    pub async fn handle_callback(&self, params: CallbackParams) -> RedirectInstruction {
        let mut target: Option<String> = None;

        match self.complete_callback(params, &mut target).await {
            Ok(provider) => RedirectInstruction {
                location: append_query(
                    target.as_deref().unwrap_or(self.policy.fallback_url()),
                    &[("oauth", "success"), ("provider", provider.as_str())],
                ),
                error_type: None,
            },
            Err(err) => {
                let error_type = err.error_type();
                match &err {
                    CallbackError::Config(_)
                    | CallbackError::TokenExchange(_)
                    | CallbackError::Save(_) => {
                        error!(error_type, error = %err, "OAuth callback failed")
                    }
                    _ => warn!(error_type, error = %err, "OAuth callback rejected"),
                }

                RedirectInstruction {
                    location: append_query(
                        target.as_deref().unwrap_or(self.policy.fallback_url()),
                        &[("oauth", "error"), ("error_type", error_type)],
                    ),
                    error_type: Some(error_type),
                }
            }
        }
    }

    /// Runs the callback flow. `target` is set once a trusted redirect URL is
    /// known; returns the connected provider.
    async fn complete_callback(
        &self,
        params: CallbackParams,
        target: &mut Option<String>,
    ) -> Result<String, CallbackError> {
        if let Some(error) = params.error {
            // Burn the nonce so the denied flow cannot be resumed
            if let (Some(state_manager), Some(state)) = (&self.state_manager, params.state.as_deref()) {
                if let Ok(context) = state_manager.consume(state) {
                    if self.policy.is_allowed(&context.redirect_url) {
                        *target = Some(context.redirect_url);
                    }
                }
            }
            debug!(
                error = %error,
                description = ?params.error_description,
                "Provider reported authorization error"
            );
            return Err(CallbackError::OAuthDenied(error));
        }

        let code = params.code.filter(|c| !c.is_empty()).ok_or(CallbackError::MissingParams)?;
        let state = params.state.filter(|s| !s.is_empty()).ok_or(CallbackError::MissingParams)?;

        let state_manager = self
            .state_manager
            .as_ref()
            .ok_or_else(|| CallbackError::Config("state secret is not set".to_string()))?;

        let context = state_manager.consume(&state)?;

        if !self.policy.is_allowed(&context.redirect_url) {
            return Err(CallbackError::InvalidRedirect);
        }
        *target = Some(context.redirect_url.clone());

        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| CallbackError::Config("encryption key is not set".to_string()))?;
        let provider_config = self.providers.get(&context.provider).ok_or_else(|| {
            CallbackError::Config(format!("no client credentials for {}", context.provider))
        })?;

        let grant = exchange::exchange_code_for_token(&self.http, provider_config, &code, &self.callback_url)
            .await
            .map_err(CallbackError::TokenExchange)?;

        let identity = match exchange::fetch_identity(&self.http, provider_config, &grant.tokens.access_token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(provider = %context.provider, error = %e, "Identity lookup failed, using placeholder");
                ProviderIdentity::placeholder(&context.provider)
            }
        };

        let now = Utc::now();
        let expires_at = grant
            .expires_in
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime));

        let scopes = grant
            .scope
            .as_deref()
            .map(parse_scopes)
            .filter(|scopes| !scopes.is_empty())
            .unwrap_or_else(|| provider_config.scopes.clone());

        let upsert = IntegrationUpsert {
            workspace_id: context.workspace_id.clone(),
            provider: context.provider.clone(),
            account_id: identity.account_id.clone(),
            account_name: identity.account_name(),
            scopes,
            expires_at,
            metadata: json!({
                "email": identity.email,
                "token_type": grant.token_type,
                "connected_by": context.user_id,
            }),
            synced_at: now,
        };

        let sealed = credentials::seal(cipher, &grant.tokens, now).map_err(CallbackError::Save)?;
        let integration_id = self
            .store
            .save_connection(&upsert, &sealed)
            .map_err(CallbackError::Save)?;

        info!(
            workspace_id = %context.workspace_id,
            provider = %context.provider,
            integration_id = %integration_id,
            has_refresh_token = grant.tokens.refresh_token.is_some(),
            "OAuth flow completed successfully"
        );

        Ok(context.provider)
    }

    /// Decrypted tokens of an active integration, for sync jobs.
    pub fn load_tokens(&self, workspace_id: &str, provider: &str) -> Result<Option<TokenSet>> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| anyhow!("Encryption key is not set"))?;

        let integration = match self.store.get_integration(workspace_id, provider)? {
            Some(integration) if integration.status == IntegrationStatus::Active => integration,
            _ => return Ok(None),
        };

        self.store
            .get_tokens(&integration.id)?
            .map(|record| credentials::open(cipher, &record))
            .transpose()
    }

    pub fn get_integration(&self, workspace_id: &str, provider: &str) -> Result<Option<Integration>> {
        self.store.get_integration(workspace_id, provider)
    }

    pub fn list_integrations(&self, workspace_id: &str) -> Result<Vec<Integration>> {
        self.store.list_integrations(workspace_id)
    }

    /// Mark the integration inactive and delete its tokens.
    ///
    /// Returns `false` if the workspace never connected the provider.
    pub fn disconnect(&self, workspace_id: &str, provider: &str) -> Result<bool> {
        let disconnected = self
            .store
            .disconnect_integration(workspace_id, provider, Utc::now())?;
        if disconnected {
            info!(workspace_id = %workspace_id, provider = %provider, "Integration disconnected");
        }
        Ok(disconnected)
    }
}
