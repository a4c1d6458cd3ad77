//! OAuth provider configurations.
//!
//! Defines OAuth 2.0 configuration for each supported identity provider.
//! Endpoints default to the public ones and can be overridden per provider in
//! [`ProviderSettings`].

use crate::config::ProviderSettings;

/// Providers the service knows how to connect
pub const SUPPORTED_PROVIDERS: &[&str] = &["google", "meta"];

/// Request a refresh token and re-prompt so one is issued on reconnect
const GOOGLE_AUTH_PARAMS: &[(&str, &str)] = &[
    ("access_type", "offline"),
    ("prompt", "consent"),
    ("include_granted_scopes", "true"),
];

const NO_AUTH_PARAMS: &[(&str, &str)] = &[];

/// OAuth provider configuration
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub name: String,

    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Account identity endpoint URL (bearer token)
    pub userinfo_url: String,

    /// Requested OAuth scopes
    pub scopes: Vec<String>,

    pub client_id: String,
    pub client_secret: String,

    /// Separator used for the `scope` parameter of the authorization URL
    scope_separator: &'static str,

    /// Provider-specific authorization parameters
    extra_auth_params: &'static [(&'static str, &'static str)],
}

impl ProviderConfig {
    /// Build authorization URL with state and redirect_uri
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let scopes = self.scopes.join(self.scope_separator);
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        );
        for (key, value) in self.extra_auth_params {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }
        url
    }
}

/// Resolve a provider's configuration from its settings.
///
/// Returns `None` for unknown providers and for providers without client
/// credentials.
pub fn get_provider_config(name: &str, settings: Option<&ProviderSettings>) -> Option<ProviderConfig> {
    let settings = settings?;
    if settings.client_id.is_empty() || settings.client_secret.is_empty() {
        return None;
    }

    let (auth_url, token_url, userinfo_url, scopes, scope_separator, extra_auth_params): (
        &str,
        &str,
        &str,
        Vec<&str>,
        &'static str,
        &'static [(&'static str, &'static str)],
    ) = match name {
        "google" => (
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "https://www.googleapis.com/oauth2/v2/userinfo",
            vec![
                "openid",
                "email",
                "https://www.googleapis.com/auth/analytics.readonly",
                "https://www.googleapis.com/auth/adwords",
            ],
            " ",
            GOOGLE_AUTH_PARAMS,
        ),
        "meta" => (
            "https://www.facebook.com/v19.0/dialog/oauth",
            "https://graph.facebook.com/v19.0/oauth/access_token",
            "https://graph.facebook.com/v19.0/me?fields=id,name,email",
            vec!["email", "ads_read", "business_management", "pages_show_list"],
            ",",
            NO_AUTH_PARAMS,
        ),
        _ => return None,
    };

    Some(ProviderConfig {
        name: name.to_string(),
        auth_url: settings.auth_url.clone().unwrap_or_else(|| auth_url.to_string()),
        token_url: settings.token_url.clone().unwrap_or_else(|| token_url.to_string()),
        userinfo_url: settings
            .userinfo_url
            .clone()
            .unwrap_or_else(|| userinfo_url.to_string()),
        scopes: settings
            .scopes
            .clone()
            .unwrap_or_else(|| scopes.into_iter().map(|s| s.to_string()).collect()),
        client_id: settings.client_id.clone(),
        client_secret: settings.client_secret.clone(),
        scope_separator,
        extra_auth_params,
    })
}

/// Check if a provider name is supported
pub fn is_supported(name: &str) -> bool {
    SUPPORTED_PROVIDERS.contains(&name)
}

/// Human-readable provider name, used for placeholder account names
pub fn display_name(name: &str) -> &'static str {
    match name {
        "google" => "Google",
        "meta" => "Meta",
        _ => "Provider",
    }
}

/// Split a granted-scope string into individual scopes.
///
/// Google returns space-delimited scopes; Meta uses commas.
pub fn parse_scopes(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.split(|c: char| c.is_whitespace() || c == ',') {
        if !s.is_empty() && !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}
