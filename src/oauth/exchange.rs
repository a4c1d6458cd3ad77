//! OAuth token exchange and account identity lookup.
//!
//! Provider responses are parsed into fixed shapes at this boundary; a token
//! response without a usable `access_token` is an exchange failure.

use super::provider::{display_name, ProviderConfig};
use crate::credentials::TokenSet;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Result of a successful code exchange
#[derive(Debug)]
pub struct TokenGrant {
    pub tokens: TokenSet,
    /// Access token lifetime in seconds, when reported
    pub expires_in: Option<i64>,
    /// Granted scopes as returned by the provider (delimiter varies)
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

/// Identity endpoint response. Google and Meta both return `id`; OpenID
/// userinfo endpoints return `sub` instead.
#[derive(Deserialize, Debug, Default)]
struct IdentityResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Account identity used for human-readable integration metadata
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderIdentity {
    pub account_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl ProviderIdentity {
    /// Identity used when the provider's identity endpoint cannot be reached
    pub fn placeholder(provider: &str) -> Self {
        Self {
            account_id: None,
            email: None,
            name: Some(format!("{} Account", display_name(provider))),
        }
    }

    /// Name shown in the dashboard: email, then display name
    pub fn account_name(&self) -> Option<String> {
        self.email.clone().or_else(|| self.name.clone())
    }
}

/// Exchange authorization code for access token
///
/// # Arguments
/// * `client` - Shared HTTP client (carries the request timeout)
/// * `provider` - Provider endpoints and client credentials
/// * `code` - Authorization code from callback
/// * `redirect_uri` - Redirect URI used in authorization request
///
/// # Returns
/// * `Ok(TokenGrant)` - Tokens plus expiry and granted scopes
/// * `Err` - Transport failure, timeout, non-2xx status, or unusable body
pub async fn exchange_code_for_token(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenGrant> {
    let form_data = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.as_str()),
    ];

    tracing::debug!(
        provider = %provider.name,
        token_url = %provider.token_url,
        "Exchanging authorization code for token"
    );

    let response = client
        .post(&provider.token_url)
        .header("Accept", "application/json")
        .form(&form_data)
        .send()
        .await
        .context("Failed to send token exchange request")?;

    // Check response status
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        return Err(anyhow!(
            "Token exchange failed with status {}: {}",
            status,
            truncate(&body, 512)
        ));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token response")?;

    if token_response.access_token.trim().is_empty() {
        return Err(anyhow!("Token response contained an empty access_token"));
    }

    tracing::debug!(
        provider = %provider.name,
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Token exchange successful"
    );

    Ok(TokenGrant {
        tokens: TokenSet {
            access_token: token_response.access_token,
            refresh_token: token_response
                .refresh_token
                .filter(|t| !t.trim().is_empty()),
        },
        expires_in: token_response.expires_in,
        scope: token_response.scope,
        token_type: token_response.token_type,
    })
}

/// Fetch the connected account's identity with the new access token.
pub async fn fetch_identity(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    access_token: &str,
) -> Result<ProviderIdentity> {
    let response = client
        .get(&provider.userinfo_url)
        .bearer_auth(access_token)
        .header("Accept", "application/json")
        .send()
        .await
        .context("Failed to send identity request")?;

    if !response.status().is_success() {
        return Err(anyhow!("Identity request failed with status {}", response.status()));
    }

    let identity: IdentityResponse = response
        .json()
        .await
        .context("Failed to parse identity response")?;

    Ok(ProviderIdentity {
        account_id: identity.id.or(identity.sub),
        email: identity.email,
        name: identity.name,
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use crate::oauth::provider::get_provider_config;
    use mockito::{Matcher, Server};

    fn provider(server_url: &str) -> ProviderConfig {
        let settings = ProviderSettings {
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
            token_url: Some(format!("{}/token", server_url)),
            userinfo_url: Some(format!("{}/userinfo", server_url)),
            ..Default::default()
        };
        get_provider_config("google", Some(&settings)).unwrap()
    }

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "ya29.token",
            "refresh_token": "1//refresh",
            "expires_in": 3599,
            "scope": "openid email",
            "token_type": "Bearer"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "ya29.token");
        assert_eq!(response.refresh_token, Some("1//refresh".to_string()));
        assert_eq!(response.expires_in, Some(3599));
        assert_eq!(response.scope.as_deref(), Some("openid email"));
    }

    #[test]
    fn test_token_response_requires_access_token() {
        let json = r#"{"refresh_token": "r", "expires_in": 10}"#;
        assert!(serde_json::from_str::<TokenResponse>(json).is_err());
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "abc".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "csecret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"AT1","refresh_token":"RT1","expires_in":3600,"scope":"a b"}"#)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let grant = exchange_code_for_token(&client, &provider(&server.url()), "abc", "http://cb")
            .await
            .unwrap();

        assert_eq!(grant.tokens.access_token, "AT1");
        assert_eq!(grant.tokens.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(grant.expires_in, Some(3600));
        assert_eq!(grant.scope.as_deref(), Some("a b"));
    }

    #[tokio::test]
    async fn test_exchange_http_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let result = exchange_code_for_token(&client, &provider(&server.url()), "abc", "http://cb").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_exchange_empty_access_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"  "}"#)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let result = exchange_code_for_token(&client, &provider(&server.url()), "abc", "http://cb").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_identity() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/userinfo")
            .match_header("authorization", "Bearer AT1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"1234","email":"ops@example.com","name":"Ops"}"#)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let identity = fetch_identity(&client, &provider(&server.url()), "AT1")
            .await
            .unwrap();

        assert_eq!(identity.account_id.as_deref(), Some("1234"));
        assert_eq!(identity.account_name().as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn test_fetch_identity_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/userinfo")
            .with_status(401)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        assert!(fetch_identity(&client, &provider(&server.url()), "AT1").await.is_err());
    }

    #[test]
    fn test_placeholder_identity() {
        let identity = ProviderIdentity::placeholder("meta");
        assert!(identity.account_id.is_none());
        assert_eq!(identity.account_name().as_deref(), Some("Meta Account"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 3), "ab");
        assert_eq!(truncate("é€x", 2), "é€");
    }
}
