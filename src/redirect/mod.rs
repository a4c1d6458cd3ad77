//! Redirect allow-list and final redirect construction.
//!
//! Every application URL the service redirects to must pass [`RedirectPolicy`]:
//! either its origin matches one of the configured origins exactly, or it is an
//! HTTPS URL on a sub-domain of the trusted domain suffix.

use crate::config::RedirectConfig;
use url::Url;

/// Allow-list of redirect targets
#[derive(Clone, Debug)]
pub struct RedirectPolicy {
    allowed_origins: Vec<String>,
    trusted_domain_suffix: Option<String>,
    fallback_url: String,
}

impl RedirectPolicy {
    pub fn new(
        allowed_origins: Vec<String>,
        trusted_domain_suffix: Option<String>,
        fallback_url: String,
    ) -> Self {
        // Normalise configured origins through the same parser used for checks
        let allowed_origins = allowed_origins
            .iter()
            .filter_map(|o| Url::parse(o).ok())
            .map(|u| u.origin().ascii_serialization())
            .collect();

        let trusted_domain_suffix = trusted_domain_suffix
            .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|s| !s.is_empty());

        Self {
            allowed_origins,
            trusted_domain_suffix,
            fallback_url,
        }
    }

    pub fn from_config(config: &RedirectConfig) -> Self {
        Self::new(
            config.allowed_origins.clone(),
            config.trusted_domain_suffix.clone(),
            config.fallback_url.clone(),
        )
    }

    /// Check whether `candidate` may be used as a redirect target.
    pub fn is_allowed(&self, candidate: &str) -> bool {
        let url = match Url::parse(candidate) {
            Ok(url) => url,
            Err(_) => return false,
        };

        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }

        // "https://trusted@evil.com" style URLs
        if !url.username().is_empty() || url.password().is_some() {
            return false;
        }

        let origin = url.origin().ascii_serialization();
        if self.allowed_origins.iter().any(|allowed| *allowed == origin) {
            return true;
        }

        match (&self.trusted_domain_suffix, url.host_str()) {
            (Some(suffix), Some(host)) if url.scheme() == "https" => {
                let host = host.to_ascii_lowercase();
                host == *suffix || host.ends_with(&format!(".{}", suffix))
            }
            _ => false,
        }
    }

    /// Fallback target used when no trusted redirect URL is known
    pub fn fallback_url(&self) -> &str {
        &self.fallback_url
    }
}

/// Append query parameters to `base`, preserving any existing query.
///
/// Falls back to plain string concatenation when `base` is not an absolute
/// URL (e.g. a relative fallback path).
pub fn append_query(base: &str, params: &[(&str, &str)]) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in params {
                    pairs.append_pair(key, value);
                }
            }
            url.to_string()
        }
        Err(_) => {
            let encoded = serde_urlencoded::to_string(params).unwrap_or_default();
            let separator = if base.contains('?') { '&' } else { '?' };
            format!("{}{}{}", base, separator, encoded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RedirectPolicy {
        RedirectPolicy::new(
            vec![
                "https://app.growthhub.io".to_string(),
                "http://localhost:5173".to_string(),
            ],
            Some("lovable.app".to_string()),
            "/integrations".to_string(),
        )
    }

    #[test]
    fn test_exact_origins_allowed() {
        let policy = policy();
        assert!(policy.is_allowed("https://app.growthhub.io/settings/integrations"));
        assert!(policy.is_allowed("http://localhost:5173/"));
        assert!(policy.is_allowed("https://app.growthhub.io"));
    }

    #[test]
    fn test_trusted_suffix_allowed() {
        let policy = policy();
        assert!(policy.is_allowed("https://my-project.lovable.app/dashboard"));
        assert!(policy.is_allowed("https://lovable.app/"));
        assert!(policy.is_allowed("https://a.b.LOVABLE.app/x"));
    }

    #[test]
    fn test_lookalike_origins_rejected() {
        let policy = policy();
        assert!(!policy.is_allowed("evil.com/lovable.app"));
        assert!(!policy.is_allowed("https://evil.com/lovable.app"));
        assert!(!policy.is_allowed("https://lovable.app.evil.com"));
        assert!(!policy.is_allowed("https://evillovable.app/"));
        assert!(!policy.is_allowed("https://lovable.app@evil.com/"));
        assert!(!policy.is_allowed("https://app.growthhub.io.evil.com/"));
        assert!(!policy.is_allowed("https://app.growthhub.io:8443/"));
    }

    #[test]
    fn test_scheme_rules() {
        let policy = policy();
        // Suffix matches require https
        assert!(!policy.is_allowed("http://my-project.lovable.app/"));
        assert!(!policy.is_allowed("javascript:alert(1)"));
        assert!(!policy.is_allowed("ftp://app.growthhub.io/"));
        assert!(!policy.is_allowed(""));
        assert!(!policy.is_allowed("/relative/path"));
    }

    #[test]
    fn test_no_suffix_configured() {
        let policy = RedirectPolicy::new(
            vec!["https://app.growthhub.io".to_string()],
            None,
            "/".to_string(),
        );
        assert!(!policy.is_allowed("https://my-project.lovable.app/"));
        assert!(policy.is_allowed("https://app.growthhub.io/x"));
    }

    #[test]
    fn test_append_query() {
        let url = append_query(
            "https://app.growthhub.io/settings?tab=integrations",
            &[("oauth", "success"), ("provider", "google")],
        );
        assert_eq!(
            url,
            "https://app.growthhub.io/settings?tab=integrations&oauth=success&provider=google"
        );

        let relative = append_query("/integrations", &[("oauth", "error"), ("error_type", "invalid_state")]);
        assert_eq!(relative, "/integrations?oauth=error&error_type=invalid_state");
    }
}
