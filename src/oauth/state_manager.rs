//! OAuth state management for CSRF and replay protection.
//!
//! Each initiation gets a random nonce persisted with its binding context
//! (workspace, user, provider, return URL). The state handed to the provider
//! is the nonce plus an HMAC over that context. On callback the stored record
//! is authoritative: the signature is recomputed from it, and the nonce is
//! flipped to used with a conditional update so only one callback can win.

use super::error::StateError;
use crate::redirect::RedirectPolicy;
use crate::store::{NonceRecord, Store};
use anyhow::anyhow;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Random bytes per nonce (256 bits)
const NONCE_BYTES: usize = 32;

/// What a state is bound to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateContext {
    pub workspace_id: String,
    pub user_id: String,
    pub provider: String,
    pub redirect_url: String,
}

/// Wire form of the state parameter (before base64)
#[derive(Serialize, Deserialize)]
struct SignedStatePayload {
    nonce: String,
    sig: String,
}

/// Canonical representation covered by the HMAC. Field order is fixed.
#[derive(Serialize)]
struct SignedFields<'a> {
    nonce: &'a str,
    workspace_id: &'a str,
    provider: &'a str,
    redirect_url: &'a str,
    user_id: &'a str,
    timestamp: i64,
}

/// Persistent, single-use OAuth state manager
#[derive(Clone)]
pub struct StateManager {
    store: Arc<Store>,
    policy: RedirectPolicy,
    secret: Arc<Vec<u8>>,
    ttl: Duration,
}

impl StateManager {
    /// Create a new state manager
    ///
    /// # Arguments
    /// * `secret` - Server-held HMAC key for signing states
    /// * `ttl` - How long states remain valid (default: 10 minutes)
    pub fn new(
        store: Arc<Store>,
        policy: RedirectPolicy,
        secret: &str,
        ttl: Duration,
    ) -> Result<Self, StateError> {
        if secret.is_empty() {
            return Err(StateError::Storage(anyhow!("State secret must not be empty")));
        }

        Ok(Self {
            store,
            policy,
            secret: Arc::new(secret.as_bytes().to_vec()),
            ttl,
        })
    }

    /// Validate the redirect URL, persist a fresh nonce, and return the signed state.
    pub fn create_state(&self, context: &StateContext) -> Result<String, StateError> {
        if !self.policy.is_allowed(&context.redirect_url) {
            warn!(
                workspace_id = %context.workspace_id,
                provider = %context.provider,
                redirect_url = %context.redirect_url,
                "Rejected redirect URL outside allow-list"
            );
            return Err(StateError::InvalidRedirect);
        }

        let mut bytes = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = URL_SAFE_NO_PAD.encode(bytes);

        let now = Utc::now();
        let expires_at = now.checked_add_signed(self.ttl).ok_or_else(|| {
            StateError::Storage(anyhow!("State TTL exceeds the supported date range"))
        })?;
        let record = NonceRecord {
            nonce: nonce.clone(),
            workspace_id: context.workspace_id.clone(),
            user_id: context.user_id.clone(),
            provider: context.provider.clone(),
            redirect_url: context.redirect_url.clone(),
            created_at: now,
            expires_at,
            used_at: None,
        };
        self.store.insert_nonce(&record)?;

        let sig = self.sign(&record)?;
        let payload = serde_json::to_vec(&SignedStatePayload { nonce, sig: URL_SAFE_NO_PAD.encode(sig) })
            .map_err(|e| StateError::Storage(e.into()))?;

        debug!(
            workspace_id = %context.workspace_id,
            provider = %context.provider,
            expires_at = %record.expires_at,
            "OAuth state created"
        );

        Ok(URL_SAFE_NO_PAD.encode(payload))
    }

    /// Validate and consume a signed state.
    ///
    /// Succeeds at most once per state. Expiry is checked before prior use, so
    /// an expired nonce always yields [`StateError::StateExpired`].
    pub fn consume(&self, signed_state: &str) -> Result<StateContext, StateError> {
        let payload = decode_state(signed_state).ok_or(StateError::InvalidState)?;

        let record = self
            .store
            .find_nonce(&payload.nonce)?
            .ok_or(StateError::InvalidState)?;

        let sig = URL_SAFE_NO_PAD
            .decode(&payload.sig)
            .map_err(|_| StateError::InvalidState)?;
        if !self.verify(&record, &sig)? {
            warn!(
                workspace_id = %record.workspace_id,
                provider = %record.provider,
                "OAuth state signature mismatch"
            );
            return Err(StateError::InvalidState);
        }

        let now = Utc::now();
        if now > record.expires_at {
            // Burn it anyway; the outcome is the same either way
            self.store.mark_nonce_used(&record.nonce, now)?;
            debug!(provider = %record.provider, "OAuth state expired");
            return Err(StateError::StateExpired);
        }

        if record.used_at.is_some() || !self.store.mark_nonce_used(&record.nonce, now)? {
            warn!(
                security_event = "oauth_state_replay",
                workspace_id = %record.workspace_id,
                user_id = %record.user_id,
                provider = %record.provider,
                first_used_at = ?record.used_at,
                "OAuth state replay detected"
            );
            return Err(StateError::ReplayDetected);
        }

        Ok(StateContext {
            workspace_id: record.workspace_id,
            user_id: record.user_id,
            provider: record.provider,
            redirect_url: record.redirect_url,
        })
    }

    /// Delete nonces that expired more than `retention` ago.
    ///
    /// A retention reaching past the earliest representable date keeps
    /// everything.
    pub fn purge_expired(&self, retention: Duration) -> anyhow::Result<usize> {
        match Utc::now().checked_sub_signed(retention) {
            Some(cutoff) => self.store.purge_nonces_expired_before(cutoff),
            None => Ok(0),
        }
    }

    fn mac(&self, record: &NonceRecord) -> Result<HmacSha256, StateError> {
        let fields = SignedFields {
            nonce: &record.nonce,
            workspace_id: &record.workspace_id,
            provider: &record.provider,
            redirect_url: &record.redirect_url,
            user_id: &record.user_id,
            timestamp: signing_timestamp(&record.created_at),
        };
        let canonical = serde_json::to_vec(&fields).map_err(|e| StateError::Storage(e.into()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| StateError::Storage(anyhow!("Invalid HMAC key: {}", e)))?;
        mac.update(&canonical);
        Ok(mac)
    }

    fn sign(&self, record: &NonceRecord) -> Result<Vec<u8>, StateError> {
        Ok(self.mac(record)?.finalize().into_bytes().to_vec())
    }

    fn verify(&self, record: &NonceRecord, sig: &[u8]) -> Result<bool, StateError> {
        // verify_slice compares in constant time
        Ok(self.mac(record)?.verify_slice(sig).is_ok())
    }
}

fn signing_timestamp(created_at: &DateTime<Utc>) -> i64 {
    created_at.timestamp()
}

fn decode_state(signed_state: &str) -> Option<SignedStatePayload> {
    let bytes = URL_SAFE_NO_PAD.decode(signed_state.trim()).ok()?;
    let payload: SignedStatePayload = serde_json::from_slice(&bytes).ok()?;
    if payload.nonce.is_empty() || payload.sig.is_empty() {
        return None;
    }
    Some(payload)
}

/// Background task to periodically purge old nonces
pub async fn run_nonce_gc(manager: StateManager, retention: Duration, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        match manager.purge_expired(retention) {
            Ok(removed) => debug!(removed, "OAuth nonce cleanup complete"),
            Err(e) => warn!(error = %e, "OAuth nonce cleanup failed"),
        }
    }
}
