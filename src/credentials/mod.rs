//! Encryption of provider tokens at rest.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       OAuth callback                     │
//! │  - TokenSet from the provider            │
//! └─────────────────────────────────────────┘
//!          ↓ seal                ↑ open (sync jobs)
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - PBKDF2-derived AES-256-GCM key        │
//! │  - Fresh IV per field                    │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       integration_tokens table           │
//! │  - Ciphertext + IV only                  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - Plaintext tokens are never written to the store
//! - Access and refresh tokens each get their own IV
//! - Authenticated encryption (tampering detected on open)

use crate::store::EncryptedTokenRecord;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

mod encryption;

pub use encryption::{derive_key, TokenCipher, KDF_ITERATIONS};

/// Tokens issued by a provider.
///
/// Only ever held in memory; see [`seal`] for the stored form.
#[derive(Clone, PartialEq)]
pub struct TokenSet {
    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token, when the provider issues one
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Encrypts a token set into its stored form.
pub fn seal(cipher: &TokenCipher, tokens: &TokenSet, now: DateTime<Utc>) -> Result<EncryptedTokenRecord> {
    let (access_token_encrypted, access_token_iv) = cipher
        .encrypt(&tokens.access_token)
        .context("Failed to encrypt access token")?;

    // Separate encrypt call, separate IV
    let (refresh_token_encrypted, refresh_token_iv) = match &tokens.refresh_token {
        Some(token) => {
            let (encrypted, iv) = cipher
                .encrypt(token)
                .context("Failed to encrypt refresh token")?;
            (Some(encrypted), Some(iv))
        }
        None => (None, None),
    };

    Ok(EncryptedTokenRecord {
        access_token_encrypted,
        access_token_iv,
        refresh_token_encrypted,
        refresh_token_iv,
        created_at: now,
    })
}

/// Decrypts a stored record back into a token set.
pub fn open(cipher: &TokenCipher, record: &EncryptedTokenRecord) -> Result<TokenSet> {
    let access_token = cipher
        .decrypt(&record.access_token_encrypted, &record.access_token_iv)
        .context("Failed to decrypt access token")?;

    let refresh_token = match (&record.refresh_token_encrypted, &record.refresh_token_iv) {
        (Some(encrypted), Some(iv)) => Some(
            cipher
                .decrypt(encrypted, iv)
                .context("Failed to decrypt refresh token")?,
        ),
        (None, None) => None,
        _ => return Err(anyhow!("Refresh token ciphertext and IV must be stored together")),
    };

    Ok(TokenSet {
        access_token,
        refresh_token,
    })
}
