//! AES-256-GCM encryption for provider tokens.
//!
//! The cipher key is derived from the configured secret with
//! PBKDF2-HMAC-SHA256 (fixed application salt, 100,000 iterations). Every
//! encryption call draws a fresh 96-bit IV.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::Sha256;

/// Size of the derived key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the IV in bytes (96 bits, standard for GCM)
const IV_SIZE: usize = 12;

/// Salt for key derivation. Changing it invalidates every stored token.
const KDF_SALT: &[u8] = b"growth-connect/integration-tokens/v1";

/// PBKDF2 iteration count. Must match whatever decrypts the stored tokens.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Symmetric cipher for token values.
///
/// Holds only the derived key; the raw secret is not retained.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(<derived key>)")
    }
}

/// Derives the 256-bit cipher key from the configured secret.
pub fn derive_key(secret: &str) -> Result<[u8; KEY_SIZE]> {
    if secret.is_empty() {
        return Err(anyhow!("Encryption secret must not be empty"));
    }

    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
    Ok(key)
}

impl TokenCipher {
    /// Builds a cipher from the configured secret (PBKDF2-derived key).
    pub fn from_secret(secret: &str) -> Result<Self> {
        let key = derive_key(secret)?;
        Self::from_key(&key)
    }

    /// Builds a cipher from an already derived 32-byte key.
    pub fn from_key(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        Ok(Self { cipher })
    }

    /// Encrypts plaintext with a random IV.
    ///
    /// # Returns
    /// * `Ok((ciphertext, iv))` - Encrypted data (tag appended) and the IV used,
    ///   both base64-encoded
    pub fn encrypt(&self, plaintext: &str) -> Result<(String, String)> {
        // Fresh IV per call, never shared between fields
        let iv = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&iv, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok((BASE64.encode(&ciphertext), BASE64.encode(iv)))
    }

    /// Decrypts base64 ciphertext with its stored IV.
    ///
    /// Fails on a wrong key, wrong IV, or any tampering; never returns
    /// unauthenticated plaintext.
    pub fn decrypt(&self, ciphertext: &str, iv: &str) -> Result<String> {
        let ciphertext_bytes = BASE64
            .decode(ciphertext)
            .context("Failed to decode ciphertext")?;
        let iv_bytes = BASE64.decode(iv).context("Failed to decode IV")?;

        if iv_bytes.len() != IV_SIZE {
            return Err(anyhow!(
                "Invalid IV size: expected {}, got {}",
                IV_SIZE,
                iv_bytes.len()
            ));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv_bytes), ciphertext_bytes.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }
}
