//! Encrypted token rows, kept apart from integration metadata.

use super::{to_timestamp, Store};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// Ciphertext and IVs for one integration's tokens (all base64)
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedTokenRecord {
    pub access_token_encrypted: String,
    pub access_token_iv: String,
    pub refresh_token_encrypted: Option<String>,
    pub refresh_token_iv: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Deletes every token row of the integration, then inserts `record`.
///
/// Callers run this inside a transaction so the integration never ends up with
/// zero rows.
pub(super) fn replace(conn: &Connection, integration_id: &str, record: &EncryptedTokenRecord) -> Result<()> {
    conn.execute(
        "DELETE FROM integration_tokens WHERE integration_id = ?1",
        params![integration_id],
    )
    .context("Failed to delete previous tokens")?;

    conn.execute(
        r#"
        INSERT INTO integration_tokens (
            integration_id,
            access_token_encrypted, access_token_iv,
            refresh_token_encrypted, refresh_token_iv,
            created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            integration_id,
            record.access_token_encrypted,
            record.access_token_iv,
            record.refresh_token_encrypted,
            record.refresh_token_iv,
            to_timestamp(&record.created_at),
        ],
    )
    .context("Failed to insert tokens")?;

    Ok(())
}

impl Store {
    /// Replaces the token rows of an integration in a single transaction.
    pub fn replace_tokens(&self, integration_id: &str, record: &EncryptedTokenRecord) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        replace(&tx, integration_id, record)?;
        tx.commit().context("Failed to commit token replacement")?;
        Ok(())
    }

    /// Retrieves the current token row of an integration.
    pub fn get_tokens(&self, integration_id: &str) -> Result<Option<EncryptedTokenRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT access_token_encrypted, access_token_iv,
                       refresh_token_encrypted, refresh_token_iv,
                       created_at
                FROM integration_tokens
                WHERE integration_id = ?1
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![integration_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query tokens")?;

        row.map(|(access, access_iv, refresh, refresh_iv, created)| -> Result<EncryptedTokenRecord> {
            Ok(EncryptedTokenRecord {
                access_token_encrypted: access,
                access_token_iv: access_iv,
                refresh_token_encrypted: refresh,
                refresh_token_iv: refresh_iv,
                created_at: super::parse_timestamp(&created)?,
            })
        })
        .transpose()
    }

    /// Number of token rows stored for an integration
    pub fn count_tokens(&self, integration_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM integration_tokens WHERE integration_id = ?1",
                params![integration_id],
                |row| row.get(0),
            )
            .context("Failed to count tokens")?;
        Ok(count as usize)
    }
}
