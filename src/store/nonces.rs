//! OAuth nonce records.

use super::{parse_optional_timestamp, parse_timestamp, to_timestamp, Store};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// One OAuth initiation, bound to its workspace, user, provider, and return URL.
#[derive(Clone, Debug, PartialEq)]
pub struct NonceRecord {
    pub nonce: String,
    pub workspace_id: String,
    pub user_id: String,
    pub provider: String,
    pub redirect_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl Store {
    /// Inserts a new nonce. Fails if the nonce already exists.
    pub fn insert_nonce(&self, record: &NonceRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO oauth_nonces (
                nonce, workspace_id, user_id, provider, redirect_url,
                created_at, expires_at, used_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.nonce,
                record.workspace_id,
                record.user_id,
                record.provider,
                record.redirect_url,
                to_timestamp(&record.created_at),
                to_timestamp(&record.expires_at),
                record.used_at.as_ref().map(to_timestamp),
            ],
        )
        .context("Failed to insert nonce")?;
        Ok(())
    }

    /// Looks up a nonce by value.
    pub fn find_nonce(&self, nonce: &str) -> Result<Option<NonceRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT nonce, workspace_id, user_id, provider, redirect_url,
                       created_at, expires_at, used_at
                FROM oauth_nonces
                WHERE nonce = ?1
                "#,
                params![nonce],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query nonce")?;

        let Some((nonce, workspace_id, user_id, provider, redirect_url, created, expires, used)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(NonceRecord {
            nonce,
            workspace_id,
            user_id,
            provider,
            redirect_url,
            created_at: parse_timestamp(&created)?,
            expires_at: parse_timestamp(&expires)?,
            used_at: parse_optional_timestamp(used)?,
        }))
    }

    /// Atomically marks a nonce as used.
    ///
    /// The update only applies while `used_at IS NULL`, so across any number of
    /// concurrent callers exactly one gets `true`.
    pub fn mark_nonce_used(&self, nonce: &str, used_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE oauth_nonces SET used_at = ?1 WHERE nonce = ?2 AND used_at IS NULL",
                params![to_timestamp(&used_at), nonce],
            )
            .context("Failed to mark nonce used")?;
        Ok(rows == 1)
    }

    /// Deletes nonces that expired before `cutoff`. Returns the number removed.
    pub fn purge_nonces_expired_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        // Stored timestamps have variable sub-second precision and do not sort
        // lexicographically, so compare parsed values.
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT nonce, expires_at FROM oauth_nonces")
            .context("Failed to prepare nonce scan")?;
        let stale = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .context("Failed to scan nonces")?
            .collect::<Result<Vec<(String, String)>, _>>()
            .context("Failed to read nonces")?
            .into_iter()
            .filter(|(_, expires)| {
                parse_timestamp(expires)
                    .map(|e| e < cutoff)
                    .unwrap_or(true)
            })
            .map(|(nonce, _)| nonce)
            .collect::<Vec<_>>();
        drop(stmt);

        let mut removed = 0;
        for nonce in &stale {
            removed += conn
                .execute("DELETE FROM oauth_nonces WHERE nonce = ?1", params![nonce])
                .context("Failed to delete nonce")?;
        }
        Ok(removed)
    }

    /// Number of stored nonces (for monitoring)
    pub fn count_nonces(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM oauth_nonces", [], |row| row.get(0))
            .context("Failed to count nonces")?;
        Ok(count as usize)
    }
}
