//! SQLite persistence for nonces, integrations, and encrypted tokens.
//!
//! # Schema
//! ```sql
//! CREATE TABLE oauth_nonces (
//!     nonce TEXT PRIMARY KEY,
//!     workspace_id TEXT NOT NULL,
//!     user_id TEXT NOT NULL,
//!     provider TEXT NOT NULL,
//!     redirect_url TEXT NOT NULL,
//!     created_at TEXT NOT NULL,     -- ISO 8601
//!     expires_at TEXT NOT NULL,     -- ISO 8601
//!     used_at TEXT                  -- set exactly once
//! );
//!
//! CREATE TABLE integrations (
//!     id TEXT PRIMARY KEY,
//!     workspace_id TEXT NOT NULL,
//!     provider TEXT NOT NULL,
//!     status TEXT NOT NULL,
//!     account_id TEXT,
//!     account_name TEXT,
//!     scopes TEXT NOT NULL,         -- JSON array
//!     expires_at TEXT,
//!     last_sync_at TEXT,
//!     metadata TEXT NOT NULL,       -- JSON object
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     UNIQUE(workspace_id, provider)
//! );
//!
//! CREATE TABLE integration_tokens (
//!     id INTEGER PRIMARY KEY,
//!     integration_id TEXT NOT NULL REFERENCES integrations(id),
//!     access_token_encrypted TEXT NOT NULL,
//!     access_token_iv TEXT NOT NULL,
//!     refresh_token_encrypted TEXT,
//!     refresh_token_iv TEXT,
//!     created_at TEXT NOT NULL
//! );
//! ```
//!
//! One connection behind a `Mutex`; every multi-statement write runs in a
//! transaction on that connection.

mod integrations;
mod nonces;
mod tokens;

pub use integrations::{Integration, IntegrationStatus, IntegrationUpsert};
pub use nonces::NonceRecord;
pub use tokens::EncryptedTokenRecord;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS oauth_nonces (
        nonce        TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL,
        user_id      TEXT NOT NULL,
        provider     TEXT NOT NULL,
        redirect_url TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        expires_at   TEXT NOT NULL,
        used_at      TEXT
    );

    CREATE TABLE IF NOT EXISTS integrations (
        id           TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL,
        provider     TEXT NOT NULL,
        status       TEXT NOT NULL,
        account_id   TEXT,
        account_name TEXT,
        scopes       TEXT NOT NULL,
        expires_at   TEXT,
        last_sync_at TEXT,
        metadata     TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        updated_at   TEXT NOT NULL,
        UNIQUE(workspace_id, provider)
    );

    CREATE TABLE IF NOT EXISTS integration_tokens (
        id                      INTEGER PRIMARY KEY,
        integration_id          TEXT NOT NULL REFERENCES integrations(id),
        access_token_encrypted  TEXT NOT NULL,
        access_token_iv         TEXT NOT NULL,
        refresh_token_encrypted TEXT,
        refresh_token_iv        TEXT,
        created_at              TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tokens_integration ON integration_tokens(integration_id);
    CREATE INDEX IF NOT EXISTS idx_nonces_expires ON oauth_nonces(expires_at);
"#;

/// Persistent store backing the OAuth flow.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (or creates) the database and ensures the schema exists.
    ///
    /// Pass `":memory:"` for an in-memory database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection mutex poisoned"))
    }

    /// Upserts the integration and replaces its token rows in one transaction.
    ///
    /// Returns the integration id.
    pub fn save_connection(
        &self,
        integration: &IntegrationUpsert,
        tokens: &EncryptedTokenRecord,
    ) -> Result<String> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let integration_id = integrations::upsert(&tx, integration)?;
        tokens::replace(&tx, &integration_id, tokens)?;

        tx.commit().context("Failed to commit connection")?;
        Ok(integration_id)
    }
}

pub(crate) fn to_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{}'", s))
}

pub(crate) fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_timestamp).transpose()
}
