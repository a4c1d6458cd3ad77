//! Integration records: "provider X is connected for workspace Y".
//!
//! These rows are read by every component that needs connection status, so
//! they carry no secret material.

use super::{parse_optional_timestamp, parse_timestamp, to_timestamp, Store};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Connection status of an integration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Active,
    Inactive,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Active => "active",
            IntegrationStatus::Inactive => "inactive",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(IntegrationStatus::Active),
            "inactive" => Ok(IntegrationStatus::Inactive),
            other => Err(anyhow!("Unknown integration status '{}'", other)),
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored integration record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Integration {
    pub id: String,
    pub workspace_id: String,
    pub provider: String,
    pub status: IntegrationStatus,
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values written by a successful OAuth callback
#[derive(Clone, Debug)]
pub struct IntegrationUpsert {
    pub workspace_id: String,
    pub provider: String,
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub synced_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, workspace_id, provider, status, account_id, account_name,
           scopes, expires_at, last_sync_at, metadata, created_at, updated_at
    FROM integrations
"#;

/// Inserts or refreshes the `(workspace_id, provider)` record as active.
///
/// The id of an existing record is kept. Returns the integration id.
pub(super) fn upsert(conn: &Connection, values: &IntegrationUpsert) -> Result<String> {
    let scopes = serde_json::to_string(&values.scopes).context("Failed to encode scopes")?;
    let metadata = serde_json::to_string(&values.metadata).context("Failed to encode metadata")?;
    let now = to_timestamp(&values.synced_at);

    conn.query_row(
        r#"
        INSERT INTO integrations (
            id, workspace_id, provider, status,
            account_id, account_name, scopes, expires_at,
            last_sync_at, metadata, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?9, ?9)
        ON CONFLICT(workspace_id, provider) DO UPDATE SET
            status = excluded.status,
            account_id = excluded.account_id,
            account_name = excluded.account_name,
            scopes = excluded.scopes,
            expires_at = excluded.expires_at,
            last_sync_at = excluded.last_sync_at,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
        params![
            Uuid::now_v7().to_string(),
            values.workspace_id,
            values.provider,
            IntegrationStatus::Active.as_str(),
            values.account_id,
            values.account_name,
            scopes,
            values.expires_at.as_ref().map(to_timestamp),
            now,
            metadata,
        ],
        |row| row.get(0),
    )
    .context("Failed to upsert integration")
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<RawIntegration> {
    Ok(RawIntegration {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        provider: row.get(2)?,
        status: row.get(3)?,
        account_id: row.get(4)?,
        account_name: row.get(5)?,
        scopes: row.get(6)?,
        expires_at: row.get(7)?,
        last_sync_at: row.get(8)?,
        metadata: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Column values as stored, before JSON and timestamp decoding
struct RawIntegration {
    id: String,
    workspace_id: String,
    provider: String,
    status: String,
    account_id: Option<String>,
    account_name: Option<String>,
    scopes: String,
    expires_at: Option<String>,
    last_sync_at: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl RawIntegration {
    fn decode(self) -> Result<Integration> {
        Ok(Integration {
            id: self.id,
            workspace_id: self.workspace_id,
            provider: self.provider,
            status: IntegrationStatus::parse(&self.status)?,
            account_id: self.account_id,
            account_name: self.account_name,
            scopes: serde_json::from_str(&self.scopes).context("Failed to decode scopes")?,
            expires_at: parse_optional_timestamp(self.expires_at)?,
            last_sync_at: parse_optional_timestamp(self.last_sync_at)?,
            metadata: serde_json::from_str(&self.metadata).context("Failed to decode metadata")?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

impl Store {
    /// Inserts or refreshes an integration without touching its tokens.
    pub fn upsert_integration(&self, values: &IntegrationUpsert) -> Result<String> {
        let conn = self.lock()?;
        upsert(&conn, values)
    }

    /// Retrieves the integration for a workspace and provider.
    pub fn get_integration(&self, workspace_id: &str, provider: &str) -> Result<Option<Integration>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{} WHERE workspace_id = ?1 AND provider = ?2", SELECT_COLUMNS),
                params![workspace_id, provider],
                from_row,
            )
            .optional()
            .context("Failed to query integration")?;

        raw.map(RawIntegration::decode).transpose()
    }

    /// Lists all integrations of a workspace, ordered by provider.
    pub fn list_integrations(&self, workspace_id: &str) -> Result<Vec<Integration>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE workspace_id = ?1 ORDER BY provider",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare query")?;

        let raws = stmt
            .query_map(params![workspace_id], from_row)
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read results")?;

        raws.into_iter().map(RawIntegration::decode).collect()
    }

    /// Marks the integration inactive and deletes its token rows.
    ///
    /// Returns `false` when no integration exists for the pair.
    pub fn disconnect_integration(
        &self,
        workspace_id: &str,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM integrations WHERE workspace_id = ?1 AND provider = ?2",
                params![workspace_id, provider],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query integration")?;

        let Some(id) = id else {
            return Ok(false);
        };

        tx.execute(
            "DELETE FROM integration_tokens WHERE integration_id = ?1",
            params![id],
        )
        .context("Failed to delete tokens")?;
        tx.execute(
            "UPDATE integrations SET status = ?1, expires_at = NULL, updated_at = ?2 WHERE id = ?3",
            params![IntegrationStatus::Inactive.as_str(), to_timestamp(&now), id],
        )
        .context("Failed to deactivate integration")?;

        tx.commit().context("Failed to commit disconnect")?;
        Ok(true)
    }
}
