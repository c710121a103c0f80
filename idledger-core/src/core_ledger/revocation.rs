//! Keycloak revocation records
//!
//! Append-only list of identities a keycloak server reported as revoked.
//! Records are never updated; they leave through [`RevocationRecord::prune`]
//! or with their keycloak server row.

use crate::core_identity::{DecodingError, Identity};
use crate::core_ledger::errors::LedgerResult;
use crate::core_ledger::unit_of_work::UnitOfWork;
use crate::metrics;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Row};
use std::fmt;
use tracing::{debug, info, warn};

/// Why an identity was revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevocationKind {
    LeftOrganization,
    Compromised,
}

impl RevocationKind {
    pub fn code(&self) -> i64 {
        match self {
            RevocationKind::LeftOrganization => 0,
            RevocationKind::Compromised => 1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, DecodingError> {
        match code {
            0 => Ok(RevocationKind::LeftOrganization),
            1 => Ok(RevocationKind::Compromised),
            other => Err(DecodingError::UnknownRevocationKind(other)),
        }
    }
}

impl fmt::Display for RevocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevocationKind::LeftOrganization => write!(f, "left-organization"),
            RevocationKind::Compromised => write!(f, "compromised"),
        }
    }
}

impl ToSql for RevocationKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for RevocationKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        RevocationKind::from_code(value.as_i64()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// One revocation reported by a keycloak server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationRecord {
    row_id: i64,
    owner: Identity,
    server_url: String,
    revoked_identity: Identity,
    kind: RevocationKind,
    revocation_timestamp: i64,
}

const REVOCATION_COLUMNS: &str =
    "row_id, owned_identity, server_url, revoked_identity, revocation_type, revocation_timestamp";

impl RevocationRecord {
    pub fn row_id(&self) -> i64 {
        self.row_id
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn revoked_identity(&self) -> &Identity {
        &self.revoked_identity
    }

    pub fn kind(&self) -> RevocationKind {
        self.kind
    }

    /// Unix millis of the revocation
    pub fn revocation_timestamp(&self) -> i64 {
        self.revocation_timestamp
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: row.get(0)?,
            owner: row.get(1)?,
            server_url: row.get(2)?,
            revoked_identity: row.get(3)?,
            kind: row.get(4)?,
            revocation_timestamp: row.get(5)?,
        })
    }

    /// Append a record; the keycloak server row must exist
    pub fn create(
        uow: &UnitOfWork,
        owner: &Identity,
        server_url: &str,
        revoked_identity: &Identity,
        kind: RevocationKind,
        revocation_timestamp: i64,
    ) -> LedgerResult<Self> {
        let conn = uow.connection();
        conn.execute(
            "INSERT INTO keycloak_revoked_identity
                 (owned_identity, server_url, revoked_identity, revocation_type, revocation_timestamp)
             VALUES (?, ?, ?, ?, ?)",
            params![owner, server_url, revoked_identity, kind, revocation_timestamp],
        )?;
        let row_id = conn.last_insert_rowid();
        debug!(owner = %owner, server = server_url, revoked = %revoked_identity, %kind, "Recorded revocation");

        Ok(Self {
            row_id,
            owner: owner.clone(),
            server_url: server_url.to_string(),
            revoked_identity: revoked_identity.clone(),
            kind,
            revocation_timestamp,
        })
    }

    fn query(uow: &UnitOfWork, sql: &str, params: &[&dyn ToSql], owner: &Identity) -> LedgerResult<Vec<Self>> {
        let mut stmt = uow.connection().prepare(sql)?;
        let rows = stmt.query_map(params, Self::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            match row {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(owner = %owner, error = %e, "Skipping undecodable revocation row");
                    metrics::record_row_skipped();
                }
            }
        }
        Ok(records)
    }

    /// Records of one keycloak server, oldest first
    pub fn get_for_server(uow: &UnitOfWork, owner: &Identity, server_url: &str) -> LedgerResult<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM keycloak_revoked_identity
             WHERE owned_identity = ? AND server_url = ?
             ORDER BY revocation_timestamp, row_id",
            REVOCATION_COLUMNS
        );
        Self::query(uow, &sql, params![owner, server_url], owner)
    }

    /// Records about one revoked identity, oldest first
    pub fn get_for_identity(
        uow: &UnitOfWork,
        owner: &Identity,
        server_url: &str,
        revoked_identity: &Identity,
    ) -> LedgerResult<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM keycloak_revoked_identity
             WHERE owned_identity = ? AND server_url = ? AND revoked_identity = ?
             ORDER BY revocation_timestamp, row_id",
            REVOCATION_COLUMNS
        );
        Self::query(uow, &sql, params![owner, server_url, revoked_identity], owner)
    }

    /// Delete records with `revocation_timestamp < older_than`
    pub fn prune(uow: &UnitOfWork, older_than: i64) -> LedgerResult<usize> {
        let deleted = uow.connection().execute(
            "DELETE FROM keycloak_revoked_identity WHERE revocation_timestamp < ?",
            params![older_than],
        )?;
        if deleted > 0 {
            info!(deleted, older_than, "Pruned revocation records");
        }
        Ok(deleted)
    }
}
