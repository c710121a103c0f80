//! Versioned identity details
//!
//! Owned and contact identities keep every version of their profile details
//! until explicitly pruned. Versions start at 1 and are assigned as
//! `max(existing) + 1`, so "published" and "trusted" can point at different
//! versions of the same identity.

use crate::core_identity::Identity;
use crate::core_ledger::errors::{LedgerError, LedgerResult};
use crate::core_ledger::unit_of_work::UnitOfWork;
use crate::metrics;
use rusqlite::types::ToSql;
use rusqlite::{OptionalExtension, Row};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

/// Which identity a details version belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DetailsScope {
    /// Details of an identity this device owns
    Owned { owner: Identity },
    /// Details of a contact, as seen by `owner`
    Contact { owner: Identity, contact: Identity },
}

impl DetailsScope {
    pub fn owned(owner: Identity) -> Self {
        DetailsScope::Owned { owner }
    }

    pub fn contact(owner: Identity, contact: Identity) -> Self {
        DetailsScope::Contact { owner, contact }
    }

    /// Owning identity of the scope
    pub fn owner(&self) -> &Identity {
        match self {
            DetailsScope::Owned { owner } | DetailsScope::Contact { owner, .. } => owner,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            DetailsScope::Owned { .. } => "owned_identity_details",
            DetailsScope::Contact { .. } => "contact_identity_details",
        }
    }

    fn key_clause(&self) -> &'static str {
        match self {
            DetailsScope::Owned { .. } => "owned_identity = :owner",
            DetailsScope::Contact { .. } => "contact_identity = :contact AND owned_identity = :owner",
        }
    }

    fn key_params(&self) -> Vec<(&'static str, &dyn ToSql)> {
        match self {
            DetailsScope::Owned { owner } => vec![(":owner", owner as &dyn ToSql)],
            DetailsScope::Contact { owner, contact } => vec![
                (":owner", owner as &dyn ToSql),
                (":contact", contact as &dyn ToSql),
            ],
        }
    }
}

impl fmt::Display for DetailsScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailsScope::Owned { owner } => write!(f, "owned:{}", owner),
            DetailsScope::Contact { owner, contact } => write!(f, "contact:{}/{}", owner, contact),
        }
    }
}

/// One version of an identity's details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDetails {
    scope: DetailsScope,
    version: i64,
    serialized_details: String,
    photo_url: Option<String>,
    photo_server_label: Option<String>,
    photo_server_key: Option<Vec<u8>>,
}

/// Column values written by every insert
pub(crate) struct DetailsFields<'a> {
    pub serialized_details: &'a str,
    pub photo_url: Option<&'a str>,
    pub photo_server_label_and_key: Option<(&'a str, &'a [u8])>,
}

const DETAILS_COLUMNS: &str =
    "version, serialized_details, photo_url, photo_server_label, photo_server_key";

impl VersionedDetails {
    pub fn scope(&self) -> &DetailsScope {
        &self.scope
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Opaque serialized payload
    pub fn serialized_details(&self) -> &str {
        &self.serialized_details
    }

    pub fn photo_url(&self) -> Option<&str> {
        self.photo_url.as_deref()
    }

    /// Photo server label and key; always both or neither
    pub fn photo_server_label_and_key(&self) -> Option<(&str, &[u8])> {
        match (&self.photo_server_label, &self.photo_server_key) {
            (Some(label), Some(key)) => Some((label.as_str(), key.as_slice())),
            _ => None,
        }
    }

    fn from_row(scope: &DetailsScope, row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            scope: scope.clone(),
            version: row.get(0)?,
            serialized_details: row.get(1)?,
            photo_url: row.get(2)?,
            photo_server_label: row.get(3)?,
            photo_server_key: row.get(4)?,
        })
    }

    /// Highest stored version, `None` when the scope has none
    pub fn latest_version(uow: &UnitOfWork, scope: &DetailsScope) -> LedgerResult<Option<i64>> {
        let sql = format!("SELECT MAX(version) FROM {} WHERE {}", scope.table(), scope.key_clause());
        let max: Option<i64> =
            uow.connection().query_row(&sql, scope.key_params().as_slice(), |row| row.get(0))?;
        Ok(max)
    }

    /// Insert a row at `version`; shared by create, copy and restore
    pub(crate) fn insert(
        uow: &UnitOfWork,
        scope: &DetailsScope,
        version: i64,
        fields: DetailsFields<'_>,
    ) -> LedgerResult<Self> {
        if version < 1 {
            return Err(LedgerError::InvalidInput(format!(
                "details version must be at least 1, got {}",
                version
            )));
        }

        let (label, key) = match fields.photo_server_label_and_key {
            Some((label, key)) => (Some(label), Some(key)),
            None => (None, None),
        };

        let sql = match scope {
            DetailsScope::Owned { .. } => format!(
                "INSERT INTO owned_identity_details (owned_identity, {}) \
                 VALUES (:owner, :version, :details, :photo_url, :label, :key)",
                DETAILS_COLUMNS
            ),
            DetailsScope::Contact { .. } => format!(
                "INSERT INTO contact_identity_details (contact_identity, owned_identity, {}) \
                 VALUES (:contact, :owner, :version, :details, :photo_url, :label, :key)",
                DETAILS_COLUMNS
            ),
        };

        let mut params = scope.key_params();
        params.push((":version", &version));
        params.push((":details", &fields.serialized_details));
        params.push((":photo_url", &fields.photo_url));
        params.push((":label", &label));
        params.push((":key", &key));

        uow.connection().execute(&sql, params.as_slice())?;
        metrics::record_versions_created(1);
        debug!(scope = %scope, version, "Stored details version");

        Ok(Self {
            scope: scope.clone(),
            version,
            serialized_details: fields.serialized_details.to_string(),
            photo_url: fields.photo_url.map(str::to_string),
            photo_server_label: label.map(str::to_string),
            photo_server_key: key.map(<[u8]>::to_vec),
        })
    }

    fn next_version(uow: &UnitOfWork, scope: &DetailsScope) -> LedgerResult<i64> {
        Ok(Self::latest_version(uow, scope)?.unwrap_or(0) + 1)
    }

    /// Append a new version holding `serialized_details`
    pub fn create(
        uow: &UnitOfWork,
        scope: &DetailsScope,
        serialized_details: &str,
    ) -> LedgerResult<Self> {
        let version = Self::next_version(uow, scope)?;
        Self::insert(
            uow,
            scope,
            version,
            DetailsFields {
                serialized_details,
                photo_url: None,
                photo_server_label_and_key: None,
            },
        )
    }

    /// Duplicate `source_version` as a new version with identical fields
    pub fn copy(uow: &UnitOfWork, scope: &DetailsScope, source_version: i64) -> LedgerResult<Self> {
        let source = Self::get(uow, scope, source_version)?.ok_or_else(|| {
            LedgerError::NotFound(format!("details version {} of {}", source_version, scope))
        })?;

        let version = Self::next_version(uow, scope)?;
        Self::insert(
            uow,
            scope,
            version,
            DetailsFields {
                serialized_details: &source.serialized_details,
                photo_url: source.photo_url.as_deref(),
                photo_server_label_and_key: source.photo_server_label_and_key(),
            },
        )
    }

    /// Load one version
    pub fn get(uow: &UnitOfWork, scope: &DetailsScope, version: i64) -> LedgerResult<Option<Self>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} AND version = :version",
            DETAILS_COLUMNS,
            scope.table(),
            scope.key_clause()
        );
        let mut params = scope.key_params();
        params.push((":version", &version));

        let details = uow
            .connection()
            .query_row(&sql, params.as_slice(), |row| Self::from_row(scope, row))
            .optional()?;
        Ok(details)
    }

    /// Every stored version, ascending
    pub fn get_all(uow: &UnitOfWork, scope: &DetailsScope) -> LedgerResult<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY version",
            DETAILS_COLUMNS,
            scope.table(),
            scope.key_clause()
        );
        let mut stmt = uow.connection().prepare(&sql)?;
        let rows = stmt.query_map(scope.key_params().as_slice(), |row| Self::from_row(scope, row))?;

        let mut versions = Vec::new();
        for row in rows {
            match row {
                Ok(details) => versions.push(details),
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Skipping undecodable details row");
                    metrics::record_row_skipped();
                }
            }
        }
        Ok(versions)
    }

    /// Every photo URL referenced by the owner's own or contact details
    pub fn get_all_photo_urls(uow: &UnitOfWork, owner: &Identity) -> LedgerResult<Vec<String>> {
        let mut stmt = uow.connection().prepare(
            "SELECT photo_url FROM owned_identity_details
                 WHERE owned_identity = ?1 AND photo_url IS NOT NULL
             UNION ALL
             SELECT photo_url FROM contact_identity_details
                 WHERE owned_identity = ?1 AND photo_url IS NOT NULL",
        )?;
        let rows = stmt.query_map([owner], |row| row.get::<_, String>(0))?;

        let mut urls = Vec::new();
        for row in rows {
            match row {
                Ok(url) => urls.push(url),
                Err(e) => {
                    warn!(owner = %owner, error = %e, "Skipping undecodable photo url");
                    metrics::record_row_skipped();
                }
            }
        }
        Ok(urls)
    }

    /// Delete one version; `false` when it did not exist
    pub fn delete(uow: &UnitOfWork, scope: &DetailsScope, version: i64) -> LedgerResult<bool> {
        let sql = format!("DELETE FROM {} WHERE {} AND version = :version", scope.table(), scope.key_clause());
        let mut params = scope.key_params();
        params.push((":version", &version));

        let deleted = uow.connection().execute(&sql, params.as_slice())?;
        if deleted > 0 {
            metrics::record_versions_pruned(deleted as u64);
        }
        Ok(deleted > 0)
    }

    /// Delete every version not in `keep`. Returns the number removed.
    pub fn cleanup(uow: &UnitOfWork, scope: &DetailsScope, keep: &BTreeSet<i64>) -> LedgerResult<usize> {
        let select = format!("SELECT version FROM {} WHERE {}", scope.table(), scope.key_clause());
        let stored: Vec<i64> = {
            let mut stmt = uow.connection().prepare(&select)?;
            let rows = stmt.query_map(scope.key_params().as_slice(), |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let delete = format!("DELETE FROM {} WHERE {} AND version = :version", scope.table(), scope.key_clause());
        let mut removed = 0;
        for version in stored.into_iter().filter(|v| !keep.contains(v)) {
            let mut params = scope.key_params();
            params.push((":version", &version));
            removed += uow.connection().execute(&delete, params.as_slice())?;
        }

        if removed > 0 {
            metrics::record_versions_pruned(removed as u64);
            debug!(scope = %scope, removed, kept = ?keep, "Pruned details versions");
        }
        Ok(removed)
    }

    fn update(&self, uow: &UnitOfWork, assignments: &str, values: &[(&'static str, &dyn ToSql)]) -> LedgerResult<()> {
        let sql = format!(
            "UPDATE {} SET {} WHERE {} AND version = :version",
            self.scope.table(),
            assignments,
            self.scope.key_clause()
        );
        let mut params = self.scope.key_params();
        params.push((":version", &self.version));
        params.extend_from_slice(values);

        let updated = uow.connection().execute(&sql, params.as_slice())?;
        if updated == 0 {
            return Err(LedgerError::NotFound(format!(
                "details version {} of {}",
                self.version, self.scope
            )));
        }
        Ok(())
    }

    /// Replace the payload of this version in place
    pub fn set_payload(&mut self, uow: &UnitOfWork, serialized_details: &str) -> LedgerResult<()> {
        self.update(uow, "serialized_details = :details", &[(":details", &serialized_details)])?;
        self.serialized_details = serialized_details.to_string();
        Ok(())
    }

    /// Set or clear the photo URL, optionally clearing the label/key pair too
    pub fn set_photo_url(
        &mut self,
        uow: &UnitOfWork,
        url: Option<&str>,
        clear_label_and_key: bool,
    ) -> LedgerResult<()> {
        if clear_label_and_key {
            self.update(
                uow,
                "photo_url = :photo_url, photo_server_label = NULL, photo_server_key = NULL",
                &[(":photo_url", &url)],
            )?;
            self.photo_server_label = None;
            self.photo_server_key = None;
        } else {
            self.update(uow, "photo_url = :photo_url", &[(":photo_url", &url)])?;
        }
        self.photo_url = url.map(str::to_string);
        Ok(())
    }

    /// Set or clear the photo server label and key together
    pub fn set_photo_server_label_and_key(
        &mut self,
        uow: &UnitOfWork,
        label_and_key: Option<(&str, &[u8])>,
    ) -> LedgerResult<()> {
        let (label, key) = match label_and_key {
            Some((label, key)) => (Some(label), Some(key)),
            None => (None, None),
        };
        self.update(
            uow,
            "photo_server_label = :label, photo_server_key = :key",
            &[(":label", &label), (":key", &key)],
        )?;
        self.photo_server_label = label.map(str::to_string);
        self.photo_server_key = key.map(<[u8]>::to_vec);
        Ok(())
    }
}
