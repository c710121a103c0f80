//! Parent rows of the ledger
//!
//! Owned identities, contacts, contact groups and keycloak servers. Details,
//! pre-keys, memberships and revocation records all hang off these rows and
//! disappear with them through `ON DELETE CASCADE`.

use crate::core_identity::{GroupUid, Identity};
use crate::core_ledger::details::{DetailsScope, VersionedDetails};
use crate::core_ledger::errors::{LedgerError, LedgerResult};
use crate::core_ledger::unit_of_work::UnitOfWork;
use crate::metrics;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

fn check_version(version: i64) -> LedgerResult<()> {
    if version < 0 {
        return Err(LedgerError::InvalidInput(format!("negative details version {}", version)));
    }
    Ok(())
}

/// Versions to keep, ignoring the "no details yet" marker 0
fn referenced(versions: &[i64]) -> BTreeSet<i64> {
    versions.iter().copied().filter(|v| *v > 0).collect()
}

/// An identity whose private key lives on this device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedIdentity {
    identity: Identity,
    published_details_version: i64,
    latest_details_version: i64,
}

impl OwnedIdentity {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Version currently published to contacts, 0 when none
    pub fn published_details_version(&self) -> i64 {
        self.published_details_version
    }

    /// Latest local draft version, 0 when none
    pub fn latest_details_version(&self) -> i64 {
        self.latest_details_version
    }

    pub fn create(uow: &UnitOfWork, identity: &Identity) -> LedgerResult<Self> {
        uow.connection()
            .execute("INSERT INTO owned_identity (identity) VALUES (?)", params![identity])?;
        info!(owner = %identity, "Created owned identity");
        Ok(Self {
            identity: identity.clone(),
            published_details_version: 0,
            latest_details_version: 0,
        })
    }

    pub fn get(uow: &UnitOfWork, identity: &Identity) -> LedgerResult<Option<Self>> {
        let owned = uow
            .connection()
            .query_row(
                "SELECT identity, published_details_version, latest_details_version
                 FROM owned_identity WHERE identity = ?",
                params![identity],
                |row| {
                    Ok(Self {
                        identity: row.get(0)?,
                        published_details_version: row.get(1)?,
                        latest_details_version: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(owned)
    }

    /// Every owned identity, skipping rows that fail to decode
    pub fn get_all(uow: &UnitOfWork) -> LedgerResult<Vec<Self>> {
        let mut stmt = uow.connection().prepare(
            "SELECT identity, published_details_version, latest_details_version
             FROM owned_identity",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Self {
                identity: row.get(0)?,
                published_details_version: row.get(1)?,
                latest_details_version: row.get(2)?,
            })
        })?;

        let mut owned = Vec::new();
        for row in rows {
            match row {
                Ok(identity) => owned.push(identity),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable owned identity row");
                    metrics::record_row_skipped();
                }
            }
        }
        Ok(owned)
    }

    /// Delete the identity together with everything it owns. Its own details
    /// have no foreign key and are removed explicitly.
    pub fn delete(uow: &UnitOfWork, identity: &Identity) -> LedgerResult<bool> {
        let conn = uow.connection();
        conn.execute(
            "DELETE FROM owned_identity_details WHERE owned_identity = ?",
            params![identity],
        )?;
        conn.execute(
            "DELETE FROM contact_identity_details WHERE owned_identity = ?",
            params![identity],
        )?;
        let deleted = conn.execute("DELETE FROM owned_identity WHERE identity = ?", params![identity])?;
        if deleted > 0 {
            info!(owner = %identity, "Deleted owned identity");
        }
        Ok(deleted > 0)
    }

    fn update_version(&self, uow: &UnitOfWork, column: &str, version: i64) -> LedgerResult<()> {
        let updated = uow.connection().execute(
            &format!("UPDATE owned_identity SET {} = ? WHERE identity = ?", column),
            params![version, &self.identity],
        )?;
        if updated == 0 {
            return Err(LedgerError::NotFound(format!("owned identity {}", self.identity)));
        }
        Ok(())
    }

    pub fn set_published_version(&mut self, uow: &UnitOfWork, version: i64) -> LedgerResult<()> {
        check_version(version)?;
        self.update_version(uow, "published_details_version", version)?;
        self.published_details_version = version;
        Ok(())
    }

    pub fn set_latest_version(&mut self, uow: &UnitOfWork, version: i64) -> LedgerResult<()> {
        check_version(version)?;
        self.update_version(uow, "latest_details_version", version)?;
        self.latest_details_version = version;
        Ok(())
    }

    /// Prune every details version other than the published and latest ones
    pub fn retire_unreferenced_details(&self, uow: &UnitOfWork) -> LedgerResult<usize> {
        let keep = referenced(&[self.published_details_version, self.latest_details_version]);
        VersionedDetails::cleanup(uow, &DetailsScope::owned(self.identity.clone()), &keep)
    }
}

/// A contact as known by one owned identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactIdentity {
    contact: Identity,
    owner: Identity,
    published_details_version: i64,
    trusted_details_version: i64,
}

impl ContactIdentity {
    pub fn contact(&self) -> &Identity {
        &self.contact
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    /// Latest version the contact published
    pub fn published_details_version(&self) -> i64 {
        self.published_details_version
    }

    /// Version the owner accepted
    pub fn trusted_details_version(&self) -> i64 {
        self.trusted_details_version
    }

    pub(crate) fn from_columns(
        contact: Identity,
        owner: Identity,
        published_details_version: i64,
        trusted_details_version: i64,
    ) -> Self {
        Self {
            contact,
            owner,
            published_details_version,
            trusted_details_version,
        }
    }

    fn scope(&self) -> DetailsScope {
        DetailsScope::contact(self.owner.clone(), self.contact.clone())
    }

    pub fn create(uow: &UnitOfWork, owner: &Identity, contact: &Identity) -> LedgerResult<Self> {
        uow.connection().execute(
            "INSERT INTO contact_identity (contact_identity, owned_identity) VALUES (?, ?)",
            params![contact, owner],
        )?;
        debug!(owner = %owner, contact = %contact, "Created contact identity");
        Ok(Self {
            contact: contact.clone(),
            owner: owner.clone(),
            published_details_version: 0,
            trusted_details_version: 0,
        })
    }

    pub fn get(uow: &UnitOfWork, owner: &Identity, contact: &Identity) -> LedgerResult<Option<Self>> {
        let found = uow
            .connection()
            .query_row(
                "SELECT published_details_version, trusted_details_version
                 FROM contact_identity WHERE contact_identity = ? AND owned_identity = ?",
                params![contact, owner],
                |row| {
                    Ok(Self {
                        contact: contact.clone(),
                        owner: owner.clone(),
                        published_details_version: row.get(0)?,
                        trusted_details_version: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    /// Delete the contact; its group memberships cascade, its details are
    /// removed explicitly.
    pub fn delete(uow: &UnitOfWork, owner: &Identity, contact: &Identity) -> LedgerResult<bool> {
        let conn = uow.connection();
        conn.execute(
            "DELETE FROM contact_identity_details WHERE contact_identity = ? AND owned_identity = ?",
            params![contact, owner],
        )?;
        let deleted = conn.execute(
            "DELETE FROM contact_identity WHERE contact_identity = ? AND owned_identity = ?",
            params![contact, owner],
        )?;
        Ok(deleted > 0)
    }

    fn update_versions(&self, uow: &UnitOfWork, published: i64, trusted: i64) -> LedgerResult<()> {
        let updated = uow.connection().execute(
            "UPDATE contact_identity SET published_details_version = ?, trusted_details_version = ?
             WHERE contact_identity = ? AND owned_identity = ?",
            params![published, trusted, &self.contact, &self.owner],
        )?;
        if updated == 0 {
            return Err(LedgerError::NotFound(format!(
                "contact identity {} of {}",
                self.contact, self.owner
            )));
        }
        Ok(())
    }

    pub fn set_published_version(&mut self, uow: &UnitOfWork, version: i64) -> LedgerResult<()> {
        check_version(version)?;
        self.update_versions(uow, version, self.trusted_details_version)?;
        self.published_details_version = version;
        Ok(())
    }

    pub fn set_trusted_version(&mut self, uow: &UnitOfWork, version: i64) -> LedgerResult<()> {
        check_version(version)?;
        self.update_versions(uow, self.published_details_version, version)?;
        self.trusted_details_version = version;
        Ok(())
    }

    /// Accept the published details: trusted catches up with published and
    /// every other version is pruned. Returns the number of versions removed.
    pub fn trust_published_details(&mut self, uow: &UnitOfWork) -> LedgerResult<usize> {
        let published = self.published_details_version;
        self.update_versions(uow, published, published)?;
        let removed = VersionedDetails::cleanup(uow, &self.scope(), &referenced(&[published]))?;
        self.trusted_details_version = published;
        Ok(removed)
    }

    /// Prune every details version other than the published and trusted ones
    pub fn retire_unreferenced_details(&self, uow: &UnitOfWork) -> LedgerResult<usize> {
        let keep = referenced(&[self.published_details_version, self.trusted_details_version]);
        VersionedDetails::cleanup(uow, &self.scope(), &keep)
    }
}

/// Contact group owned by one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactGroup {
    group_uid: GroupUid,
    owner: Identity,
    created_at: i64,
}

impl ContactGroup {
    pub fn group_uid(&self) -> &GroupUid {
        &self.group_uid
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    /// Creation time, unix millis
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub(crate) fn from_columns(group_uid: GroupUid, owner: Identity, created_at: i64) -> Self {
        Self { group_uid, owner, created_at }
    }

    pub fn create(
        uow: &UnitOfWork,
        group_uid: &GroupUid,
        owner: &Identity,
        created_at: i64,
    ) -> LedgerResult<Self> {
        uow.connection().execute(
            "INSERT INTO contact_group (group_uid, owned_identity, created_at) VALUES (?, ?, ?)",
            params![group_uid, owner, created_at],
        )?;
        debug!(owner = %owner, group = %group_uid, "Created contact group");
        Ok(Self {
            group_uid: *group_uid,
            owner: owner.clone(),
            created_at,
        })
    }

    pub fn get(uow: &UnitOfWork, group_uid: &GroupUid, owner: &Identity) -> LedgerResult<Option<Self>> {
        let found = uow
            .connection()
            .query_row(
                "SELECT created_at FROM contact_group WHERE group_uid = ? AND owned_identity = ?",
                params![group_uid, owner],
                |row| {
                    Ok(Self {
                        group_uid: *group_uid,
                        owner: owner.clone(),
                        created_at: row.get(0)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    /// Delete the group; its membership rows cascade without notifications
    pub fn delete(uow: &UnitOfWork, group_uid: &GroupUid, owner: &Identity) -> LedgerResult<bool> {
        let deleted = uow.connection().execute(
            "DELETE FROM contact_group WHERE group_uid = ? AND owned_identity = ?",
            params![group_uid, owner],
        )?;
        Ok(deleted > 0)
    }
}

/// Keycloak server an owned identity is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeycloakServer {
    server_url: String,
    owner: Identity,
}

impl KeycloakServer {
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn create(uow: &UnitOfWork, owner: &Identity, server_url: &str) -> LedgerResult<Self> {
        if server_url.is_empty() {
            return Err(LedgerError::InvalidInput("empty keycloak server url".to_string()));
        }
        uow.connection().execute(
            "INSERT INTO keycloak_server (server_url, owned_identity) VALUES (?, ?)",
            params![server_url, owner],
        )?;
        Ok(Self {
            server_url: server_url.to_string(),
            owner: owner.clone(),
        })
    }

    pub fn get(uow: &UnitOfWork, owner: &Identity, server_url: &str) -> LedgerResult<Option<Self>> {
        let exists = uow
            .connection()
            .query_row(
                "SELECT 1 FROM keycloak_server WHERE server_url = ? AND owned_identity = ?",
                params![server_url, owner],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.map(|_| Self {
            server_url: server_url.to_string(),
            owner: owner.clone(),
        }))
    }

    /// Delete the server; its revocation records cascade
    pub fn delete(uow: &UnitOfWork, owner: &Identity, server_url: &str) -> LedgerResult<bool> {
        let deleted = uow.connection().execute(
            "DELETE FROM keycloak_server WHERE server_url = ? AND owned_identity = ?",
            params![server_url, owner],
        )?;
        Ok(deleted > 0)
    }
}
