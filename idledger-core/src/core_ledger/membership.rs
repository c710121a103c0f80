//! Group membership join
//!
//! A membership row references both its contact group and its contact
//! identity with `ON DELETE CASCADE`. Only explicit [`GroupMembership::add`]
//! and [`GroupMembership::remove`] calls queue notifications; rows removed by
//! a cascade or by [`GroupMembership::delete_orphans`] disappear silently.

use crate::core_identity::{GroupUid, Identity};
use crate::core_ledger::dispatcher::{ChangeMask, HookKey};
use crate::core_ledger::entities::{ContactGroup, ContactIdentity};
use crate::core_ledger::errors::LedgerResult;
use crate::core_ledger::unit_of_work::UnitOfWork;
use crate::metrics;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, warn};

/// Membership of one contact in one group of an owned identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    group_uid: GroupUid,
    owner: Identity,
    member: Identity,
}

/// Collect a bulk read, skipping rows that fail to decode
fn collect_skipping<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &'static str,
    owner: &Identity,
) -> Vec<T> {
    let mut items = Vec::new();
    for row in rows {
        match row {
            Ok(item) => items.push(item),
            Err(e) => {
                warn!(owner = %owner, error = %e, "Skipping undecodable {} row", what);
                metrics::record_row_skipped();
            }
        }
    }
    items
}

impl GroupMembership {
    pub fn group_uid(&self) -> &GroupUid {
        &self.group_uid
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn member(&self) -> &Identity {
        &self.member
    }

    fn hook_key(&self) -> HookKey {
        HookKey::GroupMember {
            group_uid: self.group_uid,
            owner: self.owner.clone(),
            member: self.member.clone(),
        }
    }

    /// Insert the membership; `group-member-added` fires when `uow` commits
    pub fn add(
        uow: &mut UnitOfWork,
        group_uid: &GroupUid,
        owner: &Identity,
        member: &Identity,
    ) -> LedgerResult<Self> {
        uow.connection().execute(
            "INSERT INTO contact_group_members_join (group_uid, owned_identity, contact_identity)
             VALUES (?, ?, ?)",
            params![group_uid, owner, member],
        )?;

        let membership = Self {
            group_uid: *group_uid,
            owner: owner.clone(),
            member: member.clone(),
        };
        uow.register(membership.hook_key(), ChangeMask::ADDED);
        debug!(owner = %owner, group = %group_uid, member = %member, "Added group member");
        Ok(membership)
    }

    /// Delete the membership; `group-member-removed` fires when `uow`
    /// commits. Returns `false`, with nothing queued, when no row existed.
    pub fn remove(
        uow: &mut UnitOfWork,
        group_uid: &GroupUid,
        owner: &Identity,
        member: &Identity,
    ) -> LedgerResult<bool> {
        let deleted = uow.connection().execute(
            "DELETE FROM contact_group_members_join
             WHERE group_uid = ? AND owned_identity = ? AND contact_identity = ?",
            params![group_uid, owner, member],
        )?;
        if deleted == 0 {
            return Ok(false);
        }

        let key = HookKey::GroupMember {
            group_uid: *group_uid,
            owner: owner.clone(),
            member: member.clone(),
        };
        uow.register(key, ChangeMask::REMOVED);
        debug!(owner = %owner, group = %group_uid, member = %member, "Removed group member");
        Ok(true)
    }

    pub fn get(
        uow: &UnitOfWork,
        group_uid: &GroupUid,
        owner: &Identity,
        member: &Identity,
    ) -> LedgerResult<Option<Self>> {
        let found = uow
            .connection()
            .query_row(
                "SELECT 1 FROM contact_group_members_join
                 WHERE group_uid = ? AND owned_identity = ? AND contact_identity = ?",
                params![group_uid, owner, member],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.map(|_| Self {
            group_uid: *group_uid,
            owner: owner.clone(),
            member: member.clone(),
        }))
    }

    /// Remove join rows whose group or contact no longer exists. Silent.
    pub fn delete_orphans(uow: &UnitOfWork) -> LedgerResult<usize> {
        let deleted = uow.connection().execute(
            "DELETE FROM contact_group_members_join
             WHERE NOT EXISTS (
                 SELECT 1 FROM contact_group g
                 WHERE g.group_uid = contact_group_members_join.group_uid
                   AND g.owned_identity = contact_group_members_join.owned_identity)
             OR NOT EXISTS (
                 SELECT 1 FROM contact_identity c
                 WHERE c.contact_identity = contact_group_members_join.contact_identity
                   AND c.owned_identity = contact_group_members_join.owned_identity)",
            [],
        )?;
        if deleted > 0 {
            info!(deleted, "Deleted orphaned group memberships");
        }
        Ok(deleted)
    }

    /// Every membership row of a group
    pub fn get_all_in_group(
        uow: &UnitOfWork,
        group_uid: &GroupUid,
        owner: &Identity,
    ) -> LedgerResult<Vec<Self>> {
        let members = Self::get_contact_identities_in_group(uow, group_uid, owner)?;
        Ok(members
            .into_iter()
            .map(|member| Self {
                group_uid: *group_uid,
                owner: owner.clone(),
                member,
            })
            .collect())
    }

    /// Member identities of a group
    pub fn get_contact_identities_in_group(
        uow: &UnitOfWork,
        group_uid: &GroupUid,
        owner: &Identity,
    ) -> LedgerResult<Vec<Identity>> {
        let mut stmt = uow.connection().prepare(
            "SELECT contact_identity FROM contact_group_members_join
             WHERE group_uid = ? AND owned_identity = ?",
        )?;
        let rows = stmt.query_map(params![group_uid, owner], |row| row.get::<_, Identity>(0))?;
        Ok(collect_skipping(rows, "group member", owner))
    }

    /// Contacts of a group, with their details versions
    pub fn get_contacts_in_group(
        uow: &UnitOfWork,
        group_uid: &GroupUid,
        owner: &Identity,
    ) -> LedgerResult<Vec<ContactIdentity>> {
        let mut stmt = uow.connection().prepare(
            "SELECT c.contact_identity, c.owned_identity,
                    c.published_details_version, c.trusted_details_version
             FROM contact_identity c
             INNER JOIN contact_group_members_join m
                 ON m.contact_identity = c.contact_identity
                AND m.owned_identity = c.owned_identity
             WHERE m.group_uid = ? AND m.owned_identity = ?",
        )?;
        let rows = stmt.query_map(params![group_uid, owner], |row| {
            Ok(ContactIdentity::from_columns(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        Ok(collect_skipping(rows, "group contact", owner))
    }

    /// Groups of `owner` that `contact` belongs to
    pub fn get_groups_containing_contact(
        uow: &UnitOfWork,
        owner: &Identity,
        contact: &Identity,
    ) -> LedgerResult<Vec<ContactGroup>> {
        let mut stmt = uow.connection().prepare(
            "SELECT g.group_uid, g.owned_identity, g.created_at
             FROM contact_group g
             INNER JOIN contact_group_members_join m
                 ON m.group_uid = g.group_uid
                AND m.owned_identity = g.owned_identity
             WHERE m.contact_identity = ? AND m.owned_identity = ?",
        )?;
        let rows = stmt.query_map(params![contact, owner], |row| {
            Ok(ContactGroup::from_columns(row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        Ok(collect_skipping(rows, "contact group", owner))
    }
}
