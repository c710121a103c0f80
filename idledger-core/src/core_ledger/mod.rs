//! Versioned identity attribute ledger
//!
//! SQLite-backed store for the mutable, cryptographically anchored
//! attributes of identities:
//!
//! - versioned profile details of owned identities and contacts
//! - signed device pre-keys
//! - contact group membership, with commit-time notifications
//! - keycloak revocation records
//!
//! Every operation takes an explicit [`UnitOfWork`]. Notifications queued
//! by its mutations fire once, after the transaction durably commits.

// Core types and errors
pub mod errors;
pub mod dispatcher;
pub mod migrations;

// Transactions
pub mod store;
pub mod unit_of_work;

// Records
pub mod backup;
pub mod details;
pub mod entities;
pub mod membership;
pub mod prekey;
pub mod revocation;

#[cfg(test)]
mod tests;

pub use backup::{GroupMemberBackup, VersionedDetailsBackup};
pub use details::{DetailsScope, VersionedDetails};
pub use dispatcher::{
    ChangeMask, CommitHookDispatcher, DomainEvent, EventBroadcaster, EventKind, HookKey,
    NotificationSink, NullSink,
};
pub use entities::{ContactGroup, ContactIdentity, KeycloakServer, OwnedIdentity};
pub use errors::{ConstraintKind, LedgerError, LedgerResult};
pub use membership::GroupMembership;
pub use prekey::{PreKey, PreKeyContents, PreKeyIssuer, SignedPreKey};
pub use revocation::{RevocationKind, RevocationRecord};
pub use store::LedgerStore;
pub use unit_of_work::UnitOfWork;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix millis, the unit of every ledger timestamp
pub fn unix_millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
