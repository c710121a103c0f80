//! Test helpers and fixtures

use crate::core_identity::{GroupUid, Identity, PrivateIdentity};
use crate::core_ledger::dispatcher::{DomainEvent, NotificationSink};
use crate::core_ledger::entities::{ContactGroup, ContactIdentity, OwnedIdentity};
use crate::core_ledger::store::LedgerStore;
use crate::core_ledger::unit_of_work::UnitOfWork;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

/// Sink that keeps every posted event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn post(&self, event: DomainEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory store without notification capture
pub fn test_store() -> LedgerStore {
    LedgerStore::memory().expect("Failed to create store")
}

/// In-memory store recording every notification
pub fn recording_store() -> (LedgerStore, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let store = LedgerStore::memory_with_sink(sink.clone()).expect("Failed to create store");
    (store, sink)
}

/// Deterministic random source
pub fn test_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Deterministic private identity
pub fn test_private_identity(seed: u8) -> PrivateIdentity {
    PrivateIdentity::from_secret_bytes(&[seed; 32])
}

pub fn test_identity(seed: u8) -> Identity {
    test_private_identity(seed).identity().clone()
}

/// Create the owned identity row for `seed`
pub fn seed_owner(uow: &UnitOfWork, seed: u8) -> PrivateIdentity {
    let private = test_private_identity(seed);
    OwnedIdentity::create(uow, private.identity()).expect("Failed to create owned identity");
    private
}

/// Create a contact row of `owner`
pub fn seed_contact(uow: &UnitOfWork, owner: &Identity, seed: u8) -> Identity {
    let contact = test_identity(seed);
    ContactIdentity::create(uow, owner, &contact).expect("Failed to create contact");
    contact
}

/// Create a contact group of `owner`
pub fn seed_group(uow: &UnitOfWork, owner: &Identity, seed: u8) -> GroupUid {
    let group_uid = GroupUid::from_bytes([seed; 32]);
    ContactGroup::create(uow, &group_uid, owner, 1_700_000_000_000).expect("Failed to create group");
    group_uid
}
