//! Commit-hook dispatcher
//!
//! Every [`UnitOfWork`](crate::core_ledger::UnitOfWork) owns one dispatcher.
//! Mutations register what happened to an entity instance once their SQL
//! statement has succeeded. Registering the same instance again ORs the new
//! bits into its mask and keeps its original position in the queue.
//!
//! On commit the queue is drained in registration order and one
//! [`DomainEvent`] is posted per set bit, `ADDED` before `REMOVED`. An
//! instance inserted and then deleted inside the same unit-of-work therefore
//! produces both events rather than a net "nothing happened".
//! On rollback the queue is dropped without posting anything.

use crate::core_identity::{GroupUid, Identity};
use crate::metrics;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Payload key for the raw group uid
pub const PAYLOAD_GROUP_UID: &str = "group_uid";
/// Payload key for the raw owned identity
pub const PAYLOAD_OWNED_IDENTITY: &str = "owned_identity";
/// Payload key for the raw contact identity
pub const PAYLOAD_CONTACT_IDENTITY: &str = "contact_identity";

/// Bitmask of the changes an entity instance went through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeMask(u8);

impl ChangeMask {
    pub const NONE: ChangeMask = ChangeMask(0);
    pub const ADDED: ChangeMask = ChangeMask(0b01);
    pub const REMOVED: ChangeMask = ChangeMask(0b10);

    /// Bits in dispatch order
    const ORDERED: [ChangeMask; 2] = [ChangeMask::ADDED, ChangeMask::REMOVED];

    pub fn contains(self, other: ChangeMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ChangeMask {
    type Output = ChangeMask;

    fn bitor(self, rhs: ChangeMask) -> ChangeMask {
        ChangeMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeMask {
    fn bitor_assign(&mut self, rhs: ChangeMask) {
        self.0 |= rhs.0;
    }
}

/// Kind of a notification delivered after commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GroupMemberAdded,
    GroupMemberRemoved,
}

impl EventKind {
    /// Name under which the event is published
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::GroupMemberAdded => "group-member-added",
            EventKind::GroupMemberRemoved => "group-member-removed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity instance a pending event is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookKey {
    GroupMember {
        group_uid: GroupUid,
        owner: Identity,
        member: Identity,
    },
}

impl HookKey {
    fn event_kind(&self, bit: ChangeMask) -> Option<EventKind> {
        match self {
            HookKey::GroupMember { .. } if bit == ChangeMask::ADDED => Some(EventKind::GroupMemberAdded),
            HookKey::GroupMember { .. } if bit == ChangeMask::REMOVED => {
                Some(EventKind::GroupMemberRemoved)
            }
            HookKey::GroupMember { .. } => None,
        }
    }

    fn owner(&self) -> &Identity {
        match self {
            HookKey::GroupMember { owner, .. } => owner,
        }
    }

    fn payload(&self) -> BTreeMap<&'static str, Vec<u8>> {
        match self {
            HookKey::GroupMember { group_uid, owner, member } => BTreeMap::from([
                (PAYLOAD_GROUP_UID, group_uid.as_bytes().to_vec()),
                (PAYLOAD_OWNED_IDENTITY, owner.as_bytes().to_vec()),
                (PAYLOAD_CONTACT_IDENTITY, member.as_bytes().to_vec()),
            ]),
        }
    }
}

/// Notification handed to the pub/sub collaborator after commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub owner: Identity,
    pub payload: BTreeMap<&'static str, Vec<u8>>,
}

/// Receiver of committed domain events
pub trait NotificationSink: Send + Sync {
    fn post(&self, event: DomainEvent);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn post(&self, _event: DomainEvent) {}
}

/// Broadcasts committed events to every subscriber
///
/// Uses a tokio broadcast channel; posting never blocks and works outside a
/// runtime. Subscribers that fall behind the channel capacity lose the oldest
/// events.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster buffering up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for EventBroadcaster {
    fn post(&self, event: DomainEvent) {
        // No active receivers is not an error
        let _ = self.tx.send(event);
    }
}

#[derive(Debug)]
struct PendingEvent {
    key: HookKey,
    mask: ChangeMask,
}

/// Ordered queue of pending events for one unit-of-work
#[derive(Debug, Default)]
pub struct CommitHookDispatcher {
    pending: Vec<PendingEvent>,
}

impl CommitHookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `mask` happened to the instance identified by `key`
    pub fn register(&mut self, key: HookKey, mask: ChangeMask) {
        if mask.is_empty() {
            return;
        }
        match self.pending.iter_mut().find(|p| p.key == key) {
            Some(existing) => {
                existing.mask |= mask;
                trace!(bits = existing.mask.bits(), "Coalesced pending commit hook");
            }
            None => self.pending.push(PendingEvent { key, mask }),
        }
    }

    /// Number of registered instances
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Accumulated mask of an instance, `NONE` when not registered
    pub fn mask_for(&self, key: &HookKey) -> ChangeMask {
        self.pending
            .iter()
            .find(|p| &p.key == key)
            .map(|p| p.mask)
            .unwrap_or(ChangeMask::NONE)
    }

    /// Post every pending event to `sink` and empty the queue.
    /// Returns the number of events posted.
    pub fn dispatch(&mut self, sink: &dyn NotificationSink) -> usize {
        let mut posted = 0;
        for pending in self.pending.drain(..) {
            for bit in ChangeMask::ORDERED {
                if !pending.mask.contains(bit) {
                    continue;
                }
                if let Some(kind) = pending.key.event_kind(bit) {
                    sink.post(DomainEvent {
                        kind,
                        owner: pending.key.owner().clone(),
                        payload: pending.key.payload(),
                    });
                    posted += 1;
                }
            }
        }
        if posted > 0 {
            debug!(count = posted, "Dispatched commit notifications");
            metrics::record_notifications_dispatched(posted as u64);
        }
        posted
    }

    /// Drop every pending event. Returns the number of instances discarded.
    pub fn discard(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        if discarded > 0 {
            debug!(count = discarded, "Discarded commit notifications after rollback");
            metrics::record_notifications_discarded(discarded as u64);
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_identity::PrivateIdentity;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn member_key(seed: u64) -> HookKey {
        let mut rng = StdRng::seed_from_u64(seed);
        HookKey::GroupMember {
            group_uid: GroupUid::random(&mut rng),
            owner: PrivateIdentity::generate(&mut rng).identity().clone(),
            member: PrivateIdentity::generate(&mut rng).identity().clone(),
        }
    }

    #[test]
    fn test_change_mask_bits() {
        let both = ChangeMask::ADDED | ChangeMask::REMOVED;
        assert!(both.contains(ChangeMask::ADDED));
        assert!(both.contains(ChangeMask::REMOVED));
        assert!(!ChangeMask::ADDED.contains(ChangeMask::REMOVED));
        assert!(!ChangeMask::ADDED.contains(ChangeMask::NONE));
        assert!(ChangeMask::NONE.is_empty());
    }

    #[test]
    fn test_dispatch_fires_once_then_clears() {
        let broadcaster = EventBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let mut dispatcher = CommitHookDispatcher::new();
        let key = member_key(1);

        dispatcher.register(key.clone(), ChangeMask::ADDED);
        assert_eq!(dispatcher.dispatch(&broadcaster), 1);
        assert_eq!(dispatcher.mask_for(&key), ChangeMask::NONE);
        assert_eq!(dispatcher.dispatch(&broadcaster), 0);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::GroupMemberAdded);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let broadcaster = EventBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let mut dispatcher = CommitHookDispatcher::new();
        let first = member_key(1);
        let second = member_key(2);

        dispatcher.register(first.clone(), ChangeMask::ADDED);
        dispatcher.register(second, ChangeMask::REMOVED);
        dispatcher.register(first, ChangeMask::ADDED);
        assert_eq!(dispatcher.pending_count(), 2);

        dispatcher.dispatch(&broadcaster);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::GroupMemberAdded);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::GroupMemberRemoved);
    }

    #[test]
    fn test_masks_coalesce_and_both_bits_fire() {
        let broadcaster = EventBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let mut dispatcher = CommitHookDispatcher::new();
        let key = member_key(3);

        dispatcher.register(key.clone(), ChangeMask::ADDED);
        dispatcher.register(key.clone(), ChangeMask::REMOVED);
        assert_eq!(dispatcher.mask_for(&key), ChangeMask::ADDED | ChangeMask::REMOVED);

        assert_eq!(dispatcher.dispatch(&broadcaster), 2);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::GroupMemberAdded);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::GroupMemberRemoved);
    }

    #[test]
    fn test_discard_posts_nothing() {
        let broadcaster = EventBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let mut dispatcher = CommitHookDispatcher::new();

        dispatcher.register(member_key(4), ChangeMask::ADDED);
        assert_eq!(dispatcher.discard(), 1);
        assert_eq!(dispatcher.dispatch(&broadcaster), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_payload_carries_raw_bytes() {
        let broadcaster = EventBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();
        let mut dispatcher = CommitHookDispatcher::new();
        let key = member_key(5);
        let HookKey::GroupMember { group_uid, owner, member } = key.clone();

        dispatcher.register(key, ChangeMask::ADDED);
        dispatcher.dispatch(&broadcaster);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.owner, owner);
        assert_eq!(event.payload[PAYLOAD_GROUP_UID], group_uid.as_bytes().to_vec());
        assert_eq!(event.payload[PAYLOAD_OWNED_IDENTITY], owner.as_bytes().to_vec());
        assert_eq!(event.payload[PAYLOAD_CONTACT_IDENTITY], member.as_bytes().to_vec());
        assert_eq!(event.kind.as_str(), "group-member-added");
    }
}
