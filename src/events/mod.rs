//! Temporal events and the event buffer (components D and part of G).
//!
//! Every mutation to the access graph is represented as a `TemporalEvent`
//! before it is persisted. Events are fanned into one of ten per-element-type
//! FIFO queues; a single global sequence counter orders events across queues
//! so consumers can merge-sort them back into total order.

pub mod flush;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access_manager::{AccessLevel, AccessManager, ApplicationComponent, Entity, EntityType};
use crate::error::AccessError;
use crate::graph::{LeafId, NonLeafId};

/// Add or remove, independent of which element kind is affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    /// The payload's element or mapping is being introduced.
    Add,
    /// The payload's element or mapping is being invalidated.
    Remove,
}

/// Which of the ten FIFO queues a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    /// User vertex.
    User,
    /// Group vertex.
    Group,
    /// User -> group mapping.
    UserToGroup,
    /// Group -> group mapping.
    GroupToGroup,
    /// User -> (component, level) mapping.
    UserComponentAccess,
    /// Group -> (component, level) mapping.
    GroupComponentAccess,
    /// Entity type.
    EntityType,
    /// Entity.
    Entity,
    /// User -> entity mapping.
    UserToEntity,
    /// Group -> entity mapping.
    GroupToEntity,
}

/// Fixed queue order, used wherever all ten kinds must be enumerated.
pub const ALL_EVENT_KINDS: [EventKind; 10] = [
    EventKind::User,
    EventKind::Group,
    EventKind::UserToGroup,
    EventKind::GroupToGroup,
    EventKind::UserComponentAccess,
    EventKind::GroupComponentAccess,
    EventKind::EntityType,
    EventKind::Entity,
    EventKind::UserToEntity,
    EventKind::GroupToEntity,
];

/// Tagged variant over every kind of mutation the access graph accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    /// A user vertex.
    User { user: LeafId },
    /// A group vertex.
    Group { group: NonLeafId },
    /// A user -> group mapping.
    UserToGroup { user: LeafId, group: NonLeafId },
    /// A group -> group mapping.
    GroupToGroup { from: NonLeafId, to: NonLeafId },
    /// A user -> (component, level) mapping.
    UserComponentAccess {
        user: LeafId,
        component: ApplicationComponent,
        level: AccessLevel,
    },
    /// A group -> (component, level) mapping.
    GroupComponentAccess {
        group: NonLeafId,
        component: ApplicationComponent,
        level: AccessLevel,
    },
    /// An entity type.
    EntityType { entity_type: EntityType },
    /// An entity under an entity type.
    Entity { entity_type: EntityType, entity: Entity },
    /// A user -> entity mapping.
    UserToEntity {
        user: LeafId,
        entity_type: EntityType,
        entity: Entity,
    },
    /// A group -> entity mapping.
    GroupToEntity {
        group: NonLeafId,
        entity_type: EntityType,
        entity: Entity,
    },
}

impl EventPayload {
    /// Which queue this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::User { .. } => EventKind::User,
            Self::Group { .. } => EventKind::Group,
            Self::UserToGroup { .. } => EventKind::UserToGroup,
            Self::GroupToGroup { .. } => EventKind::GroupToGroup,
            Self::UserComponentAccess { .. } => EventKind::UserComponentAccess,
            Self::GroupComponentAccess { .. } => EventKind::GroupComponentAccess,
            Self::EntityType { .. } => EventKind::EntityType,
            Self::Entity { .. } => EventKind::Entity,
            Self::UserToEntity { .. } => EventKind::UserToEntity,
            Self::GroupToEntity { .. } => EventKind::GroupToEntity,
        }
    }
}

/// A single durable mutation, ordered by `(occurred_time, sequence_number)`
/// with `event_id` as a final tiebreaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalEvent {
    /// Globally unique event identifier.
    pub event_id: Uuid,
    /// Add or Remove.
    pub action: EventAction,
    /// UTC wall-clock time the event was accepted.
    pub occurred_time: DateTime<Utc>,
    /// Monotonic sequence number assigned under `eventSequenceNumberLock`.
    pub sequence_number: i64,
    /// The mutation itself.
    pub payload: EventPayload,
}

impl TemporalEvent {
    /// Sort key matching the crate-wide event ordering guarantee.
    pub fn order_key(&self) -> (DateTime<Utc>, i64, Uuid) {
        (self.occurred_time, self.sequence_number, self.event_id)
    }
}

/// Monotonic `(occurred_time, sequence_number)` source guarded by a single
/// lock, so that event emission order matches lock-release order.
#[derive(Debug, Default)]
pub struct EventSequencer {
    next: Mutex<i64>,
}

impl EventSequencer {
    /// Create a sequencer starting at sequence number 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the sequence lock, read the current time, and return the
    /// next `(time, sequence_number)` pair. The lock is released on return.
    pub fn next(&self) -> (DateTime<Utc>, i64) {
        let mut guard = self.next.lock();
        let seq = *guard;
        *guard += 1;
        (Utc::now(), seq)
    }
}

/// Ten parallel FIFO queues, one per `EventKind`, each independently locked.
#[derive(Default)]
pub struct EventBuffer {
    queues: [Mutex<VecDeque<TemporalEvent>>; 10],
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("lengths", &self.lengths())
            .finish()
    }
}

fn queue_index(kind: EventKind) -> usize {
    ALL_EVENT_KINDS.iter().position(|k| *k == kind).unwrap()
}

impl EventBuffer {
    /// Create all ten queues empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the queue matching its payload kind.
    pub fn push(&self, event: TemporalEvent) {
        self.queues[queue_index(event.payload.kind())].lock().push_back(event);
    }

    /// Append an event and return the resulting length of its queue, so the
    /// caller can decide whether a size-based flush trigger fires.
    pub fn push_and_len(&self, event: TemporalEvent) -> usize {
        let mut guard = self.queues[queue_index(event.payload.kind())].lock();
        guard.push_back(event);
        guard.len()
    }

    /// Re-prepend a batch of events to the head of their respective queues,
    /// preserving their original relative order, after a failed flush.
    pub fn requeue_front(&self, events: Vec<TemporalEvent>) {
        for event in events.into_iter().rev() {
            self.queues[queue_index(event.payload.kind())].lock().push_front(event);
        }
    }

    /// Length of every queue, in `ALL_EVENT_KINDS` order.
    pub fn lengths(&self) -> [usize; 10] {
        let mut lens = [0usize; 10];
        for (i, q) in self.queues.iter().enumerate() {
            lens[i] = q.lock().len();
        }
        lens
    }

    /// Largest sequence number currently sitting in any queue, or `None` if
    /// every queue is empty. Used to compute a consistent flush cut.
    pub fn max_buffered_sequence(&self) -> Option<i64> {
        self.queues
            .iter()
            .filter_map(|q| q.lock().back().map(|e| e.sequence_number))
            .max()
    }

    /// Drain every event with `sequence_number <= cut` from all ten queues,
    /// merge-sorted by `order_key`. Events are physically removed; callers
    /// that fail to persist them must call `requeue_front` with the same
    /// vector to restore them.
    pub fn drain_up_to(&self, cut: i64) -> Vec<TemporalEvent> {
        let mut drained = Vec::new();
        for q in &self.queues {
            let mut guard = q.lock();
            let mut remaining = VecDeque::new();
            while let Some(event) = guard.pop_front() {
                if event.sequence_number <= cut {
                    drained.push(event);
                } else {
                    remaining.push_back(event);
                }
            }
            *guard = remaining;
        }
        drained.sort_by_key(|e| e.order_key());
        drained
    }
}

/// Replace the former per-subclass `eventTypeToPersistenceAction` dispatch
/// table with a single match over the event tag.
pub fn apply_event_to(am: &mut AccessManager, event: &TemporalEvent) -> Result<(), AccessError> {
    use EventAction::*;
    match (&event.action, &event.payload) {
        (Add, EventPayload::User { user }) => am.add_user(user.clone()),
        (Remove, EventPayload::User { user }) => am.remove_user(user),
        (Add, EventPayload::Group { group }) => am.add_group(group.clone()),
        (Remove, EventPayload::Group { group }) => am.remove_group(group),
        (Add, EventPayload::UserToGroup { user, group }) => am.add_user_to_group_mapping(user, group),
        (Remove, EventPayload::UserToGroup { user, group }) => am.remove_user_to_group_mapping(user, group),
        (Add, EventPayload::GroupToGroup { from, to }) => am.add_group_to_group_mapping(from, to),
        (Remove, EventPayload::GroupToGroup { from, to }) => am.remove_group_to_group_mapping(from, to),
        (Add, EventPayload::UserComponentAccess { user, component, level }) => {
            am.add_user_component_access(user, component.clone(), level.clone())
        }
        (Remove, EventPayload::UserComponentAccess { user, component, level }) => {
            am.remove_user_component_access(user, component, level)
        }
        (Add, EventPayload::GroupComponentAccess { group, component, level }) => {
            am.add_group_component_access(group, component.clone(), level.clone())
        }
        (Remove, EventPayload::GroupComponentAccess { group, component, level }) => {
            am.remove_group_component_access(group, component, level)
        }
        (Add, EventPayload::EntityType { entity_type }) => am.add_entity_type(entity_type.clone()),
        (Remove, EventPayload::EntityType { entity_type }) => am.remove_entity_type(entity_type),
        (Add, EventPayload::Entity { entity_type, entity }) => am.add_entity(entity_type, entity.clone()),
        (Remove, EventPayload::Entity { entity_type, entity }) => am.remove_entity(entity_type, entity),
        (Add, EventPayload::UserToEntity { user, entity_type, entity }) => {
            am.add_user_to_entity_mapping(user, entity_type, entity)
        }
        (Remove, EventPayload::UserToEntity { user, entity_type, entity }) => {
            am.remove_user_to_entity_mapping(user, entity_type, entity)
        }
        (Add, EventPayload::GroupToEntity { group, entity_type, entity }) => {
            am.add_group_to_entity_mapping(group, entity_type, entity)
        }
        (Remove, EventPayload::GroupToEntity { group, entity_type, entity }) => {
            am.remove_group_to_entity_mapping(group, entity_type, entity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `occurred_time` must co-vary with `sequence_number` (ordering is "(OccurredTime,
    // SequenceNumber) strictly increases per writer"), so tests derive it from seq
    // rather than sampling the wall clock independently of the assigned order.
    fn sample(seq: i64) -> TemporalEvent {
        let base = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        TemporalEvent {
            event_id: Uuid::new_v4(),
            action: EventAction::Add,
            occurred_time: base + chrono::Duration::microseconds(seq),
            sequence_number: seq,
            payload: EventPayload::User { user: LeafId::from("u1") },
        }
    }

    #[test]
    fn push_routes_to_matching_queue() {
        let buf = EventBuffer::new();
        buf.push(sample(0));
        let lens = buf.lengths();
        assert_eq!(lens[queue_index(EventKind::User)], 1);
        assert_eq!(lens.iter().sum::<usize>(), 1);
    }

    #[test]
    fn drain_is_sorted_and_consistent_cut() {
        let buf = EventBuffer::new();
        buf.push(sample(2));
        buf.push(sample(0));
        buf.push(sample(1));
        buf.push(sample(5)); // beyond the cut, must remain

        let drained = buf.drain_up_to(2);
        let seqs: Vec<i64> = drained.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(buf.max_buffered_sequence(), Some(5));
    }

    #[test]
    fn requeue_front_restores_original_order() {
        let buf = EventBuffer::new();
        buf.push(sample(0));
        buf.push(sample(1));
        let drained = buf.drain_up_to(1);
        buf.requeue_front(drained);
        let redrained = buf.drain_up_to(1);
        let seqs: Vec<i64> = redrained.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn sequencer_is_monotonic() {
        let seqr = EventSequencer::new();
        let (_, a) = seqr.next();
        let (_, b) = seqr.next();
        assert!(b > a);
    }
}
