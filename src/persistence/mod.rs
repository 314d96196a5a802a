//! Temporal Bulk Persister (component F).
//!
//! The bulk persister is the system's single source of truth: every other
//! component either writes events through it or reconstructs state by
//! replaying what it returns. Two implementations are provided: an
//! in-memory one for tests and single-process deployments, and a PostgreSQL
//! one (feature `postgres`) for the bitemporal store.

pub mod buffer;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod row_builder;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AccessError;
use crate::events::TemporalEvent;

pub use buffer::PersisterBuffer;
pub use memory::InMemoryBulkPersister;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresBulkPersister, PostgresConfig};

/// The sentinel max date used for `TransactionTo` on live bitemporal rows
/// across transaction-time ranges.
pub fn sentinel_max_date() -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap()
}

/// The smallest representable timestamp tick of the store, subtracted from
/// `OccurredTime` to compute a Remove event's cascading invalidation point.
pub const TEMPORAL_EPSILON: chrono::Duration = chrono::Duration::microseconds(1);

/// Identifies a point in the event stream: the last event applied, and the
/// transaction coordinates at which it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessManagerState {
    /// The most recent event reflected in this state.
    pub last_event_id: Uuid,
    /// The transaction time of `last_event_id`.
    pub transaction_time: DateTime<Utc>,
    /// The transaction sequence number of `last_event_id`.
    pub transaction_sequence: i64,
}

/// The result of a `Load`: the state pointer plus the ordered events needed
/// to replay it into an `AccessManager`.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// State pointer for the returned snapshot.
    pub state: AccessManagerState,
    /// Every event up to and including `state.last_event_id`, in
    /// `(OccurredTime, SequenceNumber)` order.
    pub events: Vec<TemporalEvent>,
}

/// Bulk persister interface. Implementors provide append,
/// point-in-time load, and the ordered-range reads the redistributor uses.
#[async_trait]
pub trait BulkPersister: Send + Sync {
    /// Append `events` in order. With `ignore_pre_existing`, events whose
    /// `event_id` is already durable are silently dropped, making retries
    /// and cross-shard copies idempotent.
    async fn persist_events(
        &self,
        events: Vec<TemporalEvent>,
        ignore_pre_existing: bool,
    ) -> Result<(), AccessError>;

    /// Load the bitemporal snapshot as of `state_time` (default: now).
    /// Fails with `InvalidParameter` if `state_time` is in the future, and
    /// `PersistentStorageEmpty` if no events exist yet.
    async fn load(&self, state_time: Option<DateTime<Utc>>) -> Result<LoadResult, AccessError>;

    /// Load the snapshot as of the transaction time of `event_id`.
    async fn load_at_event(&self, event_id: Uuid) -> Result<LoadResult, AccessError>;

    /// The first event ever persisted, if any.
    async fn get_initial_event(&self) -> Result<Option<TemporalEvent>, AccessError>;

    /// The event immediately following `event_id` in persisted order.
    async fn get_next_event_after(&self, event_id: Uuid) -> Result<Option<TemporalEvent>, AccessError>;

    /// Events in `[from, to]` (or `[from, end]` if `to` is `None`), in order.
    async fn get_events(&self, from: Uuid, to: Option<Uuid>) -> Result<Vec<TemporalEvent>, AccessError>;
}

/// Replay `events` into a fresh `AccessManager`, applying each in order.
/// Used both by the round-trip test property and by redistribution to
/// rebuild a snapshot at a shard-group boundary.
pub fn replay(events: &[TemporalEvent]) -> Result<crate::access_manager::AccessManager, AccessError> {
    let mut am = crate::access_manager::AccessManager::new();
    for event in events {
        crate::events::apply_event_to(&mut am, event)?;
    }
    Ok(am)
}
