//! In-memory `BulkPersister`: an append-only event log behind a single lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{AccessManagerState, BulkPersister, LoadResult};
use crate::error::AccessError;
use crate::events::TemporalEvent;

/// A persisted event alongside the `TransactionSequence` computed for it at
/// persist time (0 for a new distinct `occurred_time`, else previous + 1;
/// see `BulkPersister::persist_events`).
#[derive(Debug, Clone)]
struct StoredEvent {
    event: TemporalEvent,
    transaction_sequence: i64,
}

/// Append-only in-memory event log, ordered by insertion (which callers are
/// expected to have already sorted by `order_key`).
#[derive(Default)]
pub struct InMemoryBulkPersister {
    events: RwLock<Vec<StoredEvent>>,
}

impl InMemoryBulkPersister {
    /// Create an empty persister.
    pub fn new() -> Self {
        Self::default()
    }

    fn state_at(events: &[StoredEvent]) -> Option<AccessManagerState> {
        events.last().map(|se| AccessManagerState {
            last_event_id: se.event.event_id,
            transaction_time: se.event.occurred_time,
            transaction_sequence: se.transaction_sequence,
        })
    }
}

#[async_trait]
impl BulkPersister for InMemoryBulkPersister {
    async fn persist_events(
        &self,
        events: Vec<TemporalEvent>,
        ignore_pre_existing: bool,
    ) -> Result<(), AccessError> {
        super::row_builder::build_rows(&events)?;
        let mut guard = self.events.write();
        let mut max_occurred_time = guard.last().map(|se| se.event.occurred_time);
        for event in events {
            let exists = guard.iter().any(|se| se.event.event_id == event.event_id);
            if exists {
                if ignore_pre_existing {
                    continue;
                }
                return Err(AccessError::PersistenceFailure(format!(
                    "event '{}' already persisted",
                    event.event_id
                )));
            }
            if !ignore_pre_existing {
                if let Some(max_time) = max_occurred_time {
                    if event.occurred_time < max_time {
                        return Err(AccessError::InvalidParameter(format!(
                            "event '{}' has occurred_time '{}' earlier than the maximum already persisted time '{max_time}'",
                            event.event_id, event.occurred_time
                        )));
                    }
                }
            }
            let transaction_sequence = guard
                .iter()
                .filter(|se| se.event.occurred_time == event.occurred_time)
                .map(|se| se.transaction_sequence)
                .max()
                .map_or(0, |prev| prev + 1);
            max_occurred_time = Some(max_occurred_time.map_or(event.occurred_time, |t| t.max(event.occurred_time)));
            guard.push(StoredEvent { event, transaction_sequence });
        }
        guard.sort_by_key(|se| se.event.order_key());
        Ok(())
    }

    async fn load(&self, state_time: Option<DateTime<Utc>>) -> Result<LoadResult, AccessError> {
        let now = Utc::now();
        let state_time = state_time.unwrap_or(now);
        if state_time > now {
            return Err(AccessError::InvalidParameter(format!(
                "state_time '{state_time}' is in the future"
            )));
        }
        let guard = self.events.read();
        if guard.is_empty() {
            return Err(AccessError::PersistentStorageEmpty);
        }
        let selected: Vec<StoredEvent> = guard
            .iter()
            .filter(|se| se.event.occurred_time <= state_time)
            .cloned()
            .collect();
        let state = Self::state_at(&selected).ok_or(AccessError::PersistentStorageEmpty)?;
        let events = selected.into_iter().map(|se| se.event).collect();
        Ok(LoadResult { state, events })
    }

    async fn load_at_event(&self, event_id: Uuid) -> Result<LoadResult, AccessError> {
        let guard = self.events.read();
        let target = guard
            .iter()
            .find(|se| se.event.event_id == event_id)
            .ok_or_else(|| AccessError::ElementNotFound(format!("event '{event_id}'")))?;
        let cut = target.event.occurred_time;
        let selected: Vec<StoredEvent> = guard.iter().filter(|se| se.event.occurred_time <= cut).cloned().collect();
        let state = Self::state_at(&selected).ok_or(AccessError::PersistentStorageEmpty)?;
        let events = selected.into_iter().map(|se| se.event).collect();
        Ok(LoadResult { state, events })
    }

    async fn get_initial_event(&self) -> Result<Option<TemporalEvent>, AccessError> {
        Ok(self.events.read().first().map(|se| se.event.clone()))
    }

    async fn get_next_event_after(&self, event_id: Uuid) -> Result<Option<TemporalEvent>, AccessError> {
        let guard = self.events.read();
        let pos = guard.iter().position(|se| se.event.event_id == event_id);
        Ok(pos.and_then(|i| guard.get(i + 1)).map(|se| se.event.clone()))
    }

    async fn get_events(&self, from: Uuid, to: Option<Uuid>) -> Result<Vec<TemporalEvent>, AccessError> {
        let guard = self.events.read();
        let start = guard
            .iter()
            .position(|se| se.event.event_id == from)
            .ok_or_else(|| AccessError::ElementNotFound(format!("event '{from}'")))?;
        let end = match to {
            Some(id) => guard
                .iter()
                .position(|se| se.event.event_id == id)
                .ok_or_else(|| AccessError::ElementNotFound(format!("event '{id}'")))?,
            None => guard.len() - 1,
        };
        Ok(guard[start..=end].iter().map(|se| se.event.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventAction, EventPayload};
    use crate::graph::LeafId;

    fn add_user_event(seq: i64) -> TemporalEvent {
        TemporalEvent {
            event_id: Uuid::new_v4(),
            action: EventAction::Add,
            occurred_time: Utc::now(),
            sequence_number: seq,
            payload: EventPayload::User { user: LeafId::from(format!("u{seq}")) },
        }
    }

    fn add_user_event_at(seq: i64, occurred_time: DateTime<Utc>) -> TemporalEvent {
        TemporalEvent {
            event_id: Uuid::new_v4(),
            action: EventAction::Add,
            occurred_time,
            sequence_number: seq,
            payload: EventPayload::User { user: LeafId::from(format!("u{seq}")) },
        }
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let persister = InMemoryBulkPersister::new();
        let e0 = add_user_event(0);
        let e1 = add_user_event(1);
        persister.persist_events(vec![e0.clone(), e1.clone()], false).await.unwrap();

        let loaded = persister.load(None).await.unwrap();
        assert_eq!(loaded.events.len(), 2);
        assert_eq!(loaded.state.last_event_id, e1.event_id);
    }

    #[tokio::test]
    async fn ignore_pre_existing_is_idempotent() {
        let persister = InMemoryBulkPersister::new();
        let e0 = add_user_event(0);
        persister.persist_events(vec![e0.clone()], true).await.unwrap();
        persister.persist_events(vec![e0.clone()], true).await.unwrap();

        let loaded = persister.load(None).await.unwrap();
        assert_eq!(loaded.events.len(), 1);
    }

    #[tokio::test]
    async fn load_on_empty_store_fails() {
        let persister = InMemoryBulkPersister::new();
        let err = persister.load(None).await.unwrap_err();
        assert!(matches!(err, AccessError::PersistentStorageEmpty));
    }

    #[tokio::test]
    async fn load_in_the_future_is_rejected() {
        let persister = InMemoryBulkPersister::new();
        persister.persist_events(vec![add_user_event(0)], false).await.unwrap();
        let future = Utc::now() + chrono::Duration::days(1);
        let err = persister.load(Some(future)).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn transaction_sequence_increments_for_events_sharing_a_time() {
        let persister = InMemoryBulkPersister::new();
        let t = Utc::now();
        let e0 = add_user_event_at(0, t);
        let e1 = add_user_event_at(1, t);
        persister.persist_events(vec![e0, e1.clone()], false).await.unwrap();

        let loaded = persister.load(None).await.unwrap();
        assert_eq!(loaded.state.last_event_id, e1.event_id);
        assert_eq!(loaded.state.transaction_sequence, 1);
    }

    #[tokio::test]
    async fn out_of_order_occurred_time_is_rejected_on_the_live_path() {
        let persister = InMemoryBulkPersister::new();
        let t = Utc::now();
        persister.persist_events(vec![add_user_event_at(0, t)], false).await.unwrap();

        let earlier = add_user_event_at(1, t - chrono::Duration::seconds(1));
        let err = persister.persist_events(vec![earlier], false).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn out_of_order_occurred_time_is_exempt_when_ignoring_pre_existing() {
        let persister = InMemoryBulkPersister::new();
        let t = Utc::now();
        persister.persist_events(vec![add_user_event_at(0, t)], false).await.unwrap();

        let earlier = add_user_event_at(1, t - chrono::Duration::seconds(1));
        persister.persist_events(vec![earlier], true).await.unwrap();

        let loaded = persister.load(None).await.unwrap();
        assert_eq!(loaded.events.len(), 2);
    }
}
