//! Persister Buffer (component G): validates writes against the local
//! AccessManager, fans them into the event buffer (D), and flushes to the
//! bulk persister (F) per the configured flush strategy (E).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::concurrency::ConcurrentAccessManager;
use crate::error::AccessError;
use crate::events::flush::FlushStrategy;
use crate::events::{EventAction, EventBuffer, EventPayload, TemporalEvent};
use crate::graph::{LeafId, NonLeafId};

use super::BulkPersister;

/// Fans validated mutations into the event buffer and flushes them to a
/// `BulkPersister` on the configured trigger. Trips (refuses further writes
/// with `ServiceUnavailable`) once a flush exhausts its retry policy.
pub struct PersisterBuffer<P: BulkPersister> {
    access: Arc<ConcurrentAccessManager>,
    buffer: EventBuffer,
    persister: P,
    strategy: FlushStrategy,
    tripped: AtomicBool,
    in_flight: AtomicUsize,
}

impl<P: BulkPersister> PersisterBuffer<P> {
    /// Create a buffer over a shared access manager and a concrete persister.
    pub fn new(access: Arc<ConcurrentAccessManager>, persister: P, strategy: FlushStrategy) -> Self {
        Self {
            access,
            buffer: EventBuffer::new(),
            persister,
            strategy,
            tripped: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// The underlying persister, used by the redistributor to read/copy
    /// events directly.
    pub fn persister(&self) -> &P {
        &self.persister
    }

    /// Number of `submit` calls currently in flight (validating/enqueuing),
    /// polled by the redistributor while quiescing a source shard group.
    pub fn event_processing_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Flush every currently-buffered event; used to quiesce a shard group
    /// before redistribution.
    pub async fn flush_event_buffers(&self) -> Result<usize, AccessError> {
        let mut total = 0;
        loop {
            let flushed = self.flush().await?;
            if flushed == 0 {
                return Ok(total);
            }
            total += flushed;
        }
    }

    /// Whether the trip switch is currently engaged.
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Operator reset after a trip: clears the switch so writes resume.
    pub fn reset_trip_switch(&self) {
        self.tripped.store(false, Ordering::SeqCst);
    }

    fn check_tripped(&self) -> Result<(), AccessError> {
        if self.is_tripped() {
            return Err(AccessError::ServiceUnavailable);
        }
        Ok(())
    }

    /// Validate-and-mutate `mutate` against the shared AccessManager, then
    /// enqueue the resulting event for persistence. `mutate` is the
    /// validator: if it errors, nothing is enqueued.
    pub async fn submit<F>(&self, mutate: F) -> Result<(), AccessError>
    where
        F: FnOnce(&ConcurrentAccessManager) -> Result<TemporalEvent, AccessError>,
    {
        self.check_tripped()?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.submit_inner(mutate).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn submit_inner<F>(&self, mutate: F) -> Result<(), AccessError>
    where
        F: FnOnce(&ConcurrentAccessManager) -> Result<TemporalEvent, AccessError>,
    {
        let event = mutate(&self.access)?;
        let queue_len = self.buffer.push_and_len(event);
        if self.strategy.should_flush_on_write(queue_len) {
            self.flush().await?;
        }
        Ok(())
    }

    /// Submit a raw `(action, payload)` pair as received over the wire, for
    /// callers that don't go through the typed `submit_*` helpers (the HTTP
    /// events endpoint).
    pub async fn submit_payload(&self, action: EventAction, payload: EventPayload) -> Result<(), AccessError> {
        self.submit(move |am| am.apply(action, payload)).await
    }

    /// Dependency-free submission: synthesize a missing `AddUser` before a
    /// mutation that references `user`, so out-of-order writers still
    /// produce a referentially-intact event stream.
    async fn ensure_user(&self, user: &LeafId) -> Result<(), AccessError> {
        if self.access.has_user(user) {
            return Ok(());
        }
        match self.submit(|am| am.add_user(user.clone())).await {
            Ok(()) | Err(AccessError::ElementAlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Dependency-free submission: synthesize a missing `AddGroup`.
    async fn ensure_group(&self, group: &NonLeafId) -> Result<(), AccessError> {
        if self.access.has_group(group) {
            return Ok(());
        }
        match self.submit(|am| am.add_group(group.clone())).await {
            Ok(()) | Err(AccessError::ElementAlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Submit a user -> group mapping. With `dependency_free`, missing
    /// endpoints are synthesized (as Add events, emitted first) instead of
    /// failing with `ElementNotFound`.
    pub async fn submit_user_to_group_mapping(
        &self,
        user: LeafId,
        group: NonLeafId,
        dependency_free: bool,
    ) -> Result<(), AccessError> {
        if dependency_free {
            self.ensure_user(&user).await?;
            self.ensure_group(&group).await?;
        }
        self.submit(move |am| am.add_user_to_group_mapping(user.clone(), group.clone())).await
    }

    /// Submit a group -> group mapping, with the same dependency-free option.
    pub async fn submit_group_to_group_mapping(
        &self,
        from: NonLeafId,
        to: NonLeafId,
        dependency_free: bool,
    ) -> Result<(), AccessError> {
        if dependency_free {
            self.ensure_group(&from).await?;
            self.ensure_group(&to).await?;
        }
        self.submit(move |am| am.add_group_to_group_mapping(from.clone(), to.clone())).await
    }

    /// Drain every queue up to the consistent cut,
    /// merge-sort by sequence number, and persist. On failure, the drained
    /// events are re-prepended in their original order and the error
    /// propagates; repeated failures are the caller's responsibility to
    /// count against a retry policy before tripping the switch.
    pub async fn flush(&self) -> Result<usize, AccessError> {
        let Some(cut) = self.buffer.max_buffered_sequence() else {
            return Ok(0);
        };
        let drained = self.buffer.drain_up_to(cut);
        if drained.is_empty() {
            return Ok(0);
        }
        let count = drained.len();
        match self.persister.persist_events(drained.clone(), false).await {
            Ok(()) => Ok(count),
            Err(e) => {
                self.buffer.requeue_front(drained);
                Err(e)
            }
        }
    }

    /// Flush, and on exhausting `max_attempts` retries, engage the trip
    /// switch and surface the last error.
    pub async fn flush_with_retry(&self, max_attempts: u32) -> Result<usize, AccessError> {
        let mut last_err = None;
        for _ in 0..max_attempts.max(1) {
            match self.flush().await {
                Ok(n) => return Ok(n),
                Err(e) => last_err = Some(e),
            }
        }
        self.tripped.store(true, Ordering::SeqCst);
        Err(last_err.unwrap_or(AccessError::ServiceUnavailable))
    }

    /// Run the flush strategy's background worker until `cancel` resolves.
    /// Only meaningful for `Periodic`/`Combined` strategies; for
    /// `SizeBased`, flushes happen synchronously inside `submit`.
    pub async fn run_periodic_flush_loop(&self, mut cancel: tokio::sync::watch::Receiver<bool>) {
        let Some(interval) = self.strategy.periodic_interval() else {
            return;
        };
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = self.flush_with_retry(1).await {
                        tracing::warn!(error = %err, "periodic flush failed");
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryBulkPersister;

    fn buffer() -> PersisterBuffer<InMemoryBulkPersister> {
        PersisterBuffer::new(
            Arc::new(ConcurrentAccessManager::new()),
            InMemoryBulkPersister::new(),
            FlushStrategy::SizeBased { buffer_size_limit: 100 },
        )
    }

    #[tokio::test]
    async fn submit_then_flush_persists_event() {
        let buf = buffer();
        buf.submit(|am| am.add_user(LeafId::from("alice"))).await.unwrap();
        let flushed = buf.flush().await.unwrap();
        assert_eq!(flushed, 1);
    }

    #[tokio::test]
    async fn invalid_mutation_is_not_enqueued() {
        let buf = buffer();
        buf.submit(|am| am.add_user(LeafId::from("alice"))).await.unwrap();
        let err = buf.submit(|am| am.add_user(LeafId::from("alice"))).await.unwrap_err();
        assert!(matches!(err, AccessError::ElementAlreadyExists(_)));
        // Only the first, valid, add is pending.
        assert_eq!(buf.flush().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dependency_free_synthesizes_missing_user_and_group() {
        let buf = buffer();
        buf.submit_user_to_group_mapping(LeafId::from("u1"), NonLeafId::from("g1"), true)
            .await
            .unwrap();

        assert!(buf.access.has_user(&LeafId::from("u1")));
        assert!(buf.access.has_group(&NonLeafId::from("g1")));
        // AddUser, AddGroup, AddUserToGroup.
        assert_eq!(buf.flush().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn tripped_buffer_refuses_writes() {
        let buf = buffer();
        buf.tripped.store(true, Ordering::SeqCst);
        let err = buf.submit(|am| am.add_user(LeafId::from("alice"))).await.unwrap_err();
        assert!(matches!(err, AccessError::ServiceUnavailable));
    }
}
