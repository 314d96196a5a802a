//! Shard Group Splitter/Merger (component J): online redistribution without
//! losing or duplicating events.

use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::error::AccessError;
use crate::events::{EventPayload, TemporalEvent};
use crate::persistence::buffer::PersisterBuffer;
use crate::persistence::BulkPersister;
use crate::shard::{stable_hash, DataElementType, OperationRouter, OperationType, ShardConfigurationSet};

/// Tunables for the quiescence poll and copy batching.
#[derive(Debug, Clone)]
pub struct RedistributionConfig {
    /// Batch size for `PersistEvents` calls during bulk copy.
    pub event_batch_size: usize,
    /// Maximum times to poll `event_processing_count` before failing.
    pub max_quiesce_retries: u32,
    /// Delay between quiescence polls.
    pub quiesce_retry_interval: Duration,
}

impl Default for RedistributionConfig {
    fn default() -> Self {
        Self {
            event_batch_size: 500,
            max_quiesce_retries: 59,
            quiesce_retry_interval: Duration::from_millis(100),
        }
    }
}

/// Inclusive `stableHash` sub-range being moved between shard groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRange {
    pub start: i32,
    pub end: i32,
}

impl HashRange {
    fn contains(&self, hash: i32) -> bool {
        hash >= self.start && hash <= self.end
    }
}

/// The routing element a payload is sharded by: `None` for payload kinds
/// that the shard configuration does not govern (components, entities).
fn routing_element(payload: &EventPayload) -> Option<(&str, DataElementType)> {
    match payload {
        EventPayload::User { user } => Some((user.0.as_str(), DataElementType::User)),
        EventPayload::Group { group } => Some((group.0.as_str(), DataElementType::Group)),
        EventPayload::GroupToGroup { from, .. } => Some((from.0.as_str(), DataElementType::GroupToGroupMapping)),
        _ => None,
    }
}

fn in_range(payload: &EventPayload, range: HashRange) -> bool {
    match routing_element(payload) {
        Some((element, _)) => range.contains(stable_hash(element)),
        None => false,
    }
}

async fn collect_all_events<P: BulkPersister>(persister: &P) -> Result<Vec<TemporalEvent>, AccessError> {
    let Some(initial) = persister.get_initial_event().await? else {
        return Ok(Vec::new());
    };
    persister.get_events(initial.event_id, None).await
}

async fn quiesce<P: BulkPersister>(
    source: &PersisterBuffer<P>,
    config: &RedistributionConfig,
) -> Result<(), AccessError> {
    source.flush_event_buffers().await?;
    for _ in 0..config.max_quiesce_retries {
        if source.event_processing_count() == 0 {
            return Ok(());
        }
        tokio::time::sleep(config.quiesce_retry_interval).await;
    }
    if source.event_processing_count() != 0 {
        return Err(AccessError::RedistributionFailure {
            step: "quiesce".to_string(),
            reason: "source writer never reached zero in-flight events".to_string(),
        });
    }
    Ok(())
}

async fn copy_range<P: BulkPersister>(
    source: &P,
    target: &P,
    range: HashRange,
    batch_size: usize,
) -> Result<usize, AccessError> {
    let events: Vec<TemporalEvent> = collect_all_events(source)
        .await?
        .into_iter()
        .filter(|e| in_range(&e.payload, range))
        .collect();

    let mut copied = 0;
    for batch in events.chunks(batch_size.max(1)) {
        target.persist_events(batch.to_vec(), true).await.map_err(|e| AccessError::RedistributionFailure {
            step: "copy".to_string(),
            reason: e.to_string(),
        })?;
        copied += batch.len();
    }
    Ok(copied)
}

/// Which upstream source an event came from while copying into a merge
/// target, so the controller can checkpoint each source's progress
/// independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// The first shard group being merged.
    A,
    /// The second shard group being merged.
    B,
}

/// The highest `EventId` processed so far from each origin, returned after
/// every `buffer_event` call so the controller can record progress without
/// waiting for a flush.
#[derive(Debug, Clone, Default)]
pub struct RedistributionCheckpoint {
    /// Highest event id buffered or flushed from origin A.
    pub highest_a: Option<Uuid>,
    /// Highest event id buffered or flushed from origin B.
    pub highest_b: Option<Uuid>,
}

/// A dual-source persister buffer used while copying events into a merge or
/// split target: accepts events tagged with their origin, and flushes in
/// merged `(OccurredTime, SequenceNumber, EventId)` order once the combined
/// buffer crosses a threshold. This is the "G-shaped buffer inside J"
/// quiesce/drain/checkpoint sequence, specialized from the general-purpose
/// `PersisterBuffer` (component G) to two untyped upstream event streams
/// instead of one local `AccessManager`.
pub struct EventPersisterBuffer<'a, P: BulkPersister> {
    target: &'a P,
    threshold: usize,
    buffered: Vec<(EventOrigin, TemporalEvent)>,
    checkpoint: RedistributionCheckpoint,
}

impl<'a, P: BulkPersister> EventPersisterBuffer<'a, P> {
    /// Create a buffer that auto-flushes to `target` once it holds
    /// `threshold` events from either source combined.
    pub fn new(target: &'a P, threshold: usize) -> Self {
        Self { target, threshold: threshold.max(1), buffered: Vec::new(), checkpoint: RedistributionCheckpoint::default() }
    }

    /// Buffer one event tagged with its origin, auto-flushing when the
    /// combined buffer reaches the threshold. Returns the checkpoint after
    /// this call so the caller can record per-source progress even while a
    /// flush is still pending.
    pub async fn buffer_event(
        &mut self,
        origin: EventOrigin,
        event: TemporalEvent,
    ) -> Result<RedistributionCheckpoint, AccessError> {
        match origin {
            EventOrigin::A => self.checkpoint.highest_a = Some(event.event_id),
            EventOrigin::B => self.checkpoint.highest_b = Some(event.event_id),
        }
        self.buffered.push((origin, event));
        if self.buffered.len() >= self.threshold {
            self.flush().await?;
        }
        Ok(self.checkpoint.clone())
    }

    /// Flush whatever is currently buffered, merge-sorted, with
    /// `ignore_pre_existing = true` so a retried flush is idempotent.
    pub async fn flush(&mut self) -> Result<(), AccessError> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        self.buffered.sort_by_key(|(_, e)| e.order_key());
        let events: Vec<TemporalEvent> = std::mem::take(&mut self.buffered).into_iter().map(|(_, e)| e).collect();
        self.target
            .persist_events(events, true)
            .await
            .map_err(|e| AccessError::RedistributionFailure { step: "merge-copy".to_string(), reason: e.to_string() })
    }

    /// The most recent checkpoint, without buffering a new event.
    pub fn checkpoint(&self) -> RedistributionCheckpoint {
        self.checkpoint.clone()
    }
}

/// Divide one shard group into two by hash sub-range, moving everything in
/// `range` from `source` to `target`. Idempotent: safe to retry from
/// scratch after any failure, because `ignore_pre_existing` copies and the
/// single configuration flip are both at-most-once.
pub async fn split<P: BulkPersister>(
    source: &PersisterBuffer<P>,
    target: &PersisterBuffer<P>,
    source_router: &OperationRouter,
    target_router: &OperationRouter,
    shard_config: &ShardConfigurationSet,
    range: HashRange,
    target_client_configuration: Value,
    config: RedistributionConfig,
) -> Result<usize, AccessError> {
    quiesce(source, &config).await?;

    // Steps 2-3: snapshot the horizon, then bulk-copy everything currently
    // in range. `ignore_pre_existing` makes any retry of this call, or of
    // the drain in step 5, produce the same final state.
    let initial_copy = copy_range(source.persister(), target.persister(), range, config.event_batch_size).await?;

    source_router.pause_operations();
    target_router.pause_operations();

    // Step 5: drain anything that landed at the source during the copy.
    // Idempotent re-copy of the same range covers it without needing a
    // separate horizon-delta computation.
    let _ = copy_range(source.persister(), target.persister(), range, config.event_batch_size).await?;

    // Step 6: the configuration flip is the single commit point.
    shard_config.update(
        vec![(DataElementType::User, OperationType::Query, range.start, target_client_configuration.clone())],
        false,
    );
    target_router.switch_on(range.start, range.end, target_client_configuration);

    source_router.resume_operations();
    target_router.resume_operations();

    tracing::info!(
        range_start = range.start,
        range_end = range.end,
        copied = initial_copy,
        "shard split cutover complete; source rows in range are now stale and eligible for background invalidation"
    );

    Ok(initial_copy)
}

/// Combine two shard groups into one: both sources are quiesced, events
/// from both are copied into the merged target in `(OccurredTime,
/// SequenceNumber, EventId)` order, and routing is resumed against the
/// merged target for the union of both ranges.
pub async fn merge<P: BulkPersister>(
    source_a: &PersisterBuffer<P>,
    source_b: &PersisterBuffer<P>,
    merged_target: &PersisterBuffer<P>,
    router_a: &OperationRouter,
    router_b: &OperationRouter,
    merged_router: &OperationRouter,
    shard_config: &ShardConfigurationSet,
    union_range: HashRange,
    merged_client_configuration: Value,
    config: RedistributionConfig,
) -> Result<usize, AccessError> {
    quiesce(source_a, &config).await?;
    quiesce(source_b, &config).await?;

    router_a.pause_operations();
    router_b.pause_operations();

    let events_a = collect_all_events(source_a.persister()).await?;
    let events_b = collect_all_events(source_b.persister()).await?;
    let total = events_a.len() + events_b.len();

    // Feed both streams through the dual-source buffer, tagging each event
    // with its origin so the controller could checkpoint per-source
    // progress; the flushes themselves carry strict merged order.
    let mut copy_buffer = EventPersisterBuffer::new(merged_target.persister(), config.event_batch_size);
    let mut checkpoint = RedistributionCheckpoint::default();
    for event in events_a {
        checkpoint = copy_buffer.buffer_event(EventOrigin::A, event).await?;
    }
    for event in events_b {
        checkpoint = copy_buffer.buffer_event(EventOrigin::B, event).await?;
    }
    copy_buffer.flush().await?;
    tracing::info!(
        highest_a = ?checkpoint.highest_a,
        highest_b = ?checkpoint.highest_b,
        total,
        "merge copy complete"
    );

    shard_config.update(
        vec![(DataElementType::User, OperationType::Query, union_range.start, merged_client_configuration.clone())],
        true,
    );
    merged_router.switch_on(union_range.start, union_range.end, merged_client_configuration);

    router_a.resume_operations();
    router_b.resume_operations();
    merged_router.resume_operations();

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::concurrency::ConcurrentAccessManager;
    use crate::events::flush::FlushStrategy;
    use crate::graph::LeafId;
    use crate::persistence::InMemoryBulkPersister;
    use serde_json::json;
    use std::sync::Arc;

    fn buffer() -> PersisterBuffer<InMemoryBulkPersister> {
        PersisterBuffer::new(
            Arc::new(ConcurrentAccessManager::new()),
            InMemoryBulkPersister::new(),
            FlushStrategy::SizeBased { buffer_size_limit: 1_000 },
        )
    }

    /// No event is lost across the split.
    #[tokio::test]
    async fn split_preserves_total_event_count() {
        let source = buffer();
        let target = buffer();

        for name in ["alice", "bob", "carol", "dave", "erin"] {
            source.submit(|am| am.add_user(LeafId::from(name))).await.unwrap();
        }
        source.flush_event_buffers().await.unwrap();
        let pre_count = source.persister().get_initial_event().await.unwrap().map(|_| {
            // count via get_events on the whole range
        });
        let _ = pre_count;
        let all_before = collect_all_events(source.persister()).await.unwrap().len();

        let source_router = OperationRouter::new(Arc::new(ShardConfigurationSet::new()));
        let target_router = OperationRouter::new(Arc::new(ShardConfigurationSet::new()));
        let shard_config = ShardConfigurationSet::new();

        let full_range = HashRange { start: i32::MIN, end: i32::MAX };
        split(
            &source,
            &target,
            &source_router,
            &target_router,
            &shard_config,
            full_range,
            json!("target-shard"),
            RedistributionConfig { event_batch_size: 2, ..Default::default() },
        )
        .await
        .unwrap();

        let all_after_target = collect_all_events(target.persister()).await.unwrap().len();
        assert_eq!(all_before, all_after_target);
    }

    #[tokio::test]
    async fn merge_combines_events_in_order() {
        let source_a = buffer();
        let source_b = buffer();
        let merged = buffer();

        source_a.submit(|am| am.add_user(LeafId::from("u1"))).await.unwrap();
        source_b.submit(|am| am.add_user(LeafId::from("u2"))).await.unwrap();
        source_a.flush_event_buffers().await.unwrap();
        source_b.flush_event_buffers().await.unwrap();

        let router_a = OperationRouter::new(Arc::new(ShardConfigurationSet::new()));
        let router_b = OperationRouter::new(Arc::new(ShardConfigurationSet::new()));
        let merged_router = OperationRouter::new(Arc::new(ShardConfigurationSet::new()));
        let shard_config = ShardConfigurationSet::new();

        let count = merge(
            &source_a,
            &source_b,
            &merged,
            &router_a,
            &router_b,
            &merged_router,
            &shard_config,
            HashRange { start: i32::MIN, end: i32::MAX },
            json!("merged-shard"),
            RedistributionConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(count, 2);
        let events = collect_all_events(merged.persister()).await.unwrap();
        assert!(events.windows(2).all(|w| w[0].order_key() <= w[1].order_key()));
    }

    fn event_for(user: &str, seq: i64) -> TemporalEvent {
        TemporalEvent {
            event_id: uuid::Uuid::new_v4(),
            action: crate::events::EventAction::Add,
            occurred_time: Utc::now() + chrono::Duration::microseconds(seq),
            sequence_number: seq,
            payload: EventPayload::User { user: LeafId::from(user) },
        }
    }

    #[tokio::test]
    async fn event_persister_buffer_tracks_highest_id_per_origin_before_threshold() {
        let target = InMemoryBulkPersister::new();
        let mut buf = EventPersisterBuffer::new(&target, 100);

        let ea = event_for("a1", 0);
        let eb = event_for("b1", 1);
        let checkpoint = buf.buffer_event(EventOrigin::A, ea.clone()).await.unwrap();
        assert_eq!(checkpoint.highest_a, Some(ea.event_id));
        assert_eq!(checkpoint.highest_b, None);

        let checkpoint = buf.buffer_event(EventOrigin::B, eb.clone()).await.unwrap();
        assert_eq!(checkpoint.highest_a, Some(ea.event_id));
        assert_eq!(checkpoint.highest_b, Some(eb.event_id));

        // Nothing has been flushed yet: the threshold hasn't been reached.
        assert!(collect_all_events(&target).await.unwrap().is_empty());
        buf.flush().await.unwrap();
        assert_eq!(collect_all_events(&target).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn event_persister_buffer_auto_flushes_at_threshold() {
        let target = InMemoryBulkPersister::new();
        let mut buf = EventPersisterBuffer::new(&target, 2);

        buf.buffer_event(EventOrigin::A, event_for("a1", 0)).await.unwrap();
        buf.buffer_event(EventOrigin::B, event_for("b1", 1)).await.unwrap();

        assert_eq!(collect_all_events(&target).await.unwrap().len(), 2);
    }
}
