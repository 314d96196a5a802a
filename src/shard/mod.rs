//! Shard Configuration Set and Operation Router (components H and I).

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use xxhash_rust::xxh64::xxh64;

use crate::error::AccessError;
use crate::persistence::sentinel_max_date;

/// Which kind of data element a shard-configuration entry routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataElementType {
    User,
    Group,
    GroupToGroupMapping,
}

/// Whether a routed request is a read (`Query`) or a write (`Event`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationType {
    Query,
    Event,
}

/// A single hash-range routing entry, bitemporally versioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfigurationEntry {
    pub data_element_type: DataElementType,
    pub operation_type: OperationType,
    pub hash_range_start: i32,
    pub client_configuration: Value,
    pub transaction_from: DateTime<Utc>,
    pub transaction_to: DateTime<Utc>,
}

impl ShardConfigurationEntry {
    fn is_live(&self) -> bool {
        self.transaction_to == sentinel_max_date()
    }
}

/// Stable routing hash used to pick a shard for `element`.
pub fn stable_hash(element: &str) -> i32 {
    (xxh64(element.as_bytes(), 0) as i32).wrapping_abs()
}

type PartitionKey = (DataElementType, OperationType);

/// Key-range routing table with full temporal history.
///
/// Invariant: for each `(DataElementType, OperationType)` partition, every
/// hash in `[i32::MIN, i32::MAX]` is covered by exactly one live entry.
#[derive(Default)]
pub struct ShardConfigurationSet {
    /// All entries ever inserted, live or invalidated.
    history: RwLock<Vec<ShardConfigurationEntry>>,
    /// Exclusive lock serializing `update` calls.
    update_lock: Mutex<()>,
}

impl ShardConfigurationSet {
    /// Create an empty configuration set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The unique live entry covering `hash` in the given partition: the
    /// live entry with the largest `hash_range_start <= hash`.
    pub fn query(
        &self,
        data_element_type: DataElementType,
        operation_type: OperationType,
        hash: i32,
    ) -> Option<ShardConfigurationEntry> {
        let key: PartitionKey = (data_element_type, operation_type);
        self.history
            .read()
            .iter()
            .filter(|e| (e.data_element_type, e.operation_type) == key && e.is_live() && e.hash_range_start <= hash)
            .max_by_key(|e| e.hash_range_start)
            .cloned()
    }

    /// Batch-atomic update: optionally invalidates every currently-live
    /// entry (`delete_existing`), then inserts `entries` with
    /// `transaction_from = now`, `transaction_to = +inf`. Runs under the
    /// configuration store's single exclusive lock.
    pub fn update(&self, entries: Vec<(DataElementType, OperationType, i32, Value)>, delete_existing: bool) {
        let _guard = self.update_lock.lock();
        let now = Utc::now();
        let mut history = self.history.write();

        if delete_existing {
            for e in history.iter_mut() {
                if e.is_live() {
                    e.transaction_to = now;
                }
            }
        } else {
            // Deduplicate against matching (type, op, range_start) keys.
            for (data_element_type, operation_type, hash_range_start, _) in &entries {
                for e in history.iter_mut() {
                    if e.is_live()
                        && e.data_element_type == *data_element_type
                        && e.operation_type == *operation_type
                        && e.hash_range_start == *hash_range_start
                    {
                        e.transaction_to = now;
                    }
                }
            }
        }

        for (data_element_type, operation_type, hash_range_start, client_configuration) in entries {
            history.push(ShardConfigurationEntry {
                data_element_type,
                operation_type,
                hash_range_start,
                client_configuration,
                transaction_from: now,
                transaction_to: sentinel_max_date(),
            });
        }
    }

    /// Live entries for a partition, ordered by `hash_range_start`, used to
    /// check the full-coverage invariant in tests.
    pub fn live_entries(&self, data_element_type: DataElementType, operation_type: OperationType) -> Vec<ShardConfigurationEntry> {
        let key: PartitionKey = (data_element_type, operation_type);
        let mut entries: Vec<_> = self
            .history
            .read()
            .iter()
            .filter(|e| (e.data_element_type, e.operation_type) == key && e.is_live())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.hash_range_start);
        entries
    }
}

/// A routing override installed by `SwitchOn`, directing a sub-range of
/// hashes to a second destination during cutover.
#[derive(Debug, Clone)]
struct RoutingOverride {
    range_start: i32,
    range_end: i32,
    target: Value,
}

/// Routes requests by `stable_hash(element)` to a shard-group's client
/// configuration, with pause/resume and a temporary cutover override.
pub struct OperationRouter {
    config: std::sync::Arc<ShardConfigurationSet>,
    paused: AtomicBool,
    override_: RwLock<Option<RoutingOverride>>,
}

impl OperationRouter {
    /// Create a router over a shared configuration set.
    pub fn new(config: std::sync::Arc<ShardConfigurationSet>) -> Self {
        Self { config, paused: AtomicBool::new(false), override_: RwLock::new(None) }
    }

    /// Resolve the client configuration that `element` should be routed to
    /// for the given data element / operation kind. Fails with
    /// `ServiceUnavailable` while paused.
    pub fn route(
        &self,
        data_element_type: DataElementType,
        operation_type: OperationType,
        element: &str,
    ) -> Result<Value, AccessError> {
        if self.paused.load(Ordering::SeqCst) {
            return Err(AccessError::ServiceUnavailable);
        }
        let hash = stable_hash(element);

        if let Some(over) = self.override_.read().as_ref() {
            if hash >= over.range_start && hash <= over.range_end {
                return Ok(over.target.clone());
            }
        }

        self.config
            .query(data_element_type, operation_type, hash)
            .map(|e| e.client_configuration)
            .ok_or_else(|| AccessError::InvalidParameter(format!("no live shard configuration covers hash {hash}")))
    }

    /// Stall new requests; in-flight requests are unaffected by this flag.
    pub fn pause_operations(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume routing.
    pub fn resume_operations(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Temporarily route `[range_start, range_end]` to `target`, in addition
    /// to (or instead of) the primary, for cutover.
    pub fn switch_on(&self, range_start: i32, range_end: i32, target: Value) {
        *self.override_.write() = Some(RoutingOverride { range_start, range_end, target });
    }

    /// Clear the cutover override.
    pub fn switch_off(&self) {
        *self.override_.write() = None;
    }

    /// Whether the router is currently paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_picks_largest_start_not_exceeding_hash() {
        let set = ShardConfigurationSet::new();
        set.update(
            vec![
                (DataElementType::User, OperationType::Query, i32::MIN, json!("shard-a")),
                (DataElementType::User, OperationType::Query, 0, json!("shard-b")),
            ],
            false,
        );

        let hit = set.query(DataElementType::User, OperationType::Query, -1).unwrap();
        assert_eq!(hit.client_configuration, json!("shard-a"));
        let hit = set.query(DataElementType::User, OperationType::Query, 1).unwrap();
        assert_eq!(hit.client_configuration, json!("shard-b"));
    }

    #[test]
    fn update_with_delete_existing_invalidates_old_rows() {
        let set = ShardConfigurationSet::new();
        set.update(vec![(DataElementType::User, OperationType::Query, i32::MIN, json!("old"))], false);
        set.update(vec![(DataElementType::User, OperationType::Query, i32::MIN, json!("new"))], true);

        let live = set.live_entries(DataElementType::User, OperationType::Query);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].client_configuration, json!("new"));
    }

    #[test]
    fn router_pause_blocks_routing() {
        let set = std::sync::Arc::new(ShardConfigurationSet::new());
        set.update(vec![(DataElementType::User, OperationType::Query, i32::MIN, json!("shard-a"))], false);
        let router = OperationRouter::new(set);

        router.pause_operations();
        let err = router.route(DataElementType::User, OperationType::Query, "alice").unwrap_err();
        assert!(matches!(err, AccessError::ServiceUnavailable));

        router.resume_operations();
        assert!(router.route(DataElementType::User, OperationType::Query, "alice").is_ok());
    }

    #[test]
    fn switch_on_overrides_sub_range() {
        let set = std::sync::Arc::new(ShardConfigurationSet::new());
        set.update(vec![(DataElementType::User, OperationType::Query, i32::MIN, json!("primary"))], false);
        let router = OperationRouter::new(set);

        let hash = stable_hash("alice");
        router.switch_on(hash, hash, json!("secondary"));
        let routed = router.route(DataElementType::User, OperationType::Query, "alice").unwrap();
        assert_eq!(routed, json!("secondary"));

        router.switch_off();
        let routed = router.route(DataElementType::User, OperationType::Query, "alice").unwrap();
        assert_eq!(routed, json!("primary"));
    }
}
