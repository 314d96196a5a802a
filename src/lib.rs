//! # application-access
//!
//! Distributed authorization service answering two questions against an
//! evolving policy graph of users, groups, group-to-group inheritance, and
//! entity bindings:
//!
//! > Does user U have access to application component C at access level A?
//! > Which entities of a given type can user U access?
//!
//! ## Architecture
//!
//! ```text
//! HTTP boundary (service) → PersisterBuffer (write path) → ConcurrentAccessManager
//!                                  ↓                              ↓
//!                            BulkPersister                   AccessManager
//!                        (memory | postgres)               (DirectedGraph)
//! ```
//!
//! Writes are validated against the in-memory graph, turned into
//! `TemporalEvent`s, buffered, and flushed to the bulk persister per a
//! configurable strategy. Shard groups route reads and writes by a stable
//! hash of the element key, and can be split or merged online without
//! losing or duplicating events.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access_manager;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod persistence;
pub mod redistribution;
pub mod shard;

#[cfg(feature = "service")]
pub mod service;

pub use access_manager::{AccessLevel, AccessManager, ApplicationComponent, Entity, EntityType};
pub use concurrency::{ConcurrentAccessManager, LockSet};
pub use error::AccessError;
pub use events::{EventAction, EventBuffer, EventKind, EventPayload, EventSequencer, TemporalEvent};
pub use graph::{DirectedGraph, LeafId, NonLeafId, VisitControl};
pub use persistence::{BulkPersister, InMemoryBulkPersister, LoadResult, PersisterBuffer};
#[cfg(feature = "postgres")]
pub use persistence::{PostgresBulkPersister, PostgresConfig};
pub use shard::{DataElementType, OperationRouter, OperationType, ShardConfigurationSet};

#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

/// Schema version for the durable event log, bumped on breaking changes to
/// `TemporalEvent`'s wire shape.
pub const EVENT_LOG_SCHEMA_VERSION: &str = "1.0.0";
