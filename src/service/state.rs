//! Service state management.
//!
//! Wraps the write path (a `PersisterBuffer` over a shared
//! `ConcurrentAccessManager`) so route handlers share one access graph and
//! one event pipeline per process.

use std::sync::Arc;

use crate::concurrency::ConcurrentAccessManager;
use crate::persistence::{BulkPersister, PersisterBuffer};

/// Shared service state, generic over the concrete bulk persister backend.
pub struct ServiceState<P: BulkPersister> {
    /// Shared lock-discipline wrapper over the access graph.
    pub access: Arc<ConcurrentAccessManager>,
    /// Event buffer + bulk persister for the write path.
    pub buffer: Arc<PersisterBuffer<P>>,
}

impl<P: BulkPersister> ServiceState<P> {
    /// Build service state over a shared access manager and persister buffer.
    pub fn new(access: Arc<ConcurrentAccessManager>, buffer: Arc<PersisterBuffer<P>>) -> Self {
        Self { access, buffer }
    }
}

impl<P: BulkPersister> Clone for ServiceState<P> {
    fn clone(&self) -> Self {
        Self {
            access: Arc::clone(&self.access),
            buffer: Arc::clone(&self.buffer),
        }
    }
}
