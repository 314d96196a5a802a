//! Mutation observer chain.
//!
//! The source wraps every mutation in an `Action<>` callback purely so a
//! metrics layer can see begin/end/cancel/count/status without the mutation
//! itself knowing metrics exist. Here that becomes a small observer trait
//! dispatched by `ConcurrentAccessManager` around each write; the default
//! implementation logs through `tracing`, matching this crate's other
//! ambient-metrics code (`service::middleware::metrics_middleware`).

use std::time::{Duration, Instant};

use tracing::info;

/// Hooks a `ConcurrentAccessManager` write calls around every mutation.
/// Implementors are cheap to clone-share (`Arc<dyn MutationObserver>`) and
/// must not block, since they run inside the mutation's lock-held section.
pub trait MutationObserver: Send + Sync {
    /// Called immediately before a mutation acquires its locks.
    fn on_begin(&self, _operation: &str) {}

    /// Called after a mutation completes, successfully or not.
    fn on_end(&self, _operation: &str, _elapsed: Duration) {}

    /// Called instead of `on_end` when the caller's cancellation signal
    /// fired before the mutation ran (used by cancellable blocking points,
    /// long-running mutations).
    fn on_cancel(&self, _operation: &str) {}

    /// Called with the number of elements affected, for mutations that
    /// naturally produce a count (e.g. a cascaded remove).
    fn on_count(&self, _operation: &str, _count: u64) {}

    /// Called with the final success/failure outcome.
    fn on_status(&self, _operation: &str, _success: bool) {}
}

/// Default observer: every hook becomes a structured `tracing` event at
/// `debug` (begin/count) or `info` (end/status) level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMutationObserver;

impl MutationObserver for TracingMutationObserver {
    fn on_begin(&self, operation: &str) {
        tracing::debug!(target: "application_access::mutations", operation, "mutation_begin");
    }

    fn on_end(&self, operation: &str, elapsed: Duration) {
        info!(
            target: "application_access::mutations",
            operation,
            elapsed_us = elapsed.as_micros() as u64,
            "mutation_end"
        );
    }

    fn on_cancel(&self, operation: &str) {
        tracing::warn!(target: "application_access::mutations", operation, "mutation_cancelled");
    }

    fn on_count(&self, operation: &str, count: u64) {
        tracing::debug!(target: "application_access::mutations", operation, count, "mutation_count");
    }

    fn on_status(&self, operation: &str, success: bool) {
        info!(target: "application_access::mutations", operation, success, "mutation_status");
    }
}

/// Fans every hook out to an ordered list of observers, so a caller can
/// attach metrics, audit logging, and tests' probe observers side by side.
#[derive(Default)]
pub struct ObserverChain {
    observers: Vec<std::sync::Arc<dyn MutationObserver>>,
}

impl ObserverChain {
    /// An empty chain (no observation overhead beyond the call itself).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer to the chain.
    pub fn push(&mut self, observer: std::sync::Arc<dyn MutationObserver>) {
        self.observers.push(observer);
    }

    /// Run `f`, reporting `on_begin`/`on_end`/`on_status` to every observer
    /// in the chain in order. Returns `f`'s result unchanged.
    pub fn observe<T, E>(&self, operation: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        for o in &self.observers {
            o.on_begin(operation);
        }
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        for o in &self.observers {
            o.on_end(operation, elapsed);
            o.on_status(operation, result.is_ok());
        }
        result
    }
}

impl std::fmt::Debug for ObserverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverChain").field("len", &self.observers.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingObserver {
        begins: AtomicUsize,
        ends: AtomicUsize,
        statuses: AtomicUsize,
    }

    impl MutationObserver for CountingObserver {
        fn on_begin(&self, _operation: &str) {
            self.begins.fetch_add(1, Ordering::SeqCst);
        }
        fn on_end(&self, _operation: &str, _elapsed: Duration) {
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
        fn on_status(&self, _operation: &str, _success: bool) {
            self.statuses.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn chain_notifies_every_observer_once_per_call() {
        let probe = Arc::new(CountingObserver::default());
        let mut chain = ObserverChain::new();
        chain.push(probe.clone());
        chain.push(Arc::new(TracingMutationObserver));

        let result: Result<i32, &'static str> = chain.observe("add_user", || Ok(42));
        assert_eq!(result, Ok(42));
        assert_eq!(probe.begins.load(Ordering::SeqCst), 1);
        assert_eq!(probe.ends.load(Ordering::SeqCst), 1);
        assert_eq!(probe.statuses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chain_still_reports_status_on_failure() {
        let probe = Arc::new(CountingObserver::default());
        let mut chain = ObserverChain::new();
        chain.push(probe.clone());

        let result: Result<i32, &'static str> = chain.observe("remove_user", || Err("boom"));
        assert_eq!(result, Err("boom"));
        assert_eq!(probe.statuses.load(Ordering::SeqCst), 1);
    }
}
