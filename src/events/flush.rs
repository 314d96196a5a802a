//! Flush Strategy (component E): trip-switch-style flush triggering.

use std::time::Duration;

/// Which policy decides when the event buffer should flush.
#[derive(Debug, Clone)]
pub enum FlushStrategy {
    /// Flush when any one queue exceeds `buffer_size_limit`.
    SizeBased { buffer_size_limit: usize },
    /// Flush every `flush_loop_interval`.
    Periodic { flush_loop_interval: Duration },
    /// Flush on whichever of the two triggers first.
    Combined { buffer_size_limit: usize, flush_loop_interval: Duration },
}

impl FlushStrategy {
    /// Whether a just-appended queue of length `queue_len` should trigger an
    /// immediate flush under this strategy.
    pub fn should_flush_on_write(&self, queue_len: usize) -> bool {
        match self {
            Self::SizeBased { buffer_size_limit } | Self::Combined { buffer_size_limit, .. } => {
                queue_len > *buffer_size_limit
            }
            Self::Periodic { .. } => false,
        }
    }

    /// The periodic wait interval, if this strategy has one.
    pub fn periodic_interval(&self) -> Option<Duration> {
        match self {
            Self::SizeBased { .. } => None,
            Self::Periodic { flush_loop_interval } | Self::Combined { flush_loop_interval, .. } => {
                Some(*flush_loop_interval)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_based_triggers_past_limit() {
        let s = FlushStrategy::SizeBased { buffer_size_limit: 3 };
        assert!(!s.should_flush_on_write(3));
        assert!(s.should_flush_on_write(4));
    }

    #[test]
    fn periodic_never_triggers_on_write() {
        let s = FlushStrategy::Periodic { flush_loop_interval: Duration::from_millis(50) };
        assert!(!s.should_flush_on_write(1_000_000));
        assert_eq!(s.periodic_interval(), Some(Duration::from_millis(50)));
    }
}
