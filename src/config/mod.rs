//! Environment-driven configuration for the ambient concerns named in
//! environment-driven configuration: error surfacing, telemetry export, and event-buffer flushing.
//! Follows the same `from_env()` convention as [`crate::persistence::postgres::PostgresConfig`].

use std::time::Duration;

use crate::events::flush::FlushStrategy;

/// Recognized keys: `{IncludeInnerExceptions, OverrideInternalServerErrors,
/// InternalServerErrorMessageOverride}`.
#[derive(Debug, Clone)]
pub struct ErrorHandlingConfig {
    /// Include the source error chain in the HTTP error body.
    pub include_inner_exceptions: bool,
    /// Replace 500 responses with a fixed message.
    pub override_internal_server_errors: bool,
    /// The fixed message to use when overriding.
    pub internal_server_error_message_override: Option<String>,
}

impl ErrorHandlingConfig {
    /// Load from environment variables with conservative defaults.
    pub fn from_env() -> Self {
        Self {
            include_inner_exceptions: env_bool("ERROR_INCLUDE_INNER_EXCEPTIONS", false),
            override_internal_server_errors: env_bool("ERROR_OVERRIDE_INTERNAL_SERVER_ERRORS", false),
            internal_server_error_message_override: std::env::var("ERROR_INTERNAL_SERVER_ERROR_MESSAGE_OVERRIDE").ok(),
        }
    }
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Export protocol for the telemetry exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtelProtocol {
    HttpProtobuf,
    Grpc,
}

/// Recognized keys: `{Protocol, Endpoint, Timeout=10s, Headers="",
/// ExporterTimeout=30s, MaxExportBatchSize=512, MaxQueueSize=2048,
/// ScheduledDelay=5s}`.
#[derive(Debug, Clone)]
pub struct OtelConfig {
    pub protocol: OtelProtocol,
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub headers: String,
    pub exporter_timeout: Duration,
    pub max_export_batch_size: usize,
    pub max_queue_size: usize,
    pub scheduled_delay: Duration,
}

impl OtelConfig {
    /// Load from environment variables with conservative defaults.
    pub fn from_env() -> Self {
        let protocol = match std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL").ok().as_deref() {
            Some("grpc") => OtelProtocol::Grpc,
            _ => OtelProtocol::HttpProtobuf,
        };
        Self {
            protocol,
            endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            timeout: env_secs("OTEL_EXPORTER_OTLP_TIMEOUT", 10),
            headers: std::env::var("OTEL_EXPORTER_OTLP_HEADERS").unwrap_or_default(),
            exporter_timeout: env_secs("OTEL_EXPORTER_TIMEOUT", 30),
            max_export_batch_size: env_usize("OTEL_MAX_EXPORT_BATCH_SIZE", 512),
            max_queue_size: env_usize("OTEL_MAX_QUEUE_SIZE", 2048),
            scheduled_delay: env_secs("OTEL_SCHEDULED_DELAY", 5),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Recognized keys: `{BufferImplementation, BufferSizeLimit,
/// FlushLoopInterval}`.
#[derive(Debug, Clone)]
pub struct EventBufferFlushingConfig {
    pub buffer_implementation: String,
    pub buffer_size_limit: usize,
    pub flush_loop_interval: Duration,
}

impl EventBufferFlushingConfig {
    /// Load from environment variables; defaults to the combined strategy.
    pub fn from_env() -> Self {
        Self {
            buffer_implementation: std::env::var("FLUSH_BUFFER_IMPLEMENTATION")
                .unwrap_or_else(|_| "combined".to_string()),
            buffer_size_limit: env_usize("FLUSH_BUFFER_SIZE_LIMIT", 200),
            flush_loop_interval: Duration::from_millis(env_u64("FLUSH_LOOP_INTERVAL_MS", 2_000)),
        }
    }

    /// Build the concrete `FlushStrategy` named by `buffer_implementation`.
    pub fn into_strategy(self) -> FlushStrategy {
        match self.buffer_implementation.as_str() {
            "size" => FlushStrategy::SizeBased { buffer_size_limit: self.buffer_size_limit },
            "periodic" => FlushStrategy::Periodic { flush_loop_interval: self.flush_loop_interval },
            _ => FlushStrategy::Combined {
                buffer_size_limit: self.buffer_size_limit,
                flush_loop_interval: self.flush_loop_interval,
            },
        }
    }
}

impl Default for EventBufferFlushingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(key, default_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flush_strategy_is_combined() {
        std::env::remove_var("FLUSH_BUFFER_IMPLEMENTATION");
        let strategy = EventBufferFlushingConfig::from_env().into_strategy();
        assert!(matches!(strategy, FlushStrategy::Combined { .. }));
    }
}
