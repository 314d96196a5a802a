//! PostgreSQL `BulkPersister`: the bitemporal event store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! Events are appended to a single `temporal_events` table; the payload is
//! stored as JSON rather than normalized per-kind columns, since the kind
//! variety (ten element types) would otherwise demand ten near-identical
//! tables for no query benefit at this layer — callers needing per-kind
//! bitemporal rows reconstruct them by replaying the payload through
//! `events::apply_event_to`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use uuid::Uuid;

use super::{AccessManagerState, BulkPersister, LoadResult};
use crate::error::AccessError;
use crate::events::TemporalEvent;

/// Configuration for the PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/application_access".to_string()),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_lifetime_secs: std::env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// PostgreSQL-backed bulk persister.
pub struct PostgresBulkPersister {
    pool: PgPool,
}

impl PostgresBulkPersister {
    /// Create a new persister with the given configuration, running the
    /// schema migration if the table does not yet exist.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            "initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        let persister = Self { pool };
        persister.ensure_schema().await?;
        Ok(persister)
    }

    /// Create a persister from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS temporal_events (
                event_id UUID PRIMARY KEY,
                action TEXT NOT NULL,
                occurred_time TIMESTAMPTZ NOT NULL,
                sequence_number BIGINT NOT NULL,
                payload JSONB NOT NULL,
                transaction_sequence BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS temporal_events_order_idx \
             ON temporal_events (occurred_time, sequence_number)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<TemporalEvent, AccessError> {
        let event_id: Uuid = row.try_get("event_id").map_err(sql_err)?;
        let action_str: String = row.try_get("action").map_err(sql_err)?;
        let occurred_time: DateTime<Utc> = row.try_get("occurred_time").map_err(sql_err)?;
        let sequence_number: i64 = row.try_get("sequence_number").map_err(sql_err)?;
        let payload_json: serde_json::Value = row.try_get("payload").map_err(sql_err)?;

        let action = match action_str.as_str() {
            "add" => crate::events::EventAction::Add,
            "remove" => crate::events::EventAction::Remove,
            other => {
                return Err(AccessError::PersistenceFailure(format!(
                    "unrecognized event action '{other}'"
                )))
            }
        };
        let payload = serde_json::from_value(payload_json)
            .map_err(|e| AccessError::PersistenceFailure(format!("malformed event payload: {e}")))?;

        Ok(TemporalEvent { event_id, action, occurred_time, sequence_number, payload })
    }
}

fn sql_err(e: sqlx::Error) -> AccessError {
    AccessError::PersistenceFailure(e.to_string())
}

#[async_trait]
impl BulkPersister for PostgresBulkPersister {
    async fn persist_events(
        &self,
        events: Vec<TemporalEvent>,
        ignore_pre_existing: bool,
    ) -> Result<(), AccessError> {
        super::row_builder::build_rows(&events)?;
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        for event in events {
            // CreateEvent: reject any event whose occurred_time is strictly
            // less than the maximum already persisted, except on the
            // idempotent cross-shard copy path. A prior insert in this same
            // batch is visible to this query since it runs in the same
            // transaction.
            if !ignore_pre_existing {
                let max_time: Option<DateTime<Utc>> =
                    sqlx::query_scalar("SELECT MAX(occurred_time) FROM temporal_events")
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(sql_err)?;
                if let Some(max_time) = max_time {
                    if event.occurred_time < max_time {
                        return Err(AccessError::InvalidParameter(format!(
                            "event '{}' has occurred_time '{}' earlier than the maximum already persisted time '{max_time}'",
                            event.event_id, event.occurred_time
                        )));
                    }
                }
            }

            // CreateEvent: TransactionSequence is 0 for a new distinct
            // occurred_time, else the previous sequence at that time + 1.
            let prev_sequence: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(transaction_sequence) FROM temporal_events WHERE occurred_time = $1",
            )
            .bind(event.occurred_time)
            .fetch_one(&mut *tx)
            .await
            .map_err(sql_err)?;
            let transaction_sequence = prev_sequence.map_or(0, |prev| prev + 1);

            let action_str = match event.action {
                crate::events::EventAction::Add => "add",
                crate::events::EventAction::Remove => "remove",
            };
            let payload_json = serde_json::to_value(&event.payload)
                .map_err(|e| AccessError::PersistenceFailure(e.to_string()))?;

            let query = if ignore_pre_existing {
                "INSERT INTO temporal_events \
                 (event_id, action, occurred_time, sequence_number, payload, transaction_sequence) \
                 VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (event_id) DO NOTHING"
            } else {
                "INSERT INTO temporal_events \
                 (event_id, action, occurred_time, sequence_number, payload, transaction_sequence) \
                 VALUES ($1, $2, $3, $4, $5, $6)"
            };

            sqlx::query(query)
                .bind(event.event_id)
                .bind(action_str)
                .bind(event.occurred_time)
                .bind(event.sequence_number)
                .bind(payload_json)
                .bind(transaction_sequence)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if !ignore_pre_existing && e.to_string().contains("duplicate key") {
                        AccessError::PersistenceFailure(format!(
                            "event '{}' already persisted",
                            event.event_id
                        ))
                    } else {
                        sql_err(e)
                    }
                })?;
        }
        tx.commit().await.map_err(sql_err)?;
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

        let rows = sqlx::query(
            "SELECT event_id, action, occurred_time, sequence_number, payload, transaction_sequence \
             FROM temporal_events WHERE occurred_time <= $1 ORDER BY occurred_time, sequence_number",
        )
        .bind(state_time)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)?;

        if rows.is_empty() {
            return Err(AccessError::PersistentStorageEmpty);
        }
        let last_transaction_sequence: i64 = rows.last().unwrap().try_get("transaction_sequence").map_err(sql_err)?;
        let events = rows.iter().map(Self::row_to_event).collect::<Result<Vec<_>, _>>()?;
        let last = events.last().unwrap();
        Ok(LoadResult {
            state: AccessManagerState {
                last_event_id: last.event_id,
                transaction_time: last.occurred_time,
                transaction_sequence: last_transaction_sequence,
            },
            events,
        })
    }

    async fn load_at_event(&self, event_id: Uuid) -> Result<LoadResult, AccessError> {
        let anchor = sqlx::query("SELECT occurred_time FROM temporal_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?
            .ok_or_else(|| AccessError::ElementNotFound(format!("event '{event_id}'")))?;
        let cut: DateTime<Utc> = anchor.try_get("occurred_time").map_err(sql_err)?;
        self.load(Some(cut)).await
    }

    async fn get_initial_event(&self) -> Result<Option<TemporalEvent>, AccessError> {
        let row = sqlx::query(
            "SELECT event_id, action, occurred_time, sequence_number, payload FROM temporal_events \
             ORDER BY occurred_time, sequence_number LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn get_next_event_after(&self, event_id: Uuid) -> Result<Option<TemporalEvent>, AccessError> {
        let anchor = sqlx::query("SELECT occurred_time, sequence_number FROM temporal_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?
            .ok_or_else(|| AccessError::ElementNotFound(format!("event '{event_id}'")))?;
        let occurred_time: DateTime<Utc> = anchor.try_get("occurred_time").map_err(sql_err)?;
        let sequence_number: i64 = anchor.try_get("sequence_number").map_err(sql_err)?;

        let row = sqlx::query(
            "SELECT event_id, action, occurred_time, sequence_number, payload FROM temporal_events \
             WHERE (occurred_time, sequence_number) > ($1, $2) \
             ORDER BY occurred_time, sequence_number LIMIT 1",
        )
        .bind(occurred_time)
        .bind(sequence_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn get_events(&self, from: Uuid, to: Option<Uuid>) -> Result<Vec<TemporalEvent>, AccessError> {
        let from_anchor = sqlx::query("SELECT occurred_time, sequence_number FROM temporal_events WHERE event_id = $1")
            .bind(from)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?
            .ok_or_else(|| AccessError::ElementNotFound(format!("event '{from}'")))?;
        let from_time: DateTime<Utc> = from_anchor.try_get("occurred_time").map_err(sql_err)?;
        let from_seq: i64 = from_anchor.try_get("sequence_number").map_err(sql_err)?;

        let rows = if let Some(to) = to {
            let to_anchor = sqlx::query("SELECT occurred_time, sequence_number FROM temporal_events WHERE event_id = $1")
                .bind(to)
                .fetch_optional(&self.pool)
                .await
                .map_err(sql_err)?
                .ok_or_else(|| AccessError::ElementNotFound(format!("event '{to}'")))?;
            let to_time: DateTime<Utc> = to_anchor.try_get("occurred_time").map_err(sql_err)?;
            let to_seq: i64 = to_anchor.try_get("sequence_number").map_err(sql_err)?;

            sqlx::query(
                "SELECT event_id, action, occurred_time, sequence_number, payload FROM temporal_events \
                 WHERE (occurred_time, sequence_number) >= ($1, $2) AND (occurred_time, sequence_number) <= ($3, $4) \
                 ORDER BY occurred_time, sequence_number",
            )
            .bind(from_time)
            .bind(from_seq)
            .bind(to_time)
            .bind(to_seq)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?
        } else {
            sqlx::query(
                "SELECT event_id, action, occurred_time, sequence_number, payload FROM temporal_events \
                 WHERE (occurred_time, sequence_number) >= ($1, $2) \
                 ORDER BY occurred_time, sequence_number",
            )
            .bind(from_time)
            .bind(from_seq)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?
        };

        rows.iter().map(Self::row_to_event).collect()
    }
}
