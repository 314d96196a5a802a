//! Columnar row builder for bulk persistence.
//!
//! The source this crate is ported from drives staging tables by reflecting
//! over per-event subclasses; here a single constructor per `EventPayload`
//! variant produces a flat `EventRow`, and field-length limits (450
//! characters, matching the source's identifier column width) are enforced
//! here rather than left to the store to reject.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AccessError;
use crate::events::{EventAction, EventPayload, TemporalEvent};

/// Maximum length, in characters, of any identifier column staged for
/// bulk persistence.
pub const MAX_FIELD_LENGTH: usize = 450;

/// A flattened, column-validated view of a `TemporalEvent`, ready to bind
/// into a parameterized insert. `columns` holds `(name, value)` pairs in
/// the order the variant's constructor emits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    /// Globally unique event identifier.
    pub event_id: Uuid,
    /// Add or Remove.
    pub action: EventAction,
    /// UTC wall-clock time the event was accepted.
    pub occurred_time: DateTime<Utc>,
    /// Monotonic sequence number.
    pub sequence_number: i64,
    /// This row's bitemporal `TransactionTo`: the sentinel max date for a
    /// live (Add) row, or `occurred_time - TEMPORAL_EPSILON` for a Remove
    /// row's cascading invalidation point.
    pub transaction_to: DateTime<Utc>,
    /// Which staging table this row targets (one per `EventKind`).
    pub table: &'static str,
    /// Named column values, in declaration order.
    pub columns: Vec<(&'static str, String)>,
}

fn column(name: &'static str, value: impl Into<String>) -> Result<(&'static str, String), AccessError> {
    let value = value.into();
    if value.chars().count() > MAX_FIELD_LENGTH {
        return Err(AccessError::InvalidParameter(format!(
            "column '{name}' exceeds the {MAX_FIELD_LENGTH}-character staging limit"
        )));
    }
    Ok((name, value))
}

/// Build the staging row for a single event, validating every string column
/// against `MAX_FIELD_LENGTH` before it reaches the store.
pub fn build_row(event: &TemporalEvent) -> Result<EventRow, AccessError> {
    let (table, columns): (&'static str, Vec<(&'static str, String)>) = match &event.payload {
        EventPayload::User { user } => ("users", vec![column("user", user.to_string())?]),
        EventPayload::Group { group } => ("groups", vec![column("group", group.to_string())?]),
        EventPayload::UserToGroup { user, group } => (
            "user_to_group_mappings",
            vec![column("user", user.to_string())?, column("group", group.to_string())?],
        ),
        EventPayload::GroupToGroup { from, to } => (
            "group_to_group_mappings",
            vec![column("from_group", from.to_string())?, column("to_group", to.to_string())?],
        ),
        EventPayload::UserComponentAccess { user, component, level } => (
            "user_to_application_component_and_access_level_mappings",
            vec![
                column("user", user.to_string())?,
                column("component", component.to_string())?,
                column("level", level.to_string())?,
            ],
        ),
        EventPayload::GroupComponentAccess { group, component, level } => (
            "group_to_application_component_and_access_level_mappings",
            vec![
                column("group", group.to_string())?,
                column("component", component.to_string())?,
                column("level", level.to_string())?,
            ],
        ),
        EventPayload::EntityType { entity_type } => {
            ("entity_types", vec![column("entity_type", entity_type.to_string())?])
        }
        EventPayload::Entity { entity_type, entity } => (
            "entities",
            vec![column("entity_type", entity_type.to_string())?, column("entity", entity.to_string())?],
        ),
        EventPayload::UserToEntity { user, entity_type, entity } => (
            "user_to_entity_mappings",
            vec![
                column("user", user.to_string())?,
                column("entity_type", entity_type.to_string())?,
                column("entity", entity.to_string())?,
            ],
        ),
        EventPayload::GroupToEntity { group, entity_type, entity } => (
            "group_to_entity_mappings",
            vec![
                column("group", group.to_string())?,
                column("entity_type", entity_type.to_string())?,
                column("entity", entity.to_string())?,
            ],
        ),
    };

    let transaction_to = match event.action {
        EventAction::Add => super::sentinel_max_date(),
        EventAction::Remove => event.occurred_time - super::TEMPORAL_EPSILON,
    };

    Ok(EventRow {
        event_id: event.event_id,
        action: event.action,
        occurred_time: event.occurred_time,
        sequence_number: event.sequence_number,
        transaction_to,
        table,
        columns,
    })
}

/// Build and validate rows for a whole batch, failing fast on the first
/// over-length column so a bad event never reaches the store half-staged.
pub fn build_rows(events: &[TemporalEvent]) -> Result<Vec<EventRow>, AccessError> {
    events.iter().map(build_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LeafId;

    fn sample_event(user: &str) -> TemporalEvent {
        TemporalEvent {
            event_id: Uuid::new_v4(),
            action: EventAction::Add,
            occurred_time: Utc::now(),
            sequence_number: 0,
            payload: EventPayload::User { user: LeafId::from(user) },
        }
    }

    #[test]
    fn short_identifier_builds_a_row() {
        let row = build_row(&sample_event("alice")).unwrap();
        assert_eq!(row.table, "users");
        assert_eq!(row.columns, vec![("user", "alice".to_string())]);
    }

    #[test]
    fn add_row_carries_the_sentinel_transaction_to() {
        let row = build_row(&sample_event("alice")).unwrap();
        assert_eq!(row.transaction_to, super::super::sentinel_max_date());
    }

    #[test]
    fn remove_row_transaction_to_is_occurred_time_minus_epsilon() {
        let mut event = sample_event("alice");
        event.action = EventAction::Remove;
        let row = build_row(&event).unwrap();
        assert_eq!(row.transaction_to, event.occurred_time - super::super::TEMPORAL_EPSILON);
    }

    #[test]
    fn over_length_identifier_is_rejected_at_the_builder() {
        let long = "a".repeat(MAX_FIELD_LENGTH + 1);
        let err = build_row(&sample_event(&long)).unwrap_err();
        assert!(matches!(err, AccessError::InvalidParameter(_)));
    }

    #[test]
    fn exactly_the_limit_is_accepted() {
        let exact = "a".repeat(MAX_FIELD_LENGTH);
        build_row(&sample_event(&exact)).unwrap();
    }

    #[test]
    fn batch_build_fails_fast_on_first_bad_row() {
        let long = "a".repeat(MAX_FIELD_LENGTH + 1);
        let events = vec![sample_event("ok"), sample_event(&long)];
        assert!(build_rows(&events).is_err());
    }
}
