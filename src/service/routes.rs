//! Axum routes for the access service.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::access_manager::{AccessLevel, ApplicationComponent, EntityType};
use crate::error::AccessError;
use crate::events::{EventAction, EventPayload};
use crate::graph::{LeafId, NonLeafId};
use crate::persistence::BulkPersister;

use super::state::ServiceState;

/// Type alias binding the service to its concrete persister at the router
/// construction boundary; callers pick the backend when they build state.
pub type AppState<P> = ServiceState<P>;

#[derive(Debug, Deserialize)]
pub struct HasAccessQuery {
    pub component: String,
    pub level: String,
}

#[derive(Debug, Serialize)]
pub struct HasAccessResponse {
    pub has_access: bool,
}

#[derive(Debug, Serialize)]
pub struct EntitiesResponse {
    pub entities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingEvent {
    pub action: EventAction,
    pub payload: EventPayload,
}

#[derive(Debug, Deserialize)]
pub struct EventsRequest {
    pub events: Vec<IncomingEvent>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub accepted: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&AccessError> for ErrorBody {
    fn from(e: &AccessError) -> Self {
        Self { error: e.to_string() }
    }
}

fn error_response(e: AccessError) -> (StatusCode, Json<ErrorBody>) {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody::from(&e)))
}

async fn user_has_access_handler<P: BulkPersister>(
    State(state): State<Arc<AppState<P>>>,
    Path(user): Path<String>,
    Query(q): Query<HasAccessQuery>,
) -> Json<HasAccessResponse> {
    let has_access = state.access.has_access_to_application_component(
        &LeafId::from(user),
        &ApplicationComponent::from(q.component),
        &AccessLevel::from(q.level),
    );
    Json(HasAccessResponse { has_access })
}

async fn group_has_access_handler<P: BulkPersister>(
    State(state): State<Arc<AppState<P>>>,
    Path(group): Path<String>,
    Query(q): Query<HasAccessQuery>,
) -> Json<HasAccessResponse> {
    let has_access = state
        .access
        .get_application_components_accessible_by_group(&NonLeafId::from(group))
        .contains(&(ApplicationComponent::from(q.component), AccessLevel::from(q.level)));
    Json(HasAccessResponse { has_access })
}

async fn user_entities_handler<P: BulkPersister>(
    State(state): State<Arc<AppState<P>>>,
    Path((user, entity_type)): Path<(String, String)>,
) -> Result<Json<EntitiesResponse>, (StatusCode, Json<ErrorBody>)> {
    let entities = state
        .access
        .get_accessible_entities(&LeafId::from(user), &EntityType::from(entity_type))
        .map_err(error_response)?;
    Ok(Json(EntitiesResponse {
        entities: entities.into_iter().map(|e| e.0).collect(),
    }))
}

async fn group_entities_handler<P: BulkPersister>(
    State(state): State<Arc<AppState<P>>>,
    Path((group, entity_type)): Path<(String, String)>,
) -> Result<Json<EntitiesResponse>, (StatusCode, Json<ErrorBody>)> {
    let entities = state
        .access
        .get_accessible_entities_for_group(&NonLeafId::from(group), &EntityType::from(entity_type))
        .map_err(error_response)?;
    Ok(Json(EntitiesResponse {
        entities: entities.into_iter().map(|e| e.0).collect(),
    }))
}

async fn post_events_handler<P: BulkPersister>(
    State(state): State<Arc<AppState<P>>>,
    Json(request): Json<EventsRequest>,
) -> Result<Json<EventsResponse>, (StatusCode, Json<ErrorBody>)> {
    let mut accepted = 0;
    for incoming in request.events {
        state
            .buffer
            .submit_payload(incoming.action, incoming.payload)
            .await
            .map_err(error_response)?;
        accepted += 1;
    }
    Ok(Json(EventsResponse { accepted }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", version: env!("CARGO_PKG_VERSION") })
}

async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readiness_handler<P: BulkPersister>(State(state): State<Arc<AppState<P>>>) -> impl IntoResponse {
    if state.buffer.is_tripped() {
        (StatusCode::SERVICE_UNAVAILABLE, "trip switch engaged")
    } else {
        (StatusCode::OK, "ready")
    }
}

async fn startup_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct TripswitchResetResponse {
    pub reset: bool,
}

async fn tripswitch_reset_handler<P: BulkPersister>(
    State(state): State<Arc<AppState<P>>>,
) -> Json<TripswitchResetResponse> {
    state.buffer.reset_trip_switch();
    Json(TripswitchResetResponse { reset: true })
}

/// Build the router for a concrete persister backend.
pub fn create_router<P: BulkPersister + 'static>(state: AppState<P>) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/users/:user/hasAccess", get(user_has_access_handler::<P>))
        .route("/users/:user/entities/:entity_type", get(user_entities_handler::<P>))
        .route("/groups/:group/hasAccess", get(group_has_access_handler::<P>))
        .route("/groups/:group/entities/:entity_type", get(group_entities_handler::<P>))
        .route("/events", post(post_events_handler::<P>))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<P>))
        .route("/health/startup", get(startup_handler))
        .route("/admin/tripswitch/reset", post(tripswitch_reset_handler::<P>))
        .with_state(state)
}
