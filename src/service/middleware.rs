//! Service middleware for request metrics.
//!
//! Metrics are logged via `tracing` rather than exported to a metrics
//! backend directly, matching the rest of the ambient stack.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Records request count and latency per normalized path.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "application_access::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Replace path segments that look like identifiers (users, groups,
/// entities) with a placeholder, to keep metric cardinality bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.is_empty()
                || matches!(
                    segment,
                    "users" | "groups" | "entities" | "hasAccess" | "health" | "admin" | "events"
                        | "tripswitch" | "live" | "ready" | "startup" | "reset"
                )
            {
                segment.to_string()
            } else {
                ":id".to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Records trip-switch resets, for the admin endpoint.
pub fn record_tripswitch_reset() {
    info!(target: "application_access::metrics", metric_type = "tripswitch_reset", "tripswitch_reset_metric");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_replaces_dynamic_segment() {
        assert_eq!(normalize_path("/users/alice/hasAccess"), "/users/:id/hasAccess");
    }

    #[test]
    fn normalize_path_preserves_static_path() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
    }
}
