//! ApplicationAccess REST service.
//!
//! ## Endpoints
//!
//! - `GET /users/{u}/hasAccess?component=&level=`
//! - `GET /users/{u}/entities/{type}`
//! - `GET /groups/{g}/hasAccess?component=&level=`
//! - `GET /groups/{g}/entities/{type}`
//! - `POST /events` - batched `TemporalEvent` submission
//! - `GET /health`, `/health/live`, `/health/ready`, `/health/startup`
//! - `POST /admin/tripswitch/reset`

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::metrics_middleware;
pub use routes::{create_router, AppState};
pub use state::ServiceState;
