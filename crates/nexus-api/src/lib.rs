//! # Nexus API
//!
//! Authenticated REST surface over the runtime managers. Handlers are
//! thin adapters; the middleware chain is authenticate ->
//! authorize(permission) -> handler with per-route permissions as data.

pub mod error;
pub mod manager;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use manager::ApiManager;
pub use middleware::{CurrentUser, RateLimiter};
pub use routes::router;
pub use state::{route_permissions, ApiState};
