//! Router assembly: public endpoints, the authenticated `/api/v1`
//! surface, and operational endpoints.

pub mod auth;
pub mod monitoring;
pub mod plugins;
pub mod system;
pub mod users;

use crate::middleware::{authenticate, rate_limit, RateLimiter};
use crate::state::ApiState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use nexus_config::schema::ApiSection;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// `GET /`
async fn root(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": state.app_name,
        "version": state.app_version,
        "docs_url": "/docs",
    }))
}

/// `GET /health`
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "healthy": true }))
}

/// `GET /metrics` (Prometheus text format)
async fn metrics(State(state): State<ApiState>) -> Result<String, StatusCode> {
    let enabled = state
        .config
        .get("monitoring.prometheus.enabled")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !enabled {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(state.monitor.registry().render_prometheus())
}

fn cors_layer(section: &ApiSection) -> CorsLayer {
    use axum::http::{HeaderName, HeaderValue, Method};

    let mut cors = CorsLayer::new();
    cors = if section.cors.origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = section
            .cors
            .origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    };
    cors = if section.cors.methods.iter().any(|m| m == "*") {
        cors.allow_methods(Any)
    } else {
        let methods: Vec<Method> = section
            .cors
            .methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        cors.allow_methods(methods)
    };
    if section.cors.headers.iter().any(|h| h == "*") {
        cors.allow_headers(Any)
    } else {
        let headers: Vec<HeaderName> = section
            .cors
            .headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        cors.allow_headers(headers)
    }
}

/// Build the full application router
pub fn router(state: ApiState, section: &ApiSection) -> Router {
    let public = Router::new()
        .route("/auth/token", post(auth::token))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/revoke", post(auth::revoke));

    let protected = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list).post(users::create))
        .route(
            "/users/:id",
            get(users::get).put(users::update).delete(users::delete),
        )
        .route(
            "/system/config/:path",
            get(system::get_config).put(system::set_config),
        )
        .route("/system/status", get(system::status))
        .route("/plugins", get(plugins::list))
        .route("/plugins/:name/:action", post(plugins::action))
        .route("/monitoring/alerts", get(monitoring::alerts))
        .route("/monitoring/diagnostics", get(monitoring::diagnostics))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ));

    let mut router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .nest("/api/v1", public.merge(protected))
        .layer(cors_layer(section))
        .layer(TraceLayer::new_for_http());

    if section.rate_limit.enabled {
        let limiter = RateLimiter::new(section.rate_limit.requests_per_minute);
        router = router.layer(axum_middleware::from_fn_with_state(limiter, rate_limit));
    }

    router.with_state(state)
}
