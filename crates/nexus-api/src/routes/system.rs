//! System configuration and status endpoints.

use crate::error::ApiResult;
use crate::middleware::{authorize, CurrentUser};
use crate::state::{route_permissions, ApiState};
use axum::extract::{Path, State};
use axum::{Extension, Json};
use nexus_core::error::Error;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ConfigWrite {
    pub value: serde_json::Value,
}

fn is_sensitive(path: &str) -> bool {
    let lowered = path.to_lowercase();
    lowered.contains("secret") || lowered.contains("password")
}

/// `GET /system/config/:path` (dotted path)
pub async fn get_config(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
    Path(path): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::SYSTEM_VIEW).await?;
    let value = state
        .config
        .get(&path)
        .ok_or_else(|| Error::not_found("config key", path.clone()))?;
    let value = if is_sensitive(&path) {
        serde_json::json!("<redacted>")
    } else {
        value
    };
    Ok(Json(serde_json::json!({ "key": path, "value": value })))
}

/// `PUT /system/config/:path`
pub async fn set_config(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
    Path(path): Path<String>,
    Json(request): Json<ConfigWrite>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::SYSTEM_MANAGE).await?;
    state.config.set(&path, request.value)?;
    Ok(Json(serde_json::json!({ "key": path, "updated": true })))
}

/// `GET /system/status`
pub async fn status(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::SYSTEM_VIEW).await?;
    let managers = state.registry.statuses();
    let healthy = managers.iter().all(|m| m.healthy);
    Ok(Json(serde_json::json!({
        "name": state.app_name,
        "version": state.app_version,
        "healthy": healthy,
        "managers": managers,
    })))
}
