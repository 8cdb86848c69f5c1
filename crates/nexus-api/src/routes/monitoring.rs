//! Monitoring endpoints: alerts and diagnostics.

use crate::error::ApiResult;
use crate::middleware::{authorize, CurrentUser};
use crate::state::{route_permissions, ApiState};
use axum::extract::{Query, State};
use axum::{Extension, Json};
use nexus_core::error::Error;
use nexus_monitor::AlertLevel;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct AlertsQuery {
    #[serde(default)]
    pub include_resolved: bool,
    pub level: Option<String>,
    pub metric_name: Option<String>,
}

/// `GET /monitoring/alerts`
pub async fn alerts(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<AlertsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::SYSTEM_VIEW).await?;
    let level = match &query.level {
        Some(raw) => Some(
            AlertLevel::parse(raw)
                .ok_or_else(|| Error::invalid_input("level", format!("unknown level '{raw}'")))?,
        ),
        None => None,
    };
    let alerts = state.monitor.get_alerts(
        query.include_resolved,
        level,
        query.metric_name.as_deref(),
    );
    let total = alerts.len();
    Ok(Json(serde_json::json!({
        "alerts": alerts,
        "total": total,
    })))
}

/// `GET /monitoring/diagnostics`
pub async fn diagnostics(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::SYSTEM_VIEW).await?;
    let report = state.monitor.diagnostics().await?;
    Ok(Json(report))
}
