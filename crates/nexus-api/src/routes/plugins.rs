//! Plugin administration endpoints.

use crate::error::ApiResult;
use crate::middleware::{authorize, CurrentUser};
use crate::state::{route_permissions, ApiState};
use axum::extract::{Path, State};
use axum::{Extension, Json};
use nexus_core::error::Error;

/// `GET /plugins`
pub async fn list(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::PLUGINS_VIEW).await?;
    let loaded = state.plugins.list_loaded();
    Ok(Json(serde_json::json!({
        "loaded": loaded,
        "discovered": state.plugins.list_discovered(),
    })))
}

/// `POST /plugins/:name/:action` where action is one of
/// `load | unload | enable | disable`
pub async fn action(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
    Path((name, action)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::PLUGINS_MANAGE).await?;
    let result = match action.as_str() {
        "load" => {
            let handle = state.plugins.load_plugin(&name).await?;
            serde_json::json!({ "plugin": name, "action": "load", "handle": handle })
        }
        "unload" => {
            let unloaded = state.plugins.unload_plugin(&name).await?;
            serde_json::json!({ "plugin": name, "action": "unload", "unloaded": unloaded })
        }
        "enable" => {
            let handle = state.plugins.enable_plugin(&name).await?;
            serde_json::json!({ "plugin": name, "action": "enable", "handle": handle })
        }
        "disable" => {
            let disabled = state.plugins.disable_plugin(&name).await?;
            serde_json::json!({ "plugin": name, "action": "disable", "unloaded": disabled })
        }
        other => {
            return Err(Error::invalid_input(
                "action",
                format!("unknown plugin action '{other}'"),
            )
            .into())
        }
    };
    Ok(Json(result))
}
