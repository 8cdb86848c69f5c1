//! Authentication endpoints: OAuth2 password grant, refresh, revoke, me.

use crate::error::ApiResult;
use crate::middleware::CurrentUser;
use crate::state::ApiState;
use axum::extract::State;
use axum::{Extension, Form, Json};
use nexus_core::error::Error;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub grant_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
}

/// `POST /auth/token` (password grant form)
pub async fn token(
    State(state): State<ApiState>,
    Form(request): Form<TokenRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(grant_type) = &request.grant_type {
        if grant_type != "password" {
            return Err(Error::invalid_input("grant_type", "only 'password' is supported").into());
        }
    }
    let session = state
        .security
        .authenticate(&request.username, &request.password)
        .await?;
    Ok(Json(serde_json::json!({
        "access_token": session.access_token,
        "refresh_token": session.refresh_token,
        "token_type": session.token_type,
        "expires_in": session.expires_in,
    })))
}

/// `POST /auth/refresh`
pub async fn refresh(
    State(state): State<ApiState>,
    Json(request): Json<RefreshRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let refreshed = state.security.refresh(&request.refresh_token).await?;
    Ok(Json(serde_json::to_value(refreshed).map_err(|e| {
        Error::api(format!("cannot serialize token response: {e}"))
    })?))
}

/// `POST /auth/revoke`
pub async fn revoke(
    State(state): State<ApiState>,
    Json(request): Json<RevokeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.security.revoke_token(&request.token)?;
    Ok(Json(serde_json::json!({ "revoked": true })))
}

/// `GET /auth/me`
pub async fn me(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let account = state
        .security
        .get_user(&user.user_id)
        .await?
        .ok_or(Error::Authentication)?;
    Ok(Json(serde_json::json!({
        "id": account.id,
        "username": account.username,
        "email": account.email,
        "roles": account.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "active": account.active,
        "created_at": account.created_at,
        "last_login": account.last_login,
    })))
}
