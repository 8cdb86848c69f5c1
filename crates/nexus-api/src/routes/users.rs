//! User administration endpoints.

use crate::error::ApiResult;
use crate::middleware::{authorize, CurrentUser};
use crate::state::{route_permissions, ApiState};
use axum::extract::{Path, State};
use axum::{Extension, Json};
use nexus_core::error::Error;
use nexus_security::{NewUser, UserRole, UserUpdate};
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub roles: Option<Vec<String>>,
    pub active: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

fn parse_roles(roles: &[String]) -> ApiResult<HashSet<UserRole>> {
    let mut parsed = HashSet::new();
    for role in roles {
        parsed.insert(UserRole::parse(role)?);
    }
    Ok(parsed)
}

fn user_json(user: &nexus_security::User) -> serde_json::Value {
    serde_json::json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "roles": user.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "active": user.active,
        "created_at": user.created_at,
        "last_login": user.last_login,
    })
}

/// `GET /users`
pub async fn list(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::USERS_VIEW).await?;
    let users = state.security.list_users().await?;
    Ok(Json(serde_json::json!({
        "users": users.iter().map(user_json).collect::<Vec<_>>(),
        "total": users.len(),
    })))
}

/// `POST /users`
pub async fn create(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::USERS_MANAGE).await?;
    let roles = if request.roles.is_empty() {
        HashSet::from([UserRole::User])
    } else {
        parse_roles(&request.roles)?
    };
    let created = state
        .security
        .create_user(NewUser {
            username: request.username,
            email: request.email,
            password: request.password,
            roles,
            metadata: serde_json::Value::Null,
        })
        .await?;
    Ok(Json(user_json(&created)))
}

/// `GET /users/:id`
pub async fn get(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::USERS_VIEW).await?;
    let found = state
        .security
        .get_user(&id)
        .await?
        .ok_or_else(|| Error::not_found("User", id.to_string()))?;
    Ok(Json(user_json(&found)))
}

/// `PUT /users/:id`
pub async fn update(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::USERS_MANAGE).await?;
    let roles = match &request.roles {
        Some(roles) => Some(parse_roles(roles)?),
        None => None,
    };
    let updated = state
        .security
        .update_user(
            &id,
            UserUpdate {
                username: request.username,
                email: request.email,
                password: request.password,
                roles,
                active: request.active,
                metadata: request.metadata,
            },
        )
        .await?;
    Ok(Json(user_json(&updated)))
}

/// `DELETE /users/:id`
pub async fn delete(
    State(state): State<ApiState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &user, route_permissions::USERS_MANAGE).await?;
    state.security.delete_user(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}
