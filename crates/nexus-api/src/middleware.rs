//! Request middleware: authenticate, authorize, rate-limit.
//!
//! The chain is authenticate -> authorize(permission) -> handler; the
//! required permission per route lives in
//! [`crate::state::route_permissions`].

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use nexus_core::error::Error;
use nexus_security::{Claims, TokenKind};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Authenticated caller, inserted as a request extension
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub claims: Claims,
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Authentication middleware: verifies the bearer access token and
/// attaches the caller identity.
pub async fn authenticate(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = bearer_token(&request).ok_or(Error::Authentication)?;
    let claims = state
        .security
        .verify_token(token)
        .ok_or(Error::Authentication)?;
    if claims.token_type != TokenKind::Access {
        return Err(Error::Authentication.into());
    }
    let user_id = claims.user_id().map_err(|_| Error::Authentication)?;

    request
        .extensions_mut()
        .insert(CurrentUser { user_id, claims });
    Ok(next.run(request).await)
}

/// Authorization check used by handlers with a permission from the
/// route-permission table. 403 responses name the missing permission.
pub async fn authorize(state: &ApiState, user: &CurrentUser, permission: &str) -> ApiResult<()> {
    let (resource, action) = permission
        .split_once('.')
        .ok_or_else(|| Error::api(format!("malformed permission id '{permission}'")))?;
    let allowed = state
        .security
        .has_permission(&user.user_id, resource, action)
        .await
        .map_err(ApiError)?;
    if allowed {
        Ok(())
    } else {
        Err(ApiError(Error::Authorization {
            permission: permission.to_string(),
        }))
    }
}

/// Fixed-window request counter keyed by client identity
pub struct RateLimiter {
    requests_per_minute: u32,
    windows: DashMap<String, (u64, u32)>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Arc<Self> {
        Arc::new(Self {
            requests_per_minute: requests_per_minute.max(1),
            windows: DashMap::new(),
        })
    }

    /// Record a hit; false when over the per-minute budget
    pub fn allow(&self, key: &str) -> bool {
        let minute = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() / 60)
            .unwrap_or(0);
        let mut entry = self.windows.entry(key.to_string()).or_insert((minute, 0));
        if entry.0 != minute {
            *entry = (minute, 0);
        }
        entry.1 += 1;
        entry.1 <= self.requests_per_minute
    }
}

/// Rate-limiting middleware; keys on the forwarded client address when
/// present, otherwise the bearer token, otherwise one shared bucket.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let key = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| bearer_token(&request).map(str::to_string))
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.allow(&key) {
        return Err(ApiError(Error::RateLimited {
            retry_after_secs: 60,
        }));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.allow("client-a"));
        }
        assert!(!limiter.allow("client-a"));
        // Other clients have their own budget
        assert!(limiter.allow("client-b"));
    }
}
