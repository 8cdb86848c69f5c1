//! Security manager: authentication, RBAC, and token lifecycle.

use crate::jwt::{Claims, IssuedToken, JwtCodec, TokenKind};
use crate::password::{PasswordHasher, PasswordPolicy};
use crate::permissions::PermissionTable;
use crate::user::{is_valid_email, is_valid_username, MemoryUserStore, User, UserRole, UserStore};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use nexus_config::schema::SecuritySection;
use nexus_config::{ConfigService, ListenerId};
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use nexus_events::{handler, topics, EventBus};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const SOURCE: &str = "security_manager";

/// Input for user creation
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub roles: HashSet<UserRole>,
    pub metadata: serde_json::Value,
}

/// Partial update applied to a user
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub roles: Option<HashSet<UserRole>>,
    pub active: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

/// Successful authentication result
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub last_login: Option<chrono::DateTime<Utc>>,
}

/// Result of a token refresh
#[derive(Debug, Clone, serde::Serialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    /// Present only when refresh rotation is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

struct JwtContext {
    secret: String,
    algorithm: String,
    codec: JwtCodec,
    access_ttl_minutes: i64,
    refresh_ttl_days: i64,
    rotate_refresh: bool,
}

/// Shared mutable security state, reachable from config listeners and
/// event handlers without going through the manager.
struct SecurityCore {
    jwt: RwLock<Option<JwtContext>>,
    policy: RwLock<PasswordPolicy>,
    /// Revoked token ids; consulted on every verify
    blacklist: Mutex<HashSet<String>>,
    /// Issued tokens per user. Guarded separately from the blacklist;
    /// when both are taken, active_tokens is always taken first.
    active_tokens: Mutex<HashMap<Uuid, Vec<IssuedToken>>>,
}

impl SecurityCore {
    fn is_blacklisted(&self, jti: &str) -> bool {
        self.blacklist.lock().contains(jti)
    }

    fn record_token(&self, token: IssuedToken) {
        self.active_tokens
            .lock()
            .entry(token.user_id)
            .or_default()
            .push(token);
    }

    /// Blacklist one jti and drop it from the user's active set
    fn blacklist_jti(&self, user_id: &Uuid, jti: &str) {
        let mut active = self.active_tokens.lock();
        if let Some(tokens) = active.get_mut(user_id) {
            tokens.retain(|t| t.jti != jti);
            if tokens.is_empty() {
                active.remove(user_id);
            }
        }
        self.blacklist.lock().insert(jti.to_string());
    }

    /// Blacklist every active token for a user
    fn revoke_user_tokens(&self, user_id: &Uuid) -> usize {
        let mut active = self.active_tokens.lock();
        let tokens = active.remove(user_id).unwrap_or_default();
        let mut blacklist = self.blacklist.lock();
        for token in &tokens {
            blacklist.insert(token.jti.clone());
        }
        tokens.len()
    }

    /// Blacklist every outstanding token (secret/algorithm rotation)
    fn revoke_all_tokens(&self) -> usize {
        let mut active = self.active_tokens.lock();
        let mut blacklist = self.blacklist.lock();
        let mut revoked = 0;
        for tokens in active.values() {
            for token in tokens {
                blacklist.insert(token.jti.clone());
                revoked += 1;
            }
        }
        active.clear();
        revoked
    }

    /// Decode a token ignoring expiry and blacklist it
    fn revoke_token_str(&self, token: &str) -> Result<Claims> {
        let claims = {
            let jwt = self.jwt.read();
            let ctx = jwt
                .as_ref()
                .ok_or_else(|| Error::security("security manager not initialized"))?;
            ctx.codec.decode(token, false)?
        };
        let user_id = claims.user_id()?;
        self.blacklist_jti(&user_id, &claims.jti);
        Ok(claims)
    }
}

/// Manager for users, roles, permissions, and tokens
pub struct SecurityManager {
    state: ManagerState,
    config: Arc<ConfigService>,
    bus: Arc<EventBus>,
    store: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    permissions: PermissionTable,
    core: Arc<SecurityCore>,
    user_count: AtomicUsize,
    listener_id: Mutex<Option<ListenerId>>,
}

impl SecurityManager {
    /// Memory-backed store (the default when no persistence adapter is
    /// configured)
    pub fn new(config: Arc<ConfigService>, bus: Arc<EventBus>) -> Arc<Self> {
        Self::with_store(config, bus, Arc::new(MemoryUserStore::new()))
    }

    pub fn with_store(
        config: Arc<ConfigService>,
        bus: Arc<EventBus>,
        store: Arc<dyn UserStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("security_manager"),
            config,
            bus,
            store,
            hasher: PasswordHasher::new(),
            permissions: PermissionTable::with_defaults(),
            core: Arc::new(SecurityCore {
                jwt: RwLock::new(None),
                policy: RwLock::new(PasswordPolicy::default()),
                blacklist: Mutex::new(HashSet::new()),
                active_tokens: Mutex::new(HashMap::new()),
            }),
            user_count: AtomicUsize::new(0),
            listener_id: Mutex::new(None),
        })
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    /// Create a user after validating username, email, and password
    pub async fn create_user(&self, new: NewUser) -> Result<User> {
        self.ensure_initialized()?;

        if !is_valid_username(&new.username) {
            return Err(Error::invalid_input(
                "username",
                "must be 3-32 characters of letters, numbers, dots, hyphens, underscores",
            ));
        }
        if !is_valid_email(&new.email) {
            return Err(Error::invalid_input("email", "invalid email address"));
        }
        self.core.policy.read().validate(&new.password)?;

        let hashed = self.hasher.hash(&new.password)?;
        let mut user = User::new(&new.username, &new.email, hashed, new.roles);
        user.metadata = new.metadata;
        self.store.insert(user.clone()).await?;
        self.user_count.fetch_add(1, Ordering::SeqCst);

        tracing::info!(username = %user.username, user_id = %user.id, "Created user");
        self.publish(
            topics::SECURITY_USER_CREATED,
            serde_json::json!({
                "user_id": user.id,
                "username": user.username,
                "email": user.email,
                "roles": user.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
            }),
        );
        Ok(user)
    }

    /// Authenticate with username or email plus password.
    ///
    /// Every failure is reported as the same generic error; nothing
    /// reveals whether the account exists.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<AuthSession> {
        self.ensure_initialized()?;

        let user = match self.store.find_by_login(login).await? {
            Some(user) => user,
            None => {
                tracing::debug!(login, "Authentication failed: unknown user");
                return Err(Error::Authentication);
            }
        };
        if !user.active {
            tracing::debug!(user_id = %user.id, "Authentication failed: inactive account");
            return Err(Error::Authentication);
        }
        if !self.hasher.verify(password, &user.hashed_password)? {
            tracing::debug!(user_id = %user.id, "Authentication failed: bad password");
            return Err(Error::Authentication);
        }

        let (access_token, refresh_token, expires_in) = self.issue_pair(&user.id)?;

        let mut updated = user.clone();
        updated.last_login = Some(Utc::now());
        self.store.update(updated.clone()).await?;

        tracing::info!(username = %user.username, user_id = %user.id, "User authenticated");
        self.publish(
            topics::SECURITY_USER_LOGIN,
            serde_json::json!({
                "user_id": user.id,
                "username": user.username,
                "timestamp": updated.last_login,
            }),
        );

        Ok(AuthSession {
            user_id: user.id,
            username: user.username,
            email: user.email,
            roles: user.roles.iter().map(|r| r.as_str().to_string()).collect(),
            access_token,
            token_type: "bearer".to_string(),
            expires_in,
            refresh_token,
            last_login: updated.last_login,
        })
    }

    fn issue_pair(&self, user_id: &Uuid) -> Result<(String, String, i64)> {
        let jwt = self.core.jwt.read();
        let ctx = jwt
            .as_ref()
            .ok_or_else(|| Error::security("security manager not initialized"))?;

        let (access, access_claims) = ctx.codec.issue(
            user_id,
            TokenKind::Access,
            Duration::minutes(ctx.access_ttl_minutes),
        )?;
        let (refresh, refresh_claims) = ctx.codec.issue(
            user_id,
            TokenKind::Refresh,
            Duration::days(ctx.refresh_ttl_days),
        )?;
        let expires_in = ctx.access_ttl_minutes * 60;
        drop(jwt);

        for claims in [access_claims, refresh_claims] {
            self.core.record_token(IssuedToken {
                jti: claims.jti.clone(),
                user_id: *user_id,
                kind: claims.token_type,
                issued_at: claims.issued_at(),
                expires_at: claims.expires_at(),
            });
        }
        Ok((access, refresh, expires_in))
    }

    /// Verify a token: signature, expiry, then the blacklist.
    /// Returns the claims or `None`.
    pub fn verify_token(&self, token: &str) -> Option<Claims> {
        let jwt = self.core.jwt.read();
        let ctx = jwt.as_ref()?;
        let claims = match ctx.codec.decode(token, true) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "Token verification failed");
                return None;
            }
        };
        drop(jwt);

        if self.core.is_blacklisted(&claims.jti) {
            tracing::debug!(jti = %claims.jti, "Token is revoked");
            return None;
        }
        Some(claims)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// Refresh tokens are reused until expiry unless
    /// `security.jwt.rotate_refresh` is enabled.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        self.ensure_initialized()?;

        let claims = self
            .verify_token(refresh_token)
            .ok_or(Error::Authentication)?;
        if claims.token_type != TokenKind::Refresh {
            return Err(Error::InvalidToken {
                reason: "not a refresh token".to_string(),
            });
        }
        let user_id = claims.user_id()?;
        let user = self
            .store
            .get(&user_id)
            .await?
            .filter(|u| u.active)
            .ok_or(Error::Authentication)?;

        let jwt = self.core.jwt.read();
        let ctx = jwt
            .as_ref()
            .ok_or_else(|| Error::security("security manager not initialized"))?;
        let (access, access_claims) = ctx.codec.issue(
            &user.id,
            TokenKind::Access,
            Duration::minutes(ctx.access_ttl_minutes),
        )?;
        let expires_in = ctx.access_ttl_minutes * 60;
        let rotate = ctx.rotate_refresh;
        let rotated = if rotate {
            let (new_refresh, new_claims) = ctx.codec.issue(
                &user.id,
                TokenKind::Refresh,
                Duration::days(ctx.refresh_ttl_days),
            )?;
            Some((new_refresh, new_claims))
        } else {
            None
        };
        drop(jwt);

        self.core.record_token(IssuedToken {
            jti: access_claims.jti.clone(),
            user_id: user.id,
            kind: TokenKind::Access,
            issued_at: access_claims.issued_at(),
            expires_at: access_claims.expires_at(),
        });

        let refresh_out = match rotated {
            Some((new_refresh, new_claims)) => {
                self.core.record_token(IssuedToken {
                    jti: new_claims.jti.clone(),
                    user_id: user.id,
                    kind: TokenKind::Refresh,
                    issued_at: new_claims.issued_at(),
                    expires_at: new_claims.expires_at(),
                });
                self.core.blacklist_jti(&user.id, &claims.jti);
                Some(new_refresh)
            }
            None => None,
        };

        tracing::info!(user_id = %user.id, "Issued new access token via refresh");
        Ok(RefreshedTokens {
            access_token: access,
            token_type: "bearer".to_string(),
            expires_in,
            refresh_token: refresh_out,
        })
    }

    /// Revoke one token by blacklisting its jti.
    /// Accepts expired tokens; the signature must still verify.
    pub fn revoke_token(&self, token: &str) -> Result<()> {
        self.ensure_initialized()?;
        let claims = self.core.revoke_token_str(token)?;
        tracing::info!(jti = %claims.jti, sub = %claims.sub, "Token revoked");
        self.publish(
            topics::SECURITY_TOKEN_REVOKED,
            serde_json::json!({ "jti": claims.jti, "user_id": claims.sub }),
        );
        Ok(())
    }

    /// Revoke every outstanding token for a user
    pub fn revoke_all_for_user(&self, user_id: &Uuid) -> usize {
        let revoked = self.core.revoke_user_tokens(user_id);
        if revoked > 0 {
            tracing::info!(%user_id, revoked, "Revoked all tokens for user");
        }
        revoked
    }

    /// Permission predicate: the permission `{resource}.{action}` exists
    /// and the user holds at least one granted role
    pub async fn has_permission(&self, user_id: &Uuid, resource: &str, action: &str) -> Result<bool> {
        let Some(user) = self.store.get(user_id).await? else {
            return Ok(false);
        };
        if !user.active {
            return Ok(false);
        }
        Ok(self.permissions.allows(&user.roles, resource, action))
    }

    /// Direct role membership test
    pub async fn has_role(&self, user_id: &Uuid, role: UserRole) -> Result<bool> {
        let Some(user) = self.store.get(user_id).await? else {
            return Ok(false);
        };
        if !user.active {
            return Ok(false);
        }
        Ok(user.roles.contains(&role))
    }

    pub async fn get_user(&self, user_id: &Uuid) -> Result<Option<User>> {
        self.store.get(user_id).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.store.list().await
    }

    /// Apply a partial update. Password changes and deactivation revoke
    /// every outstanding token for the user.
    pub async fn update_user(&self, user_id: &Uuid, update: UserUpdate) -> Result<User> {
        self.ensure_initialized()?;
        let mut user = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| Error::not_found("User", user_id.to_string()))?;

        let mut updated_fields = Vec::new();
        let mut revoke = false;

        if let Some(username) = update.username {
            if !is_valid_username(&username) {
                return Err(Error::invalid_input("username", "invalid username format"));
            }
            user.username = username;
            updated_fields.push("username");
        }
        if let Some(email) = update.email {
            if !is_valid_email(&email) {
                return Err(Error::invalid_input("email", "invalid email format"));
            }
            user.email = email;
            updated_fields.push("email");
        }
        if let Some(password) = update.password {
            self.core.policy.read().validate(&password)?;
            user.hashed_password = self.hasher.hash(&password)?;
            updated_fields.push("password");
            revoke = true;
        }
        if let Some(roles) = update.roles {
            user.roles = roles;
            updated_fields.push("roles");
        }
        if let Some(active) = update.active {
            user.active = active;
            updated_fields.push("active");
            if !active {
                revoke = true;
            }
        }
        if let Some(metadata) = update.metadata {
            user.metadata = metadata;
            updated_fields.push("metadata");
        }

        self.store.update(user.clone()).await?;
        if revoke {
            self.revoke_all_for_user(user_id);
        }

        tracing::info!(%user_id, ?updated_fields, "Updated user");
        self.publish(
            topics::SECURITY_USER_UPDATED,
            serde_json::json!({
                "user_id": user_id,
                "username": user.username,
                "updated_fields": updated_fields,
            }),
        );
        Ok(user)
    }

    /// Delete a user and revoke all of their tokens
    pub async fn delete_user(&self, user_id: &Uuid) -> Result<()> {
        self.ensure_initialized()?;
        let user = self
            .store
            .remove(user_id)
            .await?
            .ok_or_else(|| Error::not_found("User", user_id.to_string()))?;
        self.user_count.fetch_sub(1, Ordering::SeqCst);
        self.revoke_all_for_user(user_id);

        tracing::info!(%user_id, username = %user.username, "Deleted user");
        self.publish(
            topics::SECURITY_USER_DELETED,
            serde_json::json!({ "user_id": user_id, "username": user.username }),
        );
        Ok(())
    }

    fn publish(&self, topic: &str, payload: serde_json::Value) {
        if let Err(e) = self.bus.publish(topic, SOURCE, payload) {
            tracing::debug!(topic, error = %e, "Could not publish security event");
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.state.initialized() {
            return Err(Error::security("security manager not initialized"));
        }
        Ok(())
    }

    async fn create_default_admin(&self) {
        let result = self
            .create_user(NewUser {
                username: "admin".to_string(),
                email: "admin@example.com".to_string(),
                password: "ChangeMe123!".to_string(),
                roles: HashSet::from([UserRole::Admin]),
                metadata: serde_json::json!({ "default_user": true }),
            })
            .await;
        match result {
            Ok(_) => tracing::warn!(
                "Created default admin user 'admin'; change its password immediately"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to create default admin user"),
        }
    }
}

fn generated_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl Manager for SecurityManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: SecuritySection = self.config.section("security")?;

        let secret = if section.jwt.secret.is_empty() {
            tracing::warn!(
                "No JWT secret configured; generated a random one (insecure for production)"
            );
            generated_secret()
        } else {
            section.jwt.secret.clone()
        };
        let codec = JwtCodec::new(&secret, &section.jwt.algorithm)?;
        *self.core.jwt.write() = Some(JwtContext {
            secret,
            algorithm: section.jwt.algorithm.clone(),
            codec,
            access_ttl_minutes: section.jwt.access_token_expire_minutes,
            refresh_ttl_days: section.jwt.refresh_token_expire_days,
            rotate_refresh: section.jwt.rotate_refresh,
        });
        *self.core.policy.write() = section.password_policy.into();

        // React to runtime security config changes; secret or algorithm
        // rotation invalidates every outstanding token.
        let listener_core = self.core.clone();
        let listener_config = self.config.clone();
        let listener_id = self.config.register_listener(
            "security",
            Arc::new(move |key: &str, value: &serde_json::Value| match key {
                "security.jwt.secret" => {
                    let Some(secret) = value.as_str() else { return };
                    let mut jwt = listener_core.jwt.write();
                    if let Some(ctx) = jwt.as_mut() {
                        match JwtCodec::new(secret, &ctx.algorithm) {
                            Ok(codec) => {
                                ctx.secret = secret.to_string();
                                ctx.codec = codec;
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Rejected JWT secret update");
                                return;
                            }
                        }
                    }
                    drop(jwt);
                    let revoked = listener_core.revoke_all_tokens();
                    tracing::info!(revoked, "JWT secret changed; revoked all tokens");
                }
                "security.jwt.algorithm" => {
                    let Some(algorithm) = value.as_str() else { return };
                    let mut jwt = listener_core.jwt.write();
                    if let Some(ctx) = jwt.as_mut() {
                        match JwtCodec::new(&ctx.secret, algorithm) {
                            Ok(codec) => {
                                ctx.algorithm = algorithm.to_string();
                                ctx.codec = codec;
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Rejected JWT algorithm update");
                                return;
                            }
                        }
                    }
                    drop(jwt);
                    let revoked = listener_core.revoke_all_tokens();
                    tracing::info!(revoked, "JWT algorithm changed; revoked all tokens");
                }
                "security.jwt.access_token_expire_minutes" => {
                    if let Some(minutes) = value.as_i64() {
                        if let Some(ctx) = listener_core.jwt.write().as_mut() {
                            ctx.access_ttl_minutes = minutes;
                        }
                    }
                }
                "security.jwt.refresh_token_expire_days" => {
                    if let Some(days) = value.as_i64() {
                        if let Some(ctx) = listener_core.jwt.write().as_mut() {
                            ctx.refresh_ttl_days = days;
                        }
                    }
                }
                "security.jwt.rotate_refresh" => {
                    if let Some(rotate) = value.as_bool() {
                        if let Some(ctx) = listener_core.jwt.write().as_mut() {
                            ctx.rotate_refresh = rotate;
                        }
                    }
                }
                key if key.starts_with("security.password_policy.") => {
                    if let Ok(section) = listener_config
                        .section::<nexus_config::schema::PasswordPolicySection>(
                            "security.password_policy",
                        )
                    {
                        *listener_core.policy.write() = section.into();
                        tracing::info!("Updated password policy");
                    }
                }
                _ => {}
            }),
        );
        *self.listener_id.lock() = Some(listener_id);

        // Revocation requests can arrive over the bus
        let revoke_core = self.core.clone();
        let revoke_bus = self.bus.clone();
        self.bus.subscribe(
            "security/token_revoke",
            SOURCE,
            handler(move |event| {
                let core = revoke_core.clone();
                let bus = revoke_bus.clone();
                async move {
                    let Some(token) = event.payload.get("token").and_then(|t| t.as_str()) else {
                        tracing::error!(event_id = %event.event_id, "Revocation event without token");
                        return Ok(());
                    };
                    match core.revoke_token_str(token) {
                        Ok(claims) => {
                            let _ = bus.publish(
                                topics::SECURITY_TOKEN_REVOKED,
                                SOURCE,
                                serde_json::json!({ "jti": claims.jti, "user_id": claims.sub }),
                            );
                        }
                        Err(e) => tracing::warn!(error = %e, "Event-driven revocation failed"),
                    }
                    Ok(())
                }
            }),
        )?;

        self.user_count
            .store(self.store.count().await?, Ordering::SeqCst);
        self.state.set_ready();

        if self.user_count.load(Ordering::SeqCst) == 0 {
            self.create_default_admin().await;
        }

        tracing::info!("Security manager initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }
        self.bus.unsubscribe(SOURCE);
        if let Some(id) = self.listener_id.lock().take() {
            self.config.unregister_listener(id);
        }
        self.core.blacklist.lock().clear();
        self.core.active_tokens.lock().clear();
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        let (active, blacklisted) = {
            let active = self.core.active_tokens.lock();
            let total: usize = active.values().map(Vec::len).sum();
            (total, self.core.blacklist.lock().len())
        };
        let jwt_details = {
            let jwt = self.core.jwt.read();
            jwt.as_ref().map(|ctx| {
                serde_json::json!({
                    "algorithm": ctx.algorithm,
                    "access_token_expire_minutes": ctx.access_ttl_minutes,
                    "refresh_token_expire_days": ctx.refresh_ttl_days,
                })
            })
        };
        self.state.status().with_details(serde_json::json!({
            "users": self.user_count.load(Ordering::SeqCst),
            "permissions": self.permissions.list().len(),
            "tokens": { "active": active, "blacklisted": blacklisted },
            "jwt": jwt_details,
        }))
    }
}
