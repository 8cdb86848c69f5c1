//! User model, role set, and the user store interface.
//!
//! The store is config-driven: memory-backed by default, replaceable with
//! a database-backed adapter exposing the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nexus_core::error::{Error, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._-]{3,32}$").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

/// Closed role set for role-based access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Full system access
    Admin,
    /// Manages operations but not system configuration
    Operator,
    /// Regular user with limited access
    User,
    /// Read-only access
    Viewer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::User => "user",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "operator" => Ok(Self::Operator),
            "user" => Ok(Self::User),
            "viewer" => Ok(Self::Viewer),
            other => Err(Error::invalid_input("role", format!("unknown role '{other}'"))),
        }
    }
}

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Never serialized into API responses
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub roles: HashSet<UserRole>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        hashed_password: impl Into<String>,
        roles: HashSet<UserRole>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            hashed_password: hashed_password.into(),
            roles,
            active: true,
            created_at: Utc::now(),
            last_login: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Username rule: 3-32 chars of `[A-Za-z0-9._-]`
pub fn is_valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Narrow persistence interface for user accounts.
///
/// Uniqueness on `lower(username)` and `lower(email)` is the store's
/// responsibility and must be enforced atomically.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: User) -> Result<()>;
    async fn get(&self, id: &Uuid) -> Result<Option<User>>;
    /// Look up by username or email, case-insensitively
    async fn find_by_login(&self, login: &str) -> Result<Option<User>>;
    async fn update(&self, user: User) -> Result<()>;
    async fn remove(&self, id: &Uuid) -> Result<Option<User>>;
    async fn list(&self) -> Result<Vec<User>>;
    async fn count(&self) -> Result<usize>;
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<Uuid, User>,
    by_username: HashMap<String, Uuid>,
    by_email: HashMap<String, Uuid>,
}

/// In-memory user store
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: User) -> Result<()> {
        let username_key = user.username.to_lowercase();
        let email_key = user.email.to_lowercase();

        let mut inner = self.inner.write();
        if inner.by_username.contains_key(&username_key) {
            return Err(Error::duplicate("User", "username"));
        }
        if inner.by_email.contains_key(&email_key) {
            return Err(Error::duplicate("User", "email"));
        }
        inner.by_username.insert(username_key, user.id);
        inner.by_email.insert(email_key, user.id);
        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<User>> {
        Ok(self.inner.read().users.get(id).cloned())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>> {
        let key = login.to_lowercase();
        let inner = self.inner.read();
        let id = inner
            .by_username
            .get(&key)
            .or_else(|| inner.by_email.get(&key));
        Ok(id.and_then(|id| inner.users.get(id)).cloned())
    }

    async fn update(&self, user: User) -> Result<()> {
        let mut inner = self.inner.write();
        let existing = inner
            .users
            .get(&user.id)
            .ok_or_else(|| Error::not_found("User", user.id.to_string()))?
            .clone();

        let new_username = user.username.to_lowercase();
        let new_email = user.email.to_lowercase();

        if new_username != existing.username.to_lowercase() {
            if inner.by_username.contains_key(&new_username) {
                return Err(Error::duplicate("User", "username"));
            }
            inner.by_username.remove(&existing.username.to_lowercase());
            inner.by_username.insert(new_username, user.id);
        }
        if new_email != existing.email.to_lowercase() {
            if inner.by_email.contains_key(&new_email) {
                return Err(Error::duplicate("User", "email"));
            }
            inner.by_email.remove(&existing.email.to_lowercase());
            inner.by_email.insert(new_email, user.id);
        }

        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn remove(&self, id: &Uuid) -> Result<Option<User>> {
        let mut inner = self.inner.write();
        let Some(user) = inner.users.remove(id) else {
            return Ok(None);
        };
        inner.by_username.remove(&user.username.to_lowercase());
        inner.by_email.remove(&user.email.to_lowercase());
        Ok(Some(user))
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.inner.read().users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().users.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user(username: &str, email: &str) -> User {
        User::new(username, email, "hash", HashSet::from([UserRole::User]))
    }

    #[test]
    fn test_username_boundaries() {
        assert!(!is_valid_username("ab")); // 2: reject
        assert!(is_valid_username("abc")); // 3: accept
        assert!(is_valid_username(&"a".repeat(32))); // 32: accept
        assert!(!is_valid_username(&"a".repeat(33))); // 33: reject
        assert!(is_valid_username("user.name_x-1"));
        assert!(!is_valid_username("bad name"));
        assert!(!is_valid_username("bad@name"));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last+tag@sub.domain.io"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld"));
    }

    #[tokio::test]
    async fn test_uniqueness_is_case_insensitive() {
        let store = MemoryUserStore::new();
        store
            .insert(sample_user("Alice", "alice@example.com"))
            .await
            .unwrap();

        let err = store
            .insert(sample_user("ALICE", "other@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));

        let err = store
            .insert(sample_user("bob", "ALICE@EXAMPLE.COM"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_find_by_login_matches_username_and_email() {
        let store = MemoryUserStore::new();
        let user = sample_user("carol", "carol@example.com");
        let id = user.id;
        store.insert(user).await.unwrap();

        assert_eq!(store.find_by_login("CAROL").await.unwrap().unwrap().id, id);
        assert_eq!(
            store
                .find_by_login("carol@example.com")
                .await
                .unwrap()
                .unwrap()
                .id,
            id
        );
        assert!(store.find_by_login("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_reindexes() {
        let store = MemoryUserStore::new();
        let mut user = sample_user("dave", "dave@example.com");
        store.insert(user.clone()).await.unwrap();

        user.username = "david".to_string();
        store.update(user.clone()).await.unwrap();

        assert!(store.find_by_login("dave").await.unwrap().is_none());
        assert!(store.find_by_login("david").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_clears_indexes() {
        let store = MemoryUserStore::new();
        let user = sample_user("erin", "erin@example.com");
        let id = user.id;
        store.insert(user).await.unwrap();

        store.remove(&id).await.unwrap();
        assert!(store.find_by_login("erin").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);

        // Name is free again
        store
            .insert(sample_user("erin", "erin@example.com"))
            .await
            .unwrap();
    }
}
