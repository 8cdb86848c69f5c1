//! # Nexus Security
//!
//! Users, roles, permissions, password policy, and the JWT lifecycle
//! (issue, verify, refresh, revoke) with blacklist-backed revocation.

pub mod jwt;
pub mod manager;
pub mod password;
pub mod permissions;
pub mod user;

pub use jwt::{Claims, IssuedToken, JwtCodec, TokenKind};
pub use manager::{AuthSession, NewUser, RefreshedTokens, SecurityManager, UserUpdate};
pub use password::{PasswordHasher, PasswordPolicy};
pub use permissions::{Permission, PermissionTable};
pub use user::{MemoryUserStore, User, UserRole, UserStore};
