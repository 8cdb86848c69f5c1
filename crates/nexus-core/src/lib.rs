//! # Nexus Core
//!
//! Foundation of the Nexus runtime: the unified error type, the manager
//! lifecycle contract, the dependency-aware manager registry, shared
//! persisted-state models, and the logging bootstrap.

pub mod error;
pub mod logging;
pub mod manager;
pub mod models;
pub mod registry;

pub use error::{Error, Result, ValidationError, ValidationErrors};
pub use manager::{Manager, ManagerState, ManagerStatus};
pub use registry::{ManagerRegistry, ShutdownSummary};
