//! Managers hosted by the runtime itself: logging bootstrap, filesystem
//! roots, the persistence adapter, the cloud surface, and background
//! tasks.

pub mod cloud;
pub mod files;
pub mod logging;
pub mod storage;
pub mod tasks;

pub use cloud::CloudManager;
pub use files::FileManager;
pub use logging::LoggingManager;
pub use storage::{
    AuditStore, MemoryAuditStore, MemorySettingsStore, SettingsStore, StorageManager,
};
pub use tasks::{TaskFn, TaskInfo, TaskManager};
