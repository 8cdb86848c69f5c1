//! # Nexus Concurrency
//!
//! Typed task pools (CPU, I/O, isolated) with cooperative cancellation,
//! plus explicit main-thread dispatch for event-loop singletons.

pub mod dispatcher;
pub mod handle;
pub mod manager;
pub mod pool;

pub use dispatcher::{main_dispatcher, MainDispatcher, MainLoop};
pub use handle::{CancelToken, TaskHandle};
pub use manager::ConcurrencyManager;
pub use pool::WorkerPool;
