//! Concurrency manager: owns the CPU, I/O, and isolated pools.

use crate::dispatcher::MainDispatcher;
use crate::handle::{CancelToken, TaskHandle};
use crate::pool::WorkerPool;
use async_trait::async_trait;
use nexus_config::schema::ThreadPoolSection;
use nexus_config::ConfigService;
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Bound on each pool's shutdown drain
const POOL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct PoolSet {
    cpu: Arc<WorkerPool>,
    io: Arc<WorkerPool>,
    isolated: Option<Arc<WorkerPool>>,
}

/// Manager for the typed task pools and main-thread dispatch
pub struct ConcurrencyManager {
    state: ManagerState,
    config: Arc<ConfigService>,
    dispatcher: MainDispatcher,
    pools: RwLock<Option<PoolSet>>,
    listener_id: RwLock<Option<nexus_config::ListenerId>>,
}

impl ConcurrencyManager {
    pub fn new(config: Arc<ConfigService>, dispatcher: MainDispatcher) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("concurrency_manager"),
            config,
            dispatcher,
            pools: RwLock::new(None),
            listener_id: RwLock::new(None),
        })
    }

    /// Whether the caller is on the designated main thread
    pub fn is_main_thread(&self) -> bool {
        self.dispatcher.is_main_thread()
    }

    /// Run a closure on the main thread (inline if already there)
    pub async fn run_on_main<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.dispatcher.run_on_main(f).await
    }

    fn pool(&self, pick: fn(&PoolSet) -> Option<Arc<WorkerPool>>) -> Result<Arc<WorkerPool>> {
        let pools = self.pools.read();
        let set = pools
            .as_ref()
            .ok_or_else(|| Error::concurrency("concurrency manager not initialized"))?;
        pick(set).ok_or_else(|| Error::concurrency("requested pool is disabled"))
    }

    /// Submit CPU-bound work to the CPU pool
    pub fn run_cpu<T, F>(&self, f: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        self.pool(|set| Some(set.cpu.clone()))?.submit(f)
    }

    /// Submit I/O-bound work to the I/O pool
    pub fn run_io<T, F>(&self, f: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        self.pool(|set| Some(set.io.clone()))?.submit(f)
    }

    /// Submit work to the isolated pool.
    ///
    /// The isolated pool's workers share nothing with the CPU/I-O queues;
    /// jobs must own all of their data. Disabled via
    /// `thread_pool.enable_process_pool = false`.
    pub fn run_isolated<T, F>(&self, f: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        self.pool(|set| set.isolated.clone())?.submit(f)
    }
}

#[async_trait]
impl Manager for ConcurrencyManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: ThreadPoolSection = self.config.section("thread_pool")?;
        let prefix = section.thread_name_prefix.clone();

        let cpu = Arc::new(WorkerPool::new(
            format!("{prefix}-cpu"),
            section.worker_threads.max(1),
        ));
        let io = Arc::new(WorkerPool::new(
            format!("{prefix}-io"),
            section.io_threads.max(1),
        ));
        let isolated = section.enable_process_pool.then(|| {
            Arc::new(WorkerPool::new(
                format!("{prefix}-isolated"),
                section.process_workers.max(1),
            ))
        });

        *self.pools.write() = Some(PoolSet { cpu, io, isolated });

        let id = self.config.register_listener(
            "thread_pool",
            Arc::new(|key: &str, _value: &serde_json::Value| {
                tracing::warn!(
                    changed_key = %key,
                    "Pool size changes require a restart to take effect"
                );
            }),
        );
        *self.listener_id.write() = Some(id);

        self.state.set_ready();
        tracing::info!(
            workers = section.worker_threads,
            io_workers = section.io_threads,
            isolated = section.enable_process_pool,
            "Concurrency manager initialized"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }
        let pools = self.pools.write().take();
        if let Some(set) = pools {
            set.cpu.shutdown(POOL_SHUTDOWN_TIMEOUT).await;
            set.io.shutdown(POOL_SHUTDOWN_TIMEOUT).await;
            if let Some(isolated) = set.isolated {
                isolated.shutdown(POOL_SHUTDOWN_TIMEOUT).await;
            }
        }
        if let Some(id) = self.listener_id.write().take() {
            self.config.unregister_listener(id);
        }
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        let details = {
            let pools = self.pools.read();
            match pools.as_ref() {
                Some(set) => serde_json::json!({
                    "cpu_workers": set.cpu.live_workers(),
                    "io_workers": set.io.live_workers(),
                    "isolated_workers": set.isolated.as_ref().map(|p| p.live_workers()),
                    "is_main_thread": self.is_main_thread(),
                }),
                None => serde_json::Value::Null,
            }
        };
        self.state.status().with_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::main_dispatcher;

    async fn manager() -> Arc<ConcurrencyManager> {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        let (dispatcher, _main_loop) = main_dispatcher();
        let manager = ConcurrencyManager::new(config, dispatcher);
        manager.initialize().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_run_cpu_and_io() {
        let manager = manager().await;
        let cpu = manager.run_cpu(|_| 2 + 2).unwrap();
        let io = manager.run_io(|_| "disk".to_string()).unwrap();
        assert_eq!(cpu.await.unwrap(), 4);
        assert_eq!(io.await.unwrap(), "disk");
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_isolated_pool_enabled_by_default() {
        let manager = manager().await;
        let handle = manager.run_isolated(|_| 9).unwrap();
        assert_eq!(handle.await.unwrap(), 9);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_isolated_pool_can_be_disabled() {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        config
            .set("thread_pool.enable_process_pool", serde_json::json!(false))
            .unwrap();
        let (dispatcher, _main_loop) = main_dispatcher();
        let manager = ConcurrencyManager::new(config, dispatcher);
        manager.initialize().await.unwrap();

        assert!(manager.run_isolated(|_| ()).is_err());
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_wrapping() {
        let manager = manager().await;
        let handle = manager
            .run_io(|token: &CancelToken| {
                while !token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
            .unwrap();
        let token = handle.cancel_token();

        let result = tokio::time::timeout(Duration::from_millis(50), handle).await;
        assert!(result.is_err());
        // The underlying task may still be running; release it
        token.cancel();
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submission_after_shutdown_fails() {
        let manager = manager().await;
        manager.shutdown().await.unwrap();
        assert!(manager.run_cpu(|_| ()).is_err());
    }
}
