//! Task manager: named background tasks supervised by the runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Factory producing one run of a periodic task
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct TaskEntry {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
    periodic: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub running: bool,
    pub periodic: bool,
    pub started_at: DateTime<Utc>,
}

pub struct TaskManager {
    state: ManagerState,
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl TaskManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("task_manager"),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.state.initialized() {
            return Err(Error::application("task manager not initialized"));
        }
        Ok(())
    }

    /// Run a task every `interval` until cancelled. Task errors are
    /// logged, never propagated.
    pub fn spawn_periodic(&self, name: &str, interval: Duration, task: TaskFn) -> Result<()> {
        self.ensure_initialized()?;
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(name) {
            return Err(Error::duplicate("task", name));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_task = cancel.clone();
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            loop {
                if cancel_task.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = task().await {
                    tracing::error!(task = %task_name, error = %e, "Background task run failed");
                }
                tokio::time::sleep(interval).await;
            }
        });

        tasks.insert(
            name.to_string(),
            TaskEntry {
                handle,
                cancel,
                started_at: Utc::now(),
                periodic: true,
            },
        );
        Ok(())
    }

    /// Run a future once under a name
    pub fn spawn_once(&self, name: &str, future: BoxFuture<'static, Result<()>>) -> Result<()> {
        self.ensure_initialized()?;
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(name) {
            return Err(Error::duplicate("task", name));
        }

        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(task = %task_name, error = %e, "Background task failed");
            }
        });
        tasks.insert(
            name.to_string(),
            TaskEntry {
                handle,
                cancel: Arc::new(AtomicBool::new(false)),
                started_at: Utc::now(),
                periodic: false,
            },
        );
        Ok(())
    }

    /// Cancel a task by name
    pub fn cancel(&self, name: &str) -> bool {
        let Some(entry) = self.tasks.lock().remove(name) else {
            return false;
        };
        entry.cancel.store(true, Ordering::SeqCst);
        entry.handle.abort();
        true
    }

    pub fn list(&self) -> Vec<TaskInfo> {
        let tasks = self.tasks.lock();
        let mut infos: Vec<TaskInfo> = tasks
            .iter()
            .map(|(name, entry)| TaskInfo {
                name: name.clone(),
                running: !entry.handle.is_finished(),
                periodic: entry.periodic,
                started_at: entry.started_at,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

#[async_trait]
impl Manager for TaskManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        self.state.set_ready();
        tracing::info!("Task manager initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }
        let entries: Vec<(String, TaskEntry)> = self.tasks.lock().drain().collect();
        for (name, entry) in entries {
            entry.cancel.store(true, Ordering::SeqCst);
            entry.handle.abort();
            tracing::debug!(task = %name, "Cancelled background task");
        }
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        let tasks = self.list();
        self.state.status().with_details(serde_json::json!({
            "tasks": tasks.len(),
            "running": tasks.iter().filter(|t| t.running).count(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    async fn task_manager() -> Arc<TaskManager> {
        let manager = TaskManager::new();
        manager.initialize().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_periodic_task_runs_until_cancelled() {
        let manager = task_manager().await;
        let runs = Arc::new(AtomicU32::new(0));
        let runs_task = runs.clone();

        manager
            .spawn_periodic(
                "ticker",
                Duration::from_millis(10),
                Arc::new(move || {
                    let runs = runs_task.clone();
                    Box::pin(async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(manager.cancel("ticker"));
        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected repeated runs, saw {seen}");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let manager = task_manager().await;
        let noop: TaskFn = Arc::new(|| Box::pin(async { Ok(()) }));
        manager
            .spawn_periodic("job", Duration::from_secs(60), noop.clone())
            .unwrap();
        assert!(manager
            .spawn_periodic("job", Duration::from_secs(60), noop)
            .is_err());
    }

    #[tokio::test]
    async fn test_one_shot_task() {
        let manager = task_manager().await;
        let done = Arc::new(AtomicBool::new(false));
        let done_task = done.clone();
        manager
            .spawn_once(
                "once",
                Box::pin(async move {
                    done_task.store(true, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything() {
        let manager = task_manager().await;
        let noop: TaskFn = Arc::new(|| Box::pin(async { Ok(()) }));
        manager
            .spawn_periodic("a", Duration::from_secs(60), noop.clone())
            .unwrap();
        manager
            .spawn_periodic("b", Duration::from_secs(60), noop)
            .unwrap();

        manager.shutdown().await.unwrap();
        assert!(manager.list().is_empty());
    }
}
