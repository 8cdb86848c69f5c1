//! Worker pools backing the task submission surfaces.

use crate::handle::{CancelToken, TaskHandle};
use nexus_core::error::{Error, Result};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    closed: AtomicBool,
    live_workers: AtomicUsize,
    queued: AtomicUsize,
}

/// A named pool of OS worker threads fed from an MPMC queue
pub struct WorkerPool {
    name: String,
    tx: Mutex<Option<crossbeam_channel::Sender<Job>>>,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Spawn `workers` threads named `<prefix>-<n>`
    pub fn new(prefix: impl Into<String>, workers: usize) -> Self {
        let prefix = prefix.into();
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let shared = Arc::new(PoolShared {
            closed: AtomicBool::new(false),
            live_workers: AtomicUsize::new(workers),
            queued: AtomicUsize::new(0),
        });

        for n in 0..workers {
            let rx = rx.clone();
            let shared = shared.clone();
            let thread_name = format!("{prefix}-{n}");
            std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        shared.queued.fetch_sub(1, Ordering::SeqCst);
                        job();
                    }
                    shared.live_workers.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap_or_else(|e| panic!("failed to spawn worker thread {thread_name}: {e}"));
        }

        Self {
            name: prefix,
            tx: Mutex::new(Some(tx)),
            shared,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    /// Submit a job; the closure receives the task's cancel token.
    ///
    /// Cancelled-while-queued jobs are skipped; panics are caught and
    /// surfaced through the handle.
    pub fn submit<T, F>(&self, f: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::concurrency(format!(
                "pool '{}' is shut down",
                self.name
            )));
        }

        let token = CancelToken::new();
        let job_token = token.clone();
        let shared = self.shared.clone();
        let (result_tx, result_rx) = oneshot::channel();

        let job: Job = Box::new(move || {
            if job_token.is_cancelled() || shared.closed.load(Ordering::SeqCst) {
                let _ = result_tx.send(Err(Error::TaskCancelled));
                return;
            }
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| f(&job_token)));
            let _ = match outcome {
                Ok(value) => result_tx.send(Ok(value)),
                Err(_) => result_tx.send(Err(Error::concurrency("task panicked"))),
            };
        });

        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(Error::concurrency(format!(
                "pool '{}' is shut down",
                self.name
            )));
        };
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        tx.send(job)
            .map_err(|_| Error::concurrency(format!("pool '{}' queue closed", self.name)))?;
        Ok(TaskHandle::new(result_rx, token))
    }

    /// Stop accepting work, cancel queued jobs, and wait for running jobs
    /// up to `timeout`. Returns whether every worker drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.tx.lock().take();

        let deadline = Instant::now() + timeout;
        while self.live_workers() > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(
                    pool = %self.name,
                    live = self.live_workers(),
                    "Pool shutdown timed out with workers still running"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_submit_and_await() {
        let pool = WorkerPool::new("test-cpu", 2);
        let handle = pool.submit(|_| 21 * 2).unwrap();
        assert_eq!(handle.await.unwrap(), 42);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_skipped() {
        let pool = WorkerPool::new("test-skip", 1);
        let ran = Arc::new(AtomicU32::new(0));

        // Occupy the single worker so the next job stays queued
        let gate = Arc::new(AtomicBool::new(false));
        let gate_worker = gate.clone();
        let blocker = pool
            .submit(move |_| {
                while !gate_worker.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
            .unwrap();

        let ran_clone = ran.clone();
        let queued = pool
            .submit(move |_| {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        queued.cancel();
        gate.store(true, Ordering::SeqCst);

        blocker.await.unwrap();
        let err = queued.await.unwrap_err();
        assert!(matches!(err, Error::TaskCancelled));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_running_task_observes_cancel_flag() {
        let pool = WorkerPool::new("test-coop", 1);
        let handle = pool
            .submit(|token: &CancelToken| {
                let mut spins = 0u64;
                while !token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(2));
                    spins += 1;
                    if spins > 2_000 {
                        break;
                    }
                }
                token.is_cancelled()
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        assert!(handle.await.unwrap());
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_panic_contained() {
        let pool = WorkerPool::new("test-panic", 1);
        let handle = pool.submit(|_| -> u32 { panic!("inside job") }).unwrap();
        assert!(handle.await.is_err());

        // Pool still serves later jobs
        let ok = pool.submit(|_| 7).unwrap();
        assert_eq!(ok.await.unwrap(), 7);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = WorkerPool::new("test-down", 1);
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(pool.submit(|_| ()).is_err());
    }
}
