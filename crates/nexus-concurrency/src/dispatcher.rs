//! Main-thread dispatch.
//!
//! UI/event-loop singletons must run on the designated main thread. The
//! dispatcher is an explicit handle created on that thread; "am I the main
//! thread?" is an affinity query on the handle, not global state.

use nexus_core::error::{Error, Result};
use std::thread::ThreadId;
use tokio::sync::{mpsc, oneshot};

type MainJob = Box<dyn FnOnce() + Send + 'static>;

/// Handle for scheduling closures onto the main thread
#[derive(Clone)]
pub struct MainDispatcher {
    main_thread: ThreadId,
    tx: mpsc::UnboundedSender<MainJob>,
}

/// Job stream drained by the main thread
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<MainJob>,
}

/// Create the dispatcher pair. Must be called on the main thread; the
/// calling thread becomes the dispatch affinity target.
pub fn main_dispatcher() -> (MainDispatcher, MainLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MainDispatcher {
            main_thread: std::thread::current().id(),
            tx,
        },
        MainLoop { rx },
    )
}

impl MainDispatcher {
    /// Whether the current thread is the designated main thread
    pub fn is_main_thread(&self) -> bool {
        std::thread::current().id() == self.main_thread
    }

    /// Run a closure on the main thread.
    ///
    /// Executes inline when already on the main thread; otherwise hands the
    /// job to the main loop and awaits its completion.
    pub async fn run_on_main<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_main_thread() {
            return Ok(f());
        }

        let (result_tx, result_rx) = oneshot::channel();
        let job: MainJob = Box::new(move || {
            let _ = result_tx.send(f());
        });
        self.tx
            .send(job)
            .map_err(|_| Error::concurrency("main loop is no longer running"))?;
        result_rx
            .await
            .map_err(|_| Error::concurrency("main loop dropped the job"))
    }
}

impl MainLoop {
    /// Drain one pending job, if any. Returns false when all dispatcher
    /// handles are gone.
    pub fn drain_pending(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(job) => job(),
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Run jobs until every dispatcher handle is dropped
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
    }
}
