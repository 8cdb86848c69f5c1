//! Task handles and cooperative cancellation.

use nexus_core::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Cooperative cancellation flag shared between a handle and its task.
///
/// Cancelling a queued task prevents execution; a running task observes
/// the flag at points of its choosing and is never forcibly terminated.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Awaitable handle for a submitted task
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
    token: CancelToken,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T>>, token: CancelToken) -> Self {
        Self { rx, token }
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The token observed by the running task
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::concurrency(
                "task dropped before completion",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_handle_resolves() {
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(rx, CancelToken::new());
        tx.send(Ok(5u32)).ok();
        assert_eq!(handle.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_error() {
        let (tx, rx) = oneshot::channel::<Result<u32>>();
        let handle = TaskHandle::new(rx, CancelToken::new());
        drop(tx);
        assert!(handle.await.is_err());
    }
}
