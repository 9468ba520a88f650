//! Single-resolution settlement primitive.
//!
//! Offer results, completion watchers and lazily materialized values are all
//! settled exactly once, but several paths may race to settle them: the normal
//! stage logic, the post-stop cleanup and the detached drain. A [`Promise`] is
//! owned by whoever may settle it; the first settlement wins and later
//! attempts are no-ops that report `false`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::core::{Error, Result};

/// The settling half of a single-resolution value.
#[derive(Debug)]
pub struct Promise<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

/// The observing half of a single-resolution value.
///
/// Resolves to [`Error::StreamDetached`] if its [`Promise`] is dropped
/// without being settled.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct PromiseFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
}

/// Create a connected promise/future pair.
pub fn promise<T>() -> (Promise<T>, PromiseFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (Promise { tx: Some(tx) }, PromiseFuture { rx })
}

impl<T> Promise<T> {
    /// Settle with `result`. Returns `false` if already settled.
    pub fn try_complete(&mut self, result: Result<T>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // A dropped observer still counts as settled.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Settle with a value. Returns `false` if already settled.
    pub fn try_success(&mut self, value: T) -> bool {
        self.try_complete(Ok(value))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn try_failure(&mut self, error: Error) -> bool {
        self.try_complete(Err(error))
    }

    /// Whether this promise has been settled
    pub fn is_settled(&self) -> bool {
        self.tx.is_none()
    }
}

impl<T> Future for PromiseFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::StreamDetached)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_first_settlement_wins() {
        let (mut promise, future) = promise::<u32>();
        assert!(promise.try_success(1));
        assert!(!promise.try_success(2));
        assert!(!promise.try_failure(Error::Shutdown));
        assert!(promise.is_settled());
        assert_eq!(future.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_promise_detaches() {
        let (promise, future) = promise::<u32>();
        drop(promise);
        assert!(matches!(future.await, Err(Error::StreamDetached)));
    }

    #[test]
    fn test_pending_until_settled() {
        let (mut promise, future) = promise::<&str>();
        let mut future = task::spawn(future);
        assert_pending!(future.poll());
        promise.try_success("done");
        assert!(future.is_woken());
        let result = assert_ready!(future.poll());
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_settling_without_observer_still_counts() {
        let (mut promise, future) = promise::<()>();
        drop(future);
        assert!(promise.try_success(()));
        assert!(!promise.try_success(()));
    }
}
