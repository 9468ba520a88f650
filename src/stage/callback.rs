//! The async callback bridge into a stage's single execution context.
//!
//! Every stimulus a stage reacts to (downstream pull and cancel, external
//! offers, completions of deferred work, push notifications) travels through
//! one unbounded channel owned by the stage's interpreter, which handles them
//! one at a time. [`AsyncCallback::invoke`] can be called from any thread at
//! any point in the stage's life. Once the stage has stopped, events are no
//! longer handed to the stage logic; each one goes exactly once to the drain
//! handler the stage installed on its way out, so promises carried inside an
//! event are always settled.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;

/// Everything the interpreter of a stage reacts to.
pub(crate) enum Signal<E> {
    /// Downstream wants one element
    Pull,
    /// Downstream no longer wants elements
    Cancel,
    /// An event submitted through the bridge
    Event(E),
}

/// Settles whatever an event carries once its stage is gone.
///
/// Must not assume the stage state still exists.
pub type DrainHandler<E> = Arc<dyn Fn(E) + Send + Sync>;

struct Detached<E> {
    drain: OnceLock<DrainHandler<E>>,
}

impl<E> Detached<E> {
    fn deliver(&self, event: E) {
        match self.drain.get() {
            Some(drain) => drain(event),
            // The interpreter went away without stopping (runtime shutdown).
            // Dropping the event drops any promise in it, which its observer
            // sees as a detached stream.
            None => tracing::warn!("discarding event for a stage that never stopped cleanly"),
        }
    }
}

/// Thread-safe handle for submitting events into a stage.
pub struct AsyncCallback<E> {
    tx: mpsc::UnboundedSender<Signal<E>>,
    detached: Arc<Detached<E>>,
}

impl<E> Clone for AsyncCallback<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            detached: self.detached.clone(),
        }
    }
}

impl<E> fmt::Debug for AsyncCallback<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCallback")
            .field("stopped", &self.tx.is_closed())
            .finish()
    }
}

impl<E: Send + 'static> AsyncCallback<E> {
    /// Submit `event` to the stage.
    ///
    /// Never blocks and never fails: a stopped stage routes the event to its
    /// drain handler on the calling thread.
    pub fn invoke(&self, event: E) {
        if let Err(mpsc::error::SendError(signal)) = self.tx.send(Signal::Event(event)) {
            if let Signal::Event(event) = signal {
                self.detached.deliver(event);
            }
        }
    }

    /// Whether the stage has stopped accepting events
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn demand_port(&self) -> Box<dyn DemandPort> {
        Box::new(self.tx.clone())
    }
}

/// Downstream side of the bridge: how a handle sends pull and cancel.
pub(crate) trait DemandPort: Send + Sync {
    fn pull(&self);
    fn cancel(&self);
}

impl<E: Send> DemandPort for mpsc::UnboundedSender<Signal<E>> {
    fn pull(&self) {
        let _ = self.send(Signal::Pull);
    }

    fn cancel(&self) {
        let _ = self.send(Signal::Cancel);
    }
}

/// Receiving side of the bridge, owned by the interpreter.
pub(crate) struct Inbox<E> {
    rx: mpsc::UnboundedReceiver<Signal<E>>,
    detached: Arc<Detached<E>>,
}

impl<E> Inbox<E> {
    pub(crate) async fn recv(&mut self) -> Option<Signal<E>> {
        self.rx.recv().await
    }

    /// Stop delivering to the stage.
    ///
    /// Installs `drain` for late submissions, then closes the channel and
    /// drains whatever was already queued. Returns how many events were drained.
    pub(crate) fn detach(mut self, drain: DrainHandler<E>) -> usize {
        let _ = self.detached.drain.set(drain.clone());
        self.rx.close();
        let mut drained = 0;
        while let Ok(signal) = self.rx.try_recv() {
            if let Signal::Event(event) = signal {
                drain(event);
                drained += 1;
            }
        }
        drained
    }
}

/// Create a connected callback/inbox pair.
pub(crate) fn bridge<E>() -> (AsyncCallback<E>, Inbox<E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let detached = Arc::new(Detached {
        drain: OnceLock::new(),
    });
    (
        AsyncCallback {
            tx,
            detached: detached.clone(),
        },
        Inbox { rx, detached },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (DrainHandler<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let drain: DrainHandler<u32> = Arc::new(move |event| sink.lock().unwrap().push(event));
        (drain, seen)
    }

    async fn next_event(inbox: &mut Inbox<u32>) -> Option<u32> {
        match inbox.recv().await? {
            Signal::Event(event) => Some(event),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_events_before_start_are_delivered_in_order() {
        let (callback, mut inbox) = bridge();
        callback.invoke(1);
        callback.invoke(2);
        callback.invoke(3);
        assert_eq!(next_event(&mut inbox).await, Some(1));
        assert_eq!(next_event(&mut inbox).await, Some(2));
        assert_eq!(next_event(&mut inbox).await, Some(3));
    }

    #[tokio::test]
    async fn test_queued_events_are_drained_on_detach() {
        let (callback, inbox) = bridge();
        callback.invoke(7);
        callback.invoke(8);
        let (drain, seen) = recorder();
        assert_eq!(inbox.detach(drain), 2);
        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
        assert!(callback.is_stopped());
    }

    #[tokio::test]
    async fn test_late_events_go_to_drain_exactly_once() {
        let (callback, inbox) = bridge();
        let (drain, seen) = recorder();
        inbox.detach(drain);
        callback.invoke(42);
        callback.clone().invoke(43);
        assert_eq!(*seen.lock().unwrap(), vec![42, 43]);
    }

    #[tokio::test]
    async fn test_cross_thread_submission_keeps_per_caller_order() {
        let (callback, mut inbox) = bridge();
        let threads: Vec<_> = (0..4u32)
            .map(|t| {
                let callback = callback.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        callback.invoke(t * 1000 + i);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let mut last = [None::<u32>; 4];
        for _ in 0..400 {
            let event = next_event(&mut inbox).await.unwrap();
            let caller = (event / 1000) as usize;
            if let Some(prev) = last[caller] {
                assert!(event > prev);
            }
            last[caller] = Some(event);
        }
    }
}
