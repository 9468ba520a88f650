//! The outlet protocol between a stage and its downstream.
//!
//! The stage side holds an [`Outlet`]; downstream holds the matching
//! [`SourceHandle`]. Demand travels up as one pull at a time through the
//! stage's bridge, elements travel down through an emission channel. A pull
//! is answered by exactly one emission: an element, completion or failure.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use super::callback::DemandPort;
use crate::core::{Error, Result, Source};

/// State of a stage's single output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutletState {
    /// No outstanding demand
    Idle,
    /// Downstream pulled and awaits one element
    DemandPending,
    /// Completed or canceled; absorbing
    Closed,
    /// Failed; absorbing
    Failed,
}

impl OutletState {
    /// Whether no further push or pull is valid
    pub fn is_terminal(self) -> bool {
        matches!(self, OutletState::Closed | OutletState::Failed)
    }
}

pub(crate) enum Emission<T> {
    Element(T),
    Complete,
    Failed(Error),
}

/// Stage side of the outlet protocol.
pub struct Outlet<T> {
    state: OutletState,
    tx: mpsc::UnboundedSender<Emission<T>>,
}

impl<T> Outlet<T> {
    /// Current protocol state
    pub fn state(&self) -> OutletState {
        self.state
    }

    /// Whether downstream demand is pending, so a push is allowed
    pub fn is_available(&self) -> bool {
        self.state == OutletState::DemandPending
    }

    /// Whether the outlet reached a terminal state
    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    /// Deliver one element to the pending demand.
    pub fn push(&mut self, element: T) -> Result<()> {
        match self.state {
            OutletState::DemandPending => {
                self.state = OutletState::Idle;
                // Downstream may have gone away; its cancel is on the way.
                let _ = self.tx.send(Emission::Element(element));
                Ok(())
            }
            OutletState::Idle => Err(Error::protocol("push without downstream demand")),
            OutletState::Closed | OutletState::Failed => {
                Err(Error::protocol("push on a terminated outlet"))
            }
        }
    }

    /// Register a downstream pull. Returns whether the stage should see it.
    pub(crate) fn on_pull(&mut self) -> Result<bool> {
        match self.state {
            OutletState::Idle => {
                self.state = OutletState::DemandPending;
                Ok(true)
            }
            OutletState::DemandPending => Err(Error::protocol("pull while demand is already pending")),
            OutletState::Closed | OutletState::Failed => Ok(false),
        }
    }

    /// Register a downstream cancel. Returns whether the stage should see it.
    pub(crate) fn on_cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = OutletState::Closed;
        true
    }

    pub(crate) fn complete(&mut self) {
        if !self.state.is_terminal() {
            self.state = OutletState::Closed;
            let _ = self.tx.send(Emission::Complete);
        }
    }

    pub(crate) fn fail(&mut self, error: Error) {
        if !self.state.is_terminal() {
            self.state = OutletState::Failed;
            let _ = self.tx.send(Emission::Failed(error));
        }
    }
}

/// Sends pull and cancel upstream; cancels the stage when dropped while armed.
pub(crate) struct DemandHandle {
    port: Box<dyn DemandPort>,
    armed: bool,
}

impl DemandHandle {
    pub(crate) fn pull(&self) {
        self.port.pull();
    }

    pub(crate) fn cancel(&mut self) {
        if self.armed {
            self.armed = false;
            self.port.cancel();
        }
    }

    /// The stage terminated on its own; nothing left to cancel.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DemandHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Downstream side of a materialized stage.
///
/// Pull elements one at a time with [`pull`](Self::pull), in batches through
/// the [`Source`] impl, or as a [`Stream`] via [`into_stream`](Self::into_stream).
/// Dropping the handle cancels the stage.
pub struct SourceHandle<T> {
    demand: DemandHandle,
    emissions: mpsc::UnboundedReceiver<Emission<T>>,
    in_flight: bool,
    terminal: Option<Option<Error>>,
    name: String,
}

impl<T> SourceHandle<T> {
    /// Name of the stage this handle is attached to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the stage has completed, failed or been canceled
    pub fn is_terminated(&self) -> bool {
        self.terminal.is_some()
    }

    /// Request one element.
    ///
    /// Resolves to `Ok(Some(element))`, `Ok(None)` once the stage completed,
    /// or the stage's failure. After termination the same outcome repeats.
    ///
    /// Cancel safe: if the returned future is dropped, the demand it sent
    /// stays outstanding and the next pull picks up its answer.
    pub async fn pull(&mut self) -> Result<Option<T>> {
        if let Some(outcome) = self.repeat_terminal() {
            return outcome;
        }
        self.request();
        let emission = self.emissions.recv().await;
        self.in_flight = false;
        self.settle(emission)
    }

    /// Take an element only if one is already waiting, leaving demand
    /// outstanding otherwise.
    pub fn try_pull(&mut self) -> Option<Result<Option<T>>> {
        if let Some(outcome) = self.repeat_terminal() {
            return Some(outcome);
        }
        self.request();
        match self.emissions.try_recv() {
            Ok(emission) => {
                self.in_flight = false;
                Some(self.accept(emission))
            }
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.in_flight = false;
                Some(self.settle(None))
            }
        }
    }

    /// Signal that no more elements are wanted. The stage settles its
    /// pending promises, closes its resources and stops.
    pub fn cancel(mut self) {
        self.demand.cancel();
    }

    /// Consume the handle as a stream of elements ending after completion
    /// or the first failure.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send
    where
        T: Send + 'static,
    {
        futures::stream::unfold(Some(self), |handle| async move {
            let mut handle = handle?;
            match handle.pull().await {
                Ok(Some(element)) => Some((Ok(element), Some(handle))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }

    fn request(&mut self) {
        if !self.in_flight {
            self.in_flight = true;
            self.demand.pull();
        }
    }

    fn repeat_terminal(&self) -> Option<Result<Option<T>>> {
        self.terminal.as_ref().map(|terminal| match terminal {
            None => Ok(None),
            Some(error) => Err(error.clone()),
        })
    }

    fn settle(&mut self, emission: Option<Emission<T>>) -> Result<Option<T>> {
        match emission {
            Some(emission) => self.accept(emission),
            None => {
                self.demand.disarm();
                self.terminal = Some(Some(Error::StreamDetached));
                Err(Error::StreamDetached)
            }
        }
    }

    fn accept(&mut self, emission: Emission<T>) -> Result<Option<T>> {
        match emission {
            Emission::Element(element) => Ok(Some(element)),
            Emission::Complete => {
                self.demand.disarm();
                self.terminal = Some(None);
                Ok(None)
            }
            Emission::Failed(error) => {
                self.demand.disarm();
                self.terminal = Some(Some(error.clone()));
                Err(error)
            }
        }
    }

    pub(crate) fn into_parts(self) -> (DemandHandle, mpsc::UnboundedReceiver<Emission<T>>) {
        (self.demand, self.emissions)
    }
}

#[async_trait]
impl<T: Send + 'static> Source for SourceHandle<T> {
    type Item = T;

    /// Waits for the first element, then takes whatever else is already
    /// waiting. An empty batch means the stage completed.
    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>> {
        let mut items = Vec::new();
        if demand == 0 {
            return Ok(items);
        }
        match self.pull().await? {
            Some(item) => items.push(item),
            None => return Ok(items),
        }
        while items.len() < demand {
            match self.try_pull() {
                Some(Ok(Some(item))) => items.push(item),
                // Termination repeats on the next call.
                Some(Ok(None)) | Some(Err(_)) | None => break,
            }
        }
        Ok(items)
    }
}

/// Wire a fresh outlet to a downstream handle.
pub(crate) fn outlet<T>(port: Box<dyn DemandPort>, name: String) -> (Outlet<T>, SourceHandle<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Outlet {
            state: OutletState::Idle,
            tx,
        },
        SourceHandle {
            demand: DemandHandle { port, armed: true },
            emissions: rx,
            in_flight: false,
            terminal: None,
            name,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingPort {
        pulls: AtomicUsize,
        cancels: AtomicUsize,
    }

    impl DemandPort for Arc<CountingPort> {
        fn pull(&self) {
            self.pulls.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wired() -> (Outlet<u32>, SourceHandle<u32>, Arc<CountingPort>) {
        let port = Arc::new(CountingPort::default());
        let (outlet, handle) = outlet(Box::new(port.clone()), "test".to_string());
        (outlet, handle, port)
    }

    #[test]
    fn test_state_transitions() {
        let (mut outlet, _handle, _) = wired();
        assert_eq!(outlet.state(), OutletState::Idle);
        assert!(outlet.push(1).is_err());

        assert!(outlet.on_pull().unwrap());
        assert!(outlet.is_available());
        assert!(outlet.on_pull().is_err());

        outlet.push(1).unwrap();
        assert_eq!(outlet.state(), OutletState::Idle);

        outlet.complete();
        assert_eq!(outlet.state(), OutletState::Closed);
        assert!(!outlet.on_pull().unwrap());
        assert!(outlet.push(2).is_err());

        outlet.fail(Error::Shutdown);
        assert_eq!(outlet.state(), OutletState::Closed);
    }

    #[tokio::test]
    async fn test_handle_sees_elements_then_completion() {
        let (mut outlet, mut handle, port) = wired();
        outlet.on_pull().unwrap();
        outlet.push(5).unwrap();
        assert_eq!(handle.pull().await.unwrap(), Some(5));

        outlet.complete();
        assert_eq!(handle.pull().await.unwrap(), None);
        assert_eq!(handle.pull().await.unwrap(), None);
        assert!(handle.is_terminated());
        assert_eq!(port.pulls.load(Ordering::SeqCst), 2);

        drop(handle);
        assert_eq!(port.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_repeats() {
        let (mut outlet, mut handle, _) = wired();
        outlet.fail(Error::BufferOverflow { capacity: 1 });
        assert!(matches!(handle.pull().await, Err(Error::BufferOverflow { capacity: 1 })));
        assert!(matches!(handle.pull().await, Err(Error::BufferOverflow { capacity: 1 })));
        assert_eq!(outlet.state(), OutletState::Failed);
    }

    #[test]
    fn test_drop_cancels_once() {
        let (mut outlet, handle, port) = wired();
        drop(handle);
        assert_eq!(port.cancels.load(Ordering::SeqCst), 1);
        assert!(outlet.on_cancel());
        assert!(!outlet.on_cancel());
    }
}
