//! Adapting push-style notifiers to the pull protocol.
//!
//! An [`Observable`] pushes values whenever it likes; an [`ObservableSource`]
//! subscribes to it on start and hands values downstream only as demand
//! arrives, buffering in between under the same overflow strategies a
//! [`QueueSource`](super::QueueSource) uses. A push source cannot be slowed
//! down, so [`OverflowStrategy::Backpressure`] is rejected.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::buffer::{Admission, Buffer, OverflowStrategy};
use crate::core::{Error, Result};
use crate::stage::{AsyncCallback, Attributes, SourceStage, StageContext, StageLogic};

/// Notifications an [`Observer`] forwards into its stage
pub enum ObservableEvent<T> {
    /// A pushed value
    Next(T),
    /// The observable failed
    Error(Error),
    /// The observable finished
    Completed,
}

/// Receives notifications from an [`Observable`].
///
/// Clonable and usable from any thread; each notification is handed to the
/// subscribed stage through its bridge.
pub struct Observer<T> {
    callback: AsyncCallback<ObservableEvent<T>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("stopped", &self.callback.is_stopped())
            .finish()
    }
}

impl<T: Send + 'static> Observer<T> {
    /// Deliver the next value
    pub fn on_next(&self, value: T) {
        self.callback.invoke(ObservableEvent::Next(value));
    }

    /// Terminate with an error
    pub fn on_error(&self, error: Error) {
        self.callback.invoke(ObservableEvent::Error(error));
    }

    /// Terminate normally
    pub fn on_completed(&self) {
        self.callback.invoke(ObservableEvent::Completed);
    }

    /// Whether the subscribed stage has stopped listening
    pub fn is_closed(&self) -> bool {
        self.callback.is_stopped()
    }
}

/// Handle to an active subscription; disposing it unsubscribes.
///
/// Dropping the subscription disposes it.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Subscription that runs `dispose` when disposed
    pub fn new<F>(dispose: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Subscription with nothing to release
    pub fn empty() -> Self {
        Self { dispose: None }
    }

    /// Unsubscribe now
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.dispose.is_none())
            .finish()
    }
}

/// A push-style source of values.
pub trait Observable<T>: Send + 'static {
    /// Start pushing to `observer` until the returned subscription is disposed
    fn subscribe(&self, observer: Observer<T>) -> Subscription;
}

struct SubjectState<T> {
    observers: Vec<(u64, Observer<T>)>,
    next_id: u64,
    terminal: Option<Option<Error>>,
}

/// A hot observable that multicasts every value to its current observers.
///
/// Observers subscribing after termination are terminated immediately.
pub struct Subject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                observers: Vec::new(),
                next_id: 0,
                terminal: None,
            })),
        }
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// Create a subject with no observers
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscribed observers
    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Push `value` to every observer
    pub fn next(&self, value: T) {
        let observers = self.snapshot();
        for observer in observers {
            observer.on_next(value.clone());
        }
    }

    /// Fail every observer and terminate the subject
    pub fn error(&self, error: Error) {
        for observer in self.terminate(Some(error.clone())) {
            observer.on_error(error.clone());
        }
    }

    /// Complete every observer and terminate the subject
    pub fn complete(&self) {
        for observer in self.terminate(None) {
            observer.on_completed();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SubjectState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Observer<T>> {
        let state = self.lock();
        if state.terminal.is_some() {
            return Vec::new();
        }
        state.observers.iter().map(|(_, o)| o.clone()).collect()
    }

    fn terminate(&self, outcome: Option<Error>) -> Vec<Observer<T>> {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return Vec::new();
        }
        state.terminal = Some(outcome);
        state.observers.drain(..).map(|(_, o)| o).collect()
    }
}

impl<T: Clone + Send + 'static> Observable<T> for Subject<T> {
    fn subscribe(&self, observer: Observer<T>) -> Subscription {
        let mut state = self.lock();
        if let Some(terminal) = &state.terminal {
            match terminal {
                Some(error) => observer.on_error(error.clone()),
                None => observer.on_completed(),
            }
            return Subscription::empty();
        }

        let id = state.next_id;
        state.next_id += 1;
        state.observers.push((id, observer));
        drop(state);

        let subject = self.clone();
        Subscription::new(move || {
            subject.lock().observers.retain(|(other, _)| *other != id);
        })
    }
}

/// Handler registered with an event-style API
pub type EventHandler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Adapts an add/remove handler pair into an [`Observable`].
///
/// `add` registers a handler and returns a registration key; `remove`
/// unregisters it when the subscription is disposed.
pub struct EventObservable<T, A, Rm> {
    add: A,
    remove: Arc<Rm>,
    _marker: PhantomData<fn(T)>,
}

impl<T, K, A, Rm> EventObservable<T, A, Rm>
where
    T: Send + 'static,
    K: Send + 'static,
    A: Fn(EventHandler<T>) -> K + Send + Sync + 'static,
    Rm: Fn(K) + Send + Sync + 'static,
{
    /// Build an observable from handler registration functions
    pub fn new(add: A, remove: Rm) -> Self {
        Self {
            add,
            remove: Arc::new(remove),
            _marker: PhantomData,
        }
    }
}

impl<T, K, A, Rm> Observable<T> for EventObservable<T, A, Rm>
where
    T: Send + 'static,
    K: Send + 'static,
    A: Fn(EventHandler<T>) -> K + Send + Sync + 'static,
    Rm: Fn(K) + Send + Sync + 'static,
{
    fn subscribe(&self, observer: Observer<T>) -> Subscription {
        let handler: EventHandler<T> = Arc::new(move |value| observer.on_next(value));
        let key = (self.add)(handler);
        let remove = self.remove.clone();
        Subscription::new(move || remove(key))
    }
}

/// A source that re-exposes an [`Observable`] through the pull protocol.
pub struct ObservableSource<T, O> {
    observable: O,
    capacity: usize,
    strategy: OverflowStrategy,
    attributes: Attributes,
    _marker: PhantomData<fn() -> T>,
}

impl<T, O> ObservableSource<T, O>
where
    T: Send + 'static,
    O: Observable<T>,
{
    /// Create an adapter buffering up to `capacity` undemanded values.
    ///
    /// Fails with [`Error::UnsupportedConfiguration`] for
    /// [`OverflowStrategy::Backpressure`].
    pub fn new(observable: O, capacity: usize, strategy: OverflowStrategy) -> Result<Self> {
        if strategy == OverflowStrategy::Backpressure {
            return Err(Error::UnsupportedConfiguration(format!(
                "{} overflow strategy is not supported for push sources",
                strategy
            )));
        }
        Ok(Self {
            observable,
            capacity,
            strategy,
            attributes: Attributes::default(),
            _marker: PhantomData,
        })
    }

    /// Attach stage attributes
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl<T, O> SourceStage for ObservableSource<T, O>
where
    T: Send + 'static,
    O: Observable<T>,
{
    type Item = T;
    type Mat = ();
    type Logic = ObservableLogic<T, O>;

    fn name(&self) -> &'static str {
        "observableSource"
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    fn create_logic(
        self,
        _attributes: &Attributes,
        _callback: AsyncCallback<ObservableEvent<T>>,
    ) -> Result<(Self::Logic, ())> {
        let logic = ObservableLogic {
            observable: self.observable,
            buffer: Buffer::new(self.capacity),
            strategy: self.strategy,
            subscription: None,
        };
        Ok((logic, ()))
    }
}

/// Stage logic of an [`ObservableSource`]
pub struct ObservableLogic<T, O> {
    observable: O,
    buffer: Buffer<T>,
    strategy: OverflowStrategy,
    subscription: Option<Subscription>,
}

impl<T, O> StageLogic for ObservableLogic<T, O>
where
    T: Send + 'static,
    O: Observable<T>,
{
    type Item = T;
    type Event = ObservableEvent<T>;

    fn pre_start(&mut self, ctx: &mut StageContext<'_, T, ObservableEvent<T>>) -> Result<()> {
        let observer = Observer {
            callback: ctx.async_callback(),
        };
        self.subscription = Some(self.observable.subscribe(observer));
        debug!(stage = ctx.stage_name(), "subscribed");
        Ok(())
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_, T, ObservableEvent<T>>) -> Result<()> {
        if let Some(value) = self.buffer.dequeue() {
            ctx.push(value)?;
        }
        Ok(())
    }

    fn on_event(
        &mut self,
        event: ObservableEvent<T>,
        ctx: &mut StageContext<'_, T, ObservableEvent<T>>,
    ) -> Result<()> {
        match event {
            ObservableEvent::Next(value) => {
                if ctx.is_available() {
                    return ctx.push(value);
                }
                match self.buffer.admit(value, self.strategy) {
                    Admission::Enqueued(kind) => {
                        trace!(stage = ctx.stage_name(), ?kind, buffered = self.buffer.len(), "value buffered");
                    }
                    Admission::Dropped(_) => {
                        trace!(stage = ctx.stage_name(), "value dropped");
                    }
                    Admission::Overflow(_) => {
                        return Err(Error::BufferOverflow {
                            capacity: self.buffer.capacity(),
                        });
                    }
                    Admission::Backpressured(_) => {
                        return Err(Error::UnsupportedConfiguration(
                            "push sources cannot be backpressured".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            ObservableEvent::Error(error) => {
                debug!(stage = ctx.stage_name(), %error, "observable failed");
                ctx.fail_stage(error);
                Ok(())
            }
            ObservableEvent::Completed => {
                debug!(stage = ctx.stage_name(), "observable completed");
                ctx.complete_stage();
                Ok(())
            }
        }
    }

    fn post_stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.dispose();
            debug!("unsubscribed");
        }
        self.buffer.clear();
    }
}
