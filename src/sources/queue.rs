//! A source fed by explicit offers from outside the stream.
//!
//! Materializing a [`QueueSource`] yields a [`SourceQueue`]: any task or
//! thread can [`offer`](SourceQueue::offer) elements into it and learn from
//! the returned future whether each element was enqueued, dropped or
//! rejected. With a capacity of zero the queue only hands elements over
//! directly, holding at most one offer until downstream asks for it.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{FutureExt, Shared};
use tracing::{debug, trace};

use crate::buffer::{Admission, Buffer, EnqueueKind, OverflowStrategy};
use crate::core::{Error, Result};
use crate::stage::{
    promise, AsyncCallback, Attributes, DrainHandler, Promise, PromiseFuture, SourceStage,
    StageContext, StageLogic,
};

/// Outcome of a single offer.
#[derive(Debug, Clone)]
pub enum OfferResult {
    /// The element was accepted
    Enqueued(EnqueueKind),
    /// The element was discarded by the overflow strategy
    Dropped,
    /// The element overflowed a `Fail` queue, which failed the stream
    Failure(Error),
    /// The stream was canceled or failed before the element was taken
    QueueClosed,
}

impl OfferResult {
    /// Whether the element was accepted
    pub fn is_enqueued(&self) -> bool {
        matches!(self, OfferResult::Enqueued(_))
    }

    fn label(&self) -> &'static str {
        match self {
            OfferResult::Enqueued(_) => "enqueued",
            OfferResult::Dropped => "dropped",
            OfferResult::Failure(_) => "failure",
            OfferResult::QueueClosed => "queue_closed",
        }
    }
}

/// Future of an [`OfferResult`].
///
/// Resolves to `Err` when the offer was illegal
/// ([`Error::IllegalConcurrentOffer`]) or the stream was already gone
/// ([`Error::StreamDetached`]).
pub type OfferFuture = PromiseFuture<OfferResult>;

/// Clonable future of the queue's completion.
pub type CompletionFuture = Shared<PromiseFuture<()>>;

/// Events the queue handle submits to its stage
pub enum QueueEvent<T> {
    /// An element together with the promise of its outcome
    Offer {
        element: T,
        promise: Promise<OfferResult>,
    },
    /// Complete once drained
    Complete,
    /// Fail the stream
    Fail(Error),
}

/// Materialized value of a [`QueueSource`].
pub struct SourceQueue<T> {
    callback: AsyncCallback<QueueEvent<T>>,
    completion: CompletionFuture,
}

impl<T> Clone for SourceQueue<T> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            completion: self.completion.clone(),
        }
    }
}

impl<T> fmt::Debug for SourceQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceQueue")
            .field("callback", &self.callback)
            .finish()
    }
}

impl<T: Send + 'static> SourceQueue<T> {
    /// Offer an element to the stream
    pub fn offer(&self, element: T) -> OfferFuture {
        let (promise, future) = promise();
        self.callback.invoke(QueueEvent::Offer { element, promise });
        future
    }

    /// Complete the stream once every buffered and pending element is taken
    pub fn complete(&self) {
        self.callback.invoke(QueueEvent::Complete);
    }

    /// Fail the stream immediately
    pub fn fail(&self, error: Error) {
        self.callback.invoke(QueueEvent::Fail(error));
    }

    /// Resolves when the stream completes, fails or is canceled
    pub fn watch_completion(&self) -> CompletionFuture {
        self.completion.clone()
    }
}

/// A source that emits elements offered through its [`SourceQueue`].
pub struct QueueSource<T> {
    capacity: usize,
    strategy: OverflowStrategy,
    attributes: Attributes,
    _marker: PhantomData<fn() -> T>,
}

impl<T> QueueSource<T> {
    /// Create a queue source buffering up to `capacity` elements
    pub fn new(capacity: usize, strategy: OverflowStrategy) -> Self {
        Self {
            capacity,
            strategy,
            attributes: Attributes::default(),
            _marker: PhantomData,
        }
    }

    /// Attach stage attributes
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl<T: Send + 'static> SourceStage for QueueSource<T> {
    type Item = T;
    type Mat = SourceQueue<T>;
    type Logic = QueueLogic<T>;

    fn name(&self) -> &'static str {
        "queueSource"
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    fn create_logic(
        self,
        _attributes: &Attributes,
        callback: AsyncCallback<QueueEvent<T>>,
    ) -> Result<(QueueLogic<T>, SourceQueue<T>)> {
        let (completion, completion_future) = promise();
        let logic = QueueLogic {
            capacity: self.capacity,
            strategy: self.strategy,
            buffer: Buffer::new(self.capacity),
            pending: None,
            terminating: false,
            completion,
        };
        let queue = SourceQueue {
            callback,
            completion: completion_future.shared(),
        };
        Ok((logic, queue))
    }
}

struct PendingOffer<T> {
    element: T,
    promise: Promise<OfferResult>,
}

/// Stage logic of a [`QueueSource`]
pub struct QueueLogic<T> {
    capacity: usize,
    strategy: OverflowStrategy,
    buffer: Buffer<T>,
    pending: Option<PendingOffer<T>>,
    terminating: bool,
    completion: Promise<()>,
}

type Ctx<'a, T> = StageContext<'a, T, QueueEvent<T>>;

fn settle(mut promise: Promise<OfferResult>, result: OfferResult) {
    trace!(outcome = result.label(), "offer settled");
    #[cfg(feature = "metrics")]
    metrics::counter!("sourceweld_queue_offers_total", "outcome" => result.label()).increment(1);
    promise.try_success(result);
}

fn reject(mut promise: Promise<OfferResult>, error: Error) {
    trace!(%error, "offer rejected");
    #[cfg(feature = "metrics")]
    metrics::counter!("sourceweld_queue_offers_total", "outcome" => "rejected").increment(1);
    promise.try_failure(error);
}

impl<T: Send + 'static> QueueLogic<T> {
    fn drained(&self) -> bool {
        self.buffer.is_empty() && self.pending.is_none()
    }

    fn finish(&mut self, ctx: &mut Ctx<'_, T>) {
        self.completion.try_success(());
        ctx.complete_stage();
    }

    fn overflow(&mut self, promise: Promise<OfferResult>, ctx: &mut Ctx<'_, T>) {
        let error = Error::BufferOverflow {
            capacity: self.capacity,
        };
        debug!(stage = ctx.stage_name(), capacity = self.capacity, "queue overflowed");
        if let Some(held) = self.pending.take() {
            settle(held.promise, OfferResult::Failure(error.clone()));
        }
        settle(promise, OfferResult::Failure(error.clone()));
        self.completion.try_failure(error.clone());
        ctx.fail_stage(error);
    }

    fn buffer_element(&mut self, element: T, promise: Promise<OfferResult>, ctx: &mut Ctx<'_, T>) {
        match self.buffer.admit(element, self.strategy) {
            Admission::Enqueued(kind) => settle(promise, OfferResult::Enqueued(kind)),
            Admission::Dropped(_) => settle(promise, OfferResult::Dropped),
            Admission::Overflow(_) => self.overflow(promise, ctx),
            Admission::Backpressured(element) => {
                if self.pending.is_some() {
                    reject(promise, Error::IllegalConcurrentOffer);
                } else {
                    self.pending = Some(PendingOffer { element, promise });
                }
            }
        }
    }

    fn hand_off(&mut self, element: T, promise: Promise<OfferResult>, ctx: &mut Ctx<'_, T>) -> Result<()> {
        if ctx.is_available() {
            ctx.push(element)?;
            settle(promise, OfferResult::Enqueued(EnqueueKind::Plain));
            return Ok(());
        }

        let Some(held) = self.pending.take() else {
            self.pending = Some(PendingOffer { element, promise });
            return Ok(());
        };

        match self.strategy {
            OverflowStrategy::DropHead | OverflowStrategy::DropBuffer => {
                settle(held.promise, OfferResult::Dropped);
                self.pending = Some(PendingOffer { element, promise });
            }
            OverflowStrategy::DropTail | OverflowStrategy::DropNew => {
                self.pending = Some(held);
                settle(promise, OfferResult::Dropped);
            }
            OverflowStrategy::Backpressure => {
                self.pending = Some(held);
                reject(promise, Error::IllegalConcurrentOffer);
            }
            OverflowStrategy::Fail => {
                self.pending = Some(held);
                self.overflow(promise, ctx);
            }
        }
        Ok(())
    }

    fn on_offer(&mut self, element: T, promise: Promise<OfferResult>, ctx: &mut Ctx<'_, T>) -> Result<()> {
        if self.capacity == 0 {
            return self.hand_off(element, promise, ctx);
        }

        self.buffer_element(element, promise, ctx);
        if ctx.is_available() {
            if let Some(element) = self.buffer.dequeue() {
                ctx.push(element)?;
            }
        }
        Ok(())
    }
}

impl<T: Send + 'static> StageLogic for QueueLogic<T> {
    type Item = T;
    type Event = QueueEvent<T>;

    fn on_pull(&mut self, ctx: &mut Ctx<'_, T>) -> Result<()> {
        if self.capacity == 0 {
            if let Some(offer) = self.pending.take() {
                ctx.push(offer.element)?;
                settle(offer.promise, OfferResult::Enqueued(EnqueueKind::Plain));
            }
        } else if let Some(element) = self.buffer.dequeue() {
            ctx.push(element)?;
            if let Some(offer) = self.pending.take() {
                self.buffer.enqueue(offer.element);
                settle(offer.promise, OfferResult::Enqueued(EnqueueKind::Plain));
            }
        }

        if self.terminating && self.drained() {
            self.finish(ctx);
        }
        Ok(())
    }

    fn on_downstream_finish(&mut self, ctx: &mut Ctx<'_, T>) -> Result<()> {
        if let Some(offer) = self.pending.take() {
            settle(offer.promise, OfferResult::QueueClosed);
        }
        self.finish(ctx);
        Ok(())
    }

    fn on_event(&mut self, event: QueueEvent<T>, ctx: &mut Ctx<'_, T>) -> Result<()> {
        match event {
            QueueEvent::Offer { element, promise } => self.on_offer(element, promise, ctx),
            QueueEvent::Complete => {
                if self.drained() {
                    self.finish(ctx);
                } else {
                    debug!(
                        stage = ctx.stage_name(),
                        buffered = self.buffer.len(),
                        "queue completing after drain"
                    );
                    self.terminating = true;
                }
                Ok(())
            }
            QueueEvent::Fail(error) => {
                debug!(stage = ctx.stage_name(), %error, "queue failed by its owner");
                if let Some(offer) = self.pending.take() {
                    settle(offer.promise, OfferResult::QueueClosed);
                }
                self.completion.try_failure(error.clone());
                ctx.fail_stage(error);
                Ok(())
            }
        }
    }

    fn post_stop(&mut self) {
        if let Some(offer) = self.pending.take() {
            settle(offer.promise, OfferResult::QueueClosed);
        }
        self.buffer.clear();
        self.completion.try_failure(Error::StreamDetached);
    }

    fn drain_handler(&self) -> DrainHandler<QueueEvent<T>> {
        Arc::new(|event| {
            if let QueueEvent::Offer { promise, .. } = event {
                reject(promise, Error::StreamDetached);
            }
        })
    }
}
