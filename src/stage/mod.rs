//! The producer-stage contract and the machinery that runs it.
//!
//! A [`SourceStage`] is a description; materializing it creates its
//! [`StageLogic`] and a materialized value, wires an outlet to a
//! [`SourceHandle`] and spawns an interpreter task. The interpreter owns the
//! logic and feeds it pulls, cancels and bridge events strictly one at a
//! time, so handlers take `&mut self` and never need locks.
//!
//! A stage stops as soon as its outlet reaches a terminal state, whether by
//! [`StageContext::complete_stage`], [`StageContext::fail_stage`], a handler
//! returning `Err`, or a downstream cancel. On the way out the interpreter
//! calls [`StageLogic::post_stop`] and hands later bridge events to
//! [`StageLogic::drain_handler`].

pub mod attributes;
pub mod callback;
pub(crate) mod interpreter;
pub mod outlet;
pub mod promise;
pub mod supervision;

use std::sync::Arc;

pub use attributes::Attributes;
pub use callback::{AsyncCallback, DrainHandler};
pub use outlet::{Outlet, OutletState, SourceHandle};
pub use promise::{promise, Promise, PromiseFuture};
pub use supervision::{Decider, Directive};

use crate::core::{Error, Result};
use crate::materializer::Materializer;

/// Handler surface of a running stage.
///
/// Every method runs on the stage's own turn. Returning `Err` from a handler
/// fails the stage with that error.
pub trait StageLogic: Send + 'static {
    /// Elements pushed downstream
    type Item: Send + 'static;
    /// Events submitted through the stage's [`AsyncCallback`]
    type Event: Send + 'static;

    /// Called once before any other handler.
    fn pre_start(&mut self, _ctx: &mut StageContext<'_, Self::Item, Self::Event>) -> Result<()> {
        Ok(())
    }

    /// Downstream demands one element.
    fn on_pull(&mut self, ctx: &mut StageContext<'_, Self::Item, Self::Event>) -> Result<()>;

    /// Downstream canceled. The stage stops after this returns.
    fn on_downstream_finish(
        &mut self,
        ctx: &mut StageContext<'_, Self::Item, Self::Event>,
    ) -> Result<()> {
        ctx.complete_stage();
        Ok(())
    }

    /// An event arrived through the bridge.
    fn on_event(
        &mut self,
        _event: Self::Event,
        _ctx: &mut StageContext<'_, Self::Item, Self::Event>,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once after the stage stopped, on every exit path.
    fn post_stop(&mut self) {}

    /// Receives bridge events that arrive after the stage stopped.
    fn drain_handler(&self) -> DrainHandler<Self::Event> {
        Arc::new(|_event| {})
    }
}

/// What a handler can do to its stage.
pub struct StageContext<'a, T, E> {
    pub(crate) outlet: &'a mut Outlet<T>,
    pub(crate) callback: &'a AsyncCallback<E>,
    pub(crate) attributes: &'a Attributes,
    pub(crate) materializer: &'a Materializer,
    pub(crate) name: &'a str,
}

impl<'a, T, E: Send + 'static> StageContext<'a, T, E> {
    /// Push one element to the pending demand
    pub fn push(&mut self, element: T) -> Result<()> {
        self.outlet.push(element)
    }

    /// Whether downstream demand is pending
    pub fn is_available(&self) -> bool {
        self.outlet.is_available()
    }

    /// Whether the stage already completed, failed or was canceled
    pub fn is_closed(&self) -> bool {
        self.outlet.is_closed()
    }

    /// Current state of the outlet
    pub fn outlet_state(&self) -> OutletState {
        self.outlet.state()
    }

    /// Complete downstream and stop the stage
    pub fn complete_stage(&mut self) {
        self.outlet.complete();
    }

    /// Fail downstream with `error` and stop the stage
    pub fn fail_stage(&mut self, error: Error) {
        self.outlet.fail(error);
    }

    /// A clonable handle for submitting events to this stage from anywhere
    pub fn async_callback(&self) -> AsyncCallback<E> {
        self.callback.clone()
    }

    /// Attributes the stage was materialized with
    pub fn attributes(&self) -> &Attributes {
        self.attributes
    }

    /// The materializer that runs this stage, for nested materialization
    pub fn materializer(&self) -> &Materializer {
        self.materializer
    }

    /// The stage's name
    pub fn stage_name(&self) -> &str {
        self.name
    }
}

/// A materializable producer stage.
pub trait SourceStage: Send + 'static {
    /// Elements the stage emits
    type Item: Send + 'static;
    /// Value handed to the caller at materialization
    type Mat: Send + 'static;
    /// Runtime logic of the stage
    type Logic: StageLogic<Item = Self::Item>;

    /// Default stage name used in logs
    fn name(&self) -> &'static str;

    /// Attributes set on this stage; they override inherited ones
    fn attributes(&self) -> Attributes {
        Attributes::default()
    }

    /// Create the logic and the materialized value.
    ///
    /// `callback` is live immediately: events submitted before the
    /// interpreter starts are queued and handled after `pre_start`.
    fn create_logic(
        self,
        attributes: &Attributes,
        callback: AsyncCallback<<Self::Logic as StageLogic>::Event>,
    ) -> Result<(Self::Logic, Self::Mat)>;
}

/// Materialize stages on the ambient tokio runtime.
pub trait SourceStageExt: SourceStage + Sized {
    /// Materialize on the current runtime with default configuration
    fn materialize(self) -> Result<(SourceHandle<Self::Item>, Self::Mat)> {
        Materializer::try_current()?.materialize(self)
    }
}

impl<S: SourceStage> SourceStageExt for S {}
