//! Producer stages.
//!
//! Each source here is a [`SourceStage`]: materialize it to get a
//! [`SourceHandle`](crate::stage::SourceHandle) for downstream and the
//! source's materialized value.

use std::marker::PhantomData;

use crate::core::Result;
use crate::stage::{AsyncCallback, Attributes, SourceStage, StageContext, StageLogic};

pub mod lazy;
pub mod observable;
pub mod queue;
pub mod unfold_resource;
pub mod unfold_resource_async;

pub use lazy::LazySource;
pub use observable::{
    EventHandler, EventObservable, Observable, ObservableSource, Observer, Subject, Subscription,
};
pub use queue::{CompletionFuture, OfferFuture, OfferResult, QueueSource, SourceQueue};
pub use unfold_resource::UnfoldResourceSource;
pub use unfold_resource_async::UnfoldResourceAsyncSource;

/// A source that completes as soon as it starts
pub struct EmptySource<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> EmptySource<T> {
    /// Create an empty source
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for EmptySource<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage logic of an [`EmptySource`]
pub struct EmptyLogic<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> StageLogic for EmptyLogic<T> {
    type Item = T;
    type Event = ();

    fn pre_start(&mut self, ctx: &mut StageContext<'_, T, ()>) -> Result<()> {
        ctx.complete_stage();
        Ok(())
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_, T, ()>) -> Result<()> {
        ctx.complete_stage();
        Ok(())
    }
}

impl<T: Send + 'static> SourceStage for EmptySource<T> {
    type Item = T;
    type Mat = ();
    type Logic = EmptyLogic<T>;

    fn name(&self) -> &'static str {
        "emptySource"
    }

    fn create_logic(
        self,
        _attributes: &Attributes,
        _callback: AsyncCallback<()>,
    ) -> Result<(EmptyLogic<T>, ())> {
        Ok((
            EmptyLogic {
                _marker: PhantomData,
            },
            (),
        ))
    }
}
