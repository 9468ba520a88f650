//! A source that builds its inner source on first demand.

use std::marker::PhantomData;

use tracing::debug;

use crate::core::{Error, Result};
use crate::stage::outlet::{DemandHandle, Emission};
use crate::stage::{
    promise, AsyncCallback, Attributes, Promise, PromiseFuture, SourceStage, StageContext,
    StageLogic,
};

/// Emissions of the inner source, re-entering the outer stage
pub enum LazyEvent<T> {
    /// An element pushed by the inner source
    Element(T),
    /// The inner source completed
    Complete,
    /// The inner source failed
    Failed(Error),
}

impl<T> LazyEvent<T> {
    fn forwarded(emission: Emission<T>) -> Self {
        match emission {
            Emission::Element(element) => LazyEvent::Element(element),
            Emission::Complete => LazyEvent::Complete,
            Emission::Failed(error) => LazyEvent::Failed(error),
        }
    }
}

/// Defers creating and materializing a source until downstream first pulls.
///
/// Materializes to a future of the inner source's materialized value. It
/// fails with [`Error::CanceledBeforeMaterialization`] if downstream cancels
/// before pulling, and with [`Error::StoppedBeforeMaterialization`] if the
/// stage stops for any other reason first.
pub struct LazySource<F, S> {
    factory: F,
    attributes: Attributes,
    _marker: PhantomData<fn() -> S>,
}

impl<F, S> LazySource<F, S>
where
    F: FnOnce() -> S + Send + 'static,
    S: SourceStage,
{
    /// Create a lazy source around `factory`
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            attributes: Attributes::default(),
            _marker: PhantomData,
        }
    }

    /// Attach stage attributes; the inner source inherits them
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl<F, S> SourceStage for LazySource<F, S>
where
    F: FnOnce() -> S + Send + 'static,
    S: SourceStage,
{
    type Item = S::Item;
    type Mat = PromiseFuture<S::Mat>;
    type Logic = LazyLogic<F, S>;

    fn name(&self) -> &'static str {
        "lazySource"
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    fn create_logic(
        self,
        _attributes: &Attributes,
        _callback: AsyncCallback<LazyEvent<S::Item>>,
    ) -> Result<(Self::Logic, Self::Mat)> {
        let (materialized, future) = promise();
        let logic = LazyLogic {
            factory: Some(self.factory),
            materialized,
            inner: None,
            _marker: PhantomData,
        };
        Ok((logic, future))
    }
}

/// Stage logic of a [`LazySource`]
pub struct LazyLogic<F, S: SourceStage> {
    factory: Option<F>,
    materialized: Promise<S::Mat>,
    inner: Option<DemandHandle>,
    _marker: PhantomData<fn() -> S>,
}

impl<F, S> LazyLogic<F, S>
where
    F: FnOnce() -> S + Send + 'static,
    S: SourceStage,
{
    fn start_inner(&mut self, factory: F, ctx: &mut StageContext<'_, S::Item, LazyEvent<S::Item>>) -> Result<()> {
        let materializer = ctx.materializer().clone();
        let (handle, mat) = match materializer.materialize_with(factory(), ctx.attributes()) {
            Ok(materialized) => materialized,
            Err(error) => {
                self.materialized.try_failure(error.clone());
                return Err(error);
            }
        };
        debug!(stage = ctx.stage_name(), inner = handle.name(), "inner source materialized");
        self.materialized.try_success(mat);

        let (demand, mut emissions) = handle.into_parts();
        let callback = ctx.async_callback();
        materializer.runtime().spawn(async move {
            while let Some(emission) = emissions.recv().await {
                let terminal = !matches!(emission, Emission::Element(_));
                callback.invoke(LazyEvent::forwarded(emission));
                if terminal {
                    break;
                }
            }
        });

        demand.pull();
        self.inner = Some(demand);
        Ok(())
    }

    fn disarm_inner(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.disarm();
        }
    }
}

impl<F, S> StageLogic for LazyLogic<F, S>
where
    F: FnOnce() -> S + Send + 'static,
    S: SourceStage,
{
    type Item = S::Item;
    type Event = LazyEvent<S::Item>;

    fn on_pull(&mut self, ctx: &mut StageContext<'_, S::Item, LazyEvent<S::Item>>) -> Result<()> {
        if let Some(factory) = self.factory.take() {
            return self.start_inner(factory, ctx);
        }
        if let Some(inner) = &self.inner {
            inner.pull();
        }
        Ok(())
    }

    fn on_downstream_finish(
        &mut self,
        ctx: &mut StageContext<'_, S::Item, LazyEvent<S::Item>>,
    ) -> Result<()> {
        if self.factory.take().is_some() {
            self.materialized
                .try_failure(Error::CanceledBeforeMaterialization);
        }
        if let Some(mut inner) = self.inner.take() {
            inner.cancel();
        }
        ctx.complete_stage();
        Ok(())
    }

    fn on_event(
        &mut self,
        event: LazyEvent<S::Item>,
        ctx: &mut StageContext<'_, S::Item, LazyEvent<S::Item>>,
    ) -> Result<()> {
        match event {
            LazyEvent::Element(element) => ctx.push(element),
            LazyEvent::Complete => {
                self.disarm_inner();
                ctx.complete_stage();
                Ok(())
            }
            LazyEvent::Failed(error) => {
                self.disarm_inner();
                ctx.fail_stage(error);
                Ok(())
            }
        }
    }

    fn post_stop(&mut self) {
        self.materialized
            .try_failure(Error::StoppedBeforeMaterialization);
        // Dropping an armed handle cancels the inner stage.
        self.inner = None;
    }
}
