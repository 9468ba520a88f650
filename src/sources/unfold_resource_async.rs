//! A source that unfolds a resource whose whole lifecycle is asynchronous.
//!
//! `create`, `read` and `close` return futures. The stage spawns each one
//! onto the runtime and picks the outcome up again through its own bridge,
//! so a slow resource never holds the stage's turn. Because a future can
//! finish after the stage already stopped, late outcomes are reconciled by
//! the drain handler: a resource created too late is closed right there.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::core::{Error, Result};
use crate::stage::{
    AsyncCallback, Attributes, Decider, Directive, DrainHandler, SourceStage, StageContext,
    StageLogic,
};

type CreateFn<R> = Arc<dyn Fn() -> BoxFuture<'static, Result<R>> + Send + Sync>;
type ReadFn<R, T> = Arc<dyn Fn(R) -> BoxFuture<'static, Result<Option<T>>> + Send + Sync>;
type CloseFn<R> = Arc<dyn Fn(R) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What to do once a deliberate close resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterClose {
    /// The resource ran dry; complete the stage
    Complete,
    /// A read fault asked for a fresh resource
    Recreate,
}

/// Outcomes of spawned lifecycle futures
pub enum UnfoldAsyncEvent<R, T> {
    /// `create` resolved
    Created(Result<R>),
    /// `read` resolved; `None` means the resource ran dry
    Read(Result<Option<T>>),
    /// `close` resolved, with what to do next
    Closed { result: Result<()>, then: AfterClose },
}

/// Lifecycle of the resource as seen by the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NoResource,
    Opening,
    Open,
    Reading,
    Closing,
}

/// A source over an asynchronously created, read and closed resource.
///
/// The resource must be `Clone`: the stage keeps one copy and hands another
/// to each `read` and to the final `close`, as with connection handles or
/// `Arc`-wrapped clients.
pub struct UnfoldResourceAsyncSource<T, R> {
    create: CreateFn<R>,
    read: ReadFn<R, T>,
    close: CloseFn<R>,
    attributes: Attributes,
}

impl<T, R> UnfoldResourceAsyncSource<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Create a source from its lifecycle functions
    pub fn new<C, CF, Rd, RF, Cl, ClF>(create: C, read: Rd, close: Cl) -> Self
    where
        C: Fn() -> CF + Send + Sync + 'static,
        CF: Future<Output = Result<R>> + Send + 'static,
        Rd: Fn(R) -> RF + Send + Sync + 'static,
        RF: Future<Output = Result<Option<T>>> + Send + 'static,
        Cl: Fn(R) -> ClF + Send + Sync + 'static,
        ClF: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            create: Arc::new(move || create().boxed()),
            read: Arc::new(move |resource| read(resource).boxed()),
            close: Arc::new(move |resource| close(resource).boxed()),
            attributes: Attributes::default(),
        }
    }

    /// Attach stage attributes, e.g. a supervision decider
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl<T, R> SourceStage for UnfoldResourceAsyncSource<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    type Item = T;
    type Mat = ();
    type Logic = UnfoldResourceAsyncLogic<T, R>;

    fn name(&self) -> &'static str {
        "unfoldResourceSourceAsync"
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    fn create_logic(
        self,
        attributes: &Attributes,
        callback: AsyncCallback<UnfoldAsyncEvent<R, T>>,
    ) -> Result<(Self::Logic, ())> {
        let logic = UnfoldResourceAsyncLogic {
            create: self.create,
            read: self.read,
            close: self.close,
            callback,
            decider: attributes.decider(),
            runtime: None,
            resource: None,
            phase: Phase::NoResource,
            _marker: PhantomData,
        };
        Ok((logic, ()))
    }
}

/// Stage logic of an [`UnfoldResourceAsyncSource`]
pub struct UnfoldResourceAsyncLogic<T, R> {
    create: CreateFn<R>,
    read: ReadFn<R, T>,
    close: CloseFn<R>,
    callback: AsyncCallback<UnfoldAsyncEvent<R, T>>,
    decider: Decider,
    runtime: Option<Handle>,
    resource: Option<R>,
    phase: Phase,
    _marker: PhantomData<fn() -> T>,
}

type Ctx<'a, R, T> = StageContext<'a, T, UnfoldAsyncEvent<R, T>>;

/// Close `resource` without waiting for the outcome.
fn close_detached<R: Send + 'static>(runtime: Option<&Handle>, close: &CloseFn<R>, resource: R) {
    let closing = close(resource);
    let task = async move {
        match closing.await {
            Ok(()) => debug!("resource closed after stop"),
            Err(error) => warn!(%error, "failed to close resource after stop"),
        }
    };
    match runtime.cloned().or_else(|| Handle::try_current().ok()) {
        Some(runtime) => {
            runtime.spawn(task);
        }
        None => warn!("no runtime left to close resource on"),
    }
}

impl<T, R> UnfoldResourceAsyncLogic<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = UnfoldAsyncEvent<R, T>> + Send + 'static,
    {
        let callback = self.callback.clone();
        let task = async move { callback.invoke(future.await) };
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn(task);
            }
            None => {
                tokio::spawn(task);
            }
        }
    }

    fn create_resource(&mut self) {
        self.phase = Phase::Opening;
        let creating = (self.create)();
        self.spawn(creating.map(UnfoldAsyncEvent::Created));
    }

    fn read_resource(&mut self, resource: R) {
        self.phase = Phase::Reading;
        let reading = (self.read)(resource);
        self.spawn(reading.map(UnfoldAsyncEvent::Read));
    }

    fn close_resource(&mut self, then: AfterClose) {
        match self.resource.take() {
            Some(resource) => {
                self.phase = Phase::Closing;
                let closing = (self.close)(resource);
                self.spawn(closing.map(move |result| UnfoldAsyncEvent::Closed { result, then }));
            }
            None => self.spawn(async move {
                UnfoldAsyncEvent::Closed {
                    result: Ok(()),
                    then,
                }
            }),
        }
    }

    fn on_fault(&mut self, error: Error, ctx: &mut Ctx<'_, R, T>) -> Result<()> {
        match (self.decider)(&error) {
            Directive::Stop => {
                debug!(stage = ctx.stage_name(), %error, "resource fault, stopping");
                Err(error)
            }
            Directive::Resume => {
                trace!(stage = ctx.stage_name(), %error, "resource fault, resuming");
                self.phase = Phase::Open;
                self.try_read(ctx);
                Ok(())
            }
            Directive::Restart => {
                debug!(stage = ctx.stage_name(), %error, "resource fault, restarting");
                self.close_resource(AfterClose::Recreate);
                Ok(())
            }
        }
    }

    fn try_read(&mut self, ctx: &Ctx<'_, R, T>) {
        if !ctx.is_available() || self.phase != Phase::Open {
            return;
        }
        if let Some(resource) = self.resource.clone() {
            self.read_resource(resource);
        }
    }
}

impl<T, R> StageLogic for UnfoldResourceAsyncLogic<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    type Item = T;
    type Event = UnfoldAsyncEvent<R, T>;

    fn pre_start(&mut self, ctx: &mut Ctx<'_, R, T>) -> Result<()> {
        self.runtime = Some(ctx.materializer().runtime().clone());
        self.create_resource();
        Ok(())
    }

    fn on_pull(&mut self, ctx: &mut Ctx<'_, R, T>) -> Result<()> {
        // Without an open resource the pull stays pending on the outlet.
        self.try_read(ctx);
        Ok(())
    }

    fn on_event(&mut self, event: UnfoldAsyncEvent<R, T>, ctx: &mut Ctx<'_, R, T>) -> Result<()> {
        match event {
            UnfoldAsyncEvent::Created(Ok(resource)) => {
                debug!(stage = ctx.stage_name(), "resource opened");
                self.resource = Some(resource);
                self.phase = Phase::Open;
                self.try_read(ctx);
                Ok(())
            }
            UnfoldAsyncEvent::Created(Err(error)) => {
                self.phase = Phase::NoResource;
                match (self.decider)(&error) {
                    Directive::Stop => Err(error),
                    Directive::Resume | Directive::Restart => {
                        debug!(stage = ctx.stage_name(), %error, "create failed, retrying");
                        self.create_resource();
                        Ok(())
                    }
                }
            }
            UnfoldAsyncEvent::Read(Ok(Some(element))) => {
                self.phase = Phase::Open;
                ctx.push(element)
            }
            UnfoldAsyncEvent::Read(Ok(None)) => {
                trace!(stage = ctx.stage_name(), "resource exhausted");
                self.close_resource(AfterClose::Complete);
                Ok(())
            }
            UnfoldAsyncEvent::Read(Err(error)) => self.on_fault(error, ctx),
            UnfoldAsyncEvent::Closed { result, then } => {
                self.phase = Phase::NoResource;
                result?;
                debug!(stage = ctx.stage_name(), "resource closed");
                match then {
                    AfterClose::Complete => ctx.complete_stage(),
                    AfterClose::Recreate => self.create_resource(),
                }
                Ok(())
            }
        }
    }

    fn post_stop(&mut self) {
        if let Some(resource) = self.resource.take() {
            close_detached(self.runtime.as_ref(), &self.close, resource);
        }
    }

    fn drain_handler(&self) -> DrainHandler<UnfoldAsyncEvent<R, T>> {
        let runtime = self.runtime.clone();
        let close = self.close.clone();
        Arc::new(move |event| match event {
            UnfoldAsyncEvent::Created(Ok(resource)) => {
                debug!("resource created after stop, closing it");
                close_detached(runtime.as_ref(), &close, resource);
            }
            UnfoldAsyncEvent::Created(Err(error)) => {
                debug!(%error, "resource creation failed after stop");
            }
            UnfoldAsyncEvent::Closed {
                result: Err(error), ..
            } => warn!(%error, "failed to close resource"),
            _ => {}
        })
    }
}
