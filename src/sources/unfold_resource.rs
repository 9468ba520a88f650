//! A source that unfolds a blocking resource: open it, read until it runs
//! dry, close it.
//!
//! All three lifecycle functions run in-line on the stage's turn. Read
//! faults go through the stage's supervision decider; every exit path closes
//! the open resource exactly once, since [`close`](UnfoldResourceSource::new)
//! takes the resource by value.

use std::marker::PhantomData;

use tracing::{debug, trace, warn};

use crate::core::{Error, Result};
use crate::stage::{
    AsyncCallback, Attributes, Decider, Directive, SourceStage, StageContext, StageLogic,
};

/// Re-enter the read loop after yielding to other signals
#[derive(Debug, Clone, Copy)]
pub struct ContinueReading;

/// A source over a synchronously opened, read and closed resource.
///
/// ```no_run
/// use std::io::{BufRead, BufReader};
/// use std::fs::File;
/// use sourceweld::sources::UnfoldResourceSource;
/// use sourceweld::Error;
///
/// let lines = UnfoldResourceSource::new(
///     || Ok(BufReader::new(File::open("input.txt")?)),
///     |reader: &mut BufReader<File>| {
///         let mut line = String::new();
///         match reader.read_line(&mut line)? {
///             0 => Ok(None),
///             _ => Ok(Some(line)),
///         }
///     },
///     |_reader| Ok::<(), Error>(()),
/// );
/// # let _ = lines;
/// ```
pub struct UnfoldResourceSource<T, R, C, Rd, Cl> {
    create: C,
    read: Rd,
    close: Cl,
    attributes: Attributes,
    _marker: PhantomData<fn() -> (T, R)>,
}

impl<T, R, C, Rd, Cl> UnfoldResourceSource<T, R, C, Rd, Cl>
where
    C: FnMut() -> Result<R> + Send + 'static,
    Rd: FnMut(&mut R) -> Result<Option<T>> + Send + 'static,
    Cl: FnMut(R) -> Result<()> + Send + 'static,
{
    /// Create a source from its lifecycle functions
    pub fn new(create: C, read: Rd, close: Cl) -> Self {
        Self {
            create,
            read,
            close,
            attributes: Attributes::default(),
            _marker: PhantomData,
        }
    }

    /// Attach stage attributes, e.g. a supervision decider
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl<T, R, C, Rd, Cl> SourceStage for UnfoldResourceSource<T, R, C, Rd, Cl>
where
    T: Send + 'static,
    R: Send + 'static,
    C: FnMut() -> Result<R> + Send + 'static,
    Rd: FnMut(&mut R) -> Result<Option<T>> + Send + 'static,
    Cl: FnMut(R) -> Result<()> + Send + 'static,
{
    type Item = T;
    type Mat = ();
    type Logic = UnfoldResourceLogic<T, R, C, Rd, Cl>;

    fn name(&self) -> &'static str {
        "unfoldResourceSource"
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    fn create_logic(
        self,
        attributes: &Attributes,
        _callback: AsyncCallback<ContinueReading>,
    ) -> Result<(Self::Logic, ())> {
        let logic = UnfoldResourceLogic {
            create: self.create,
            read: self.read,
            close: self.close,
            resource: None,
            decider: attributes.decider(),
            retry_budget: attributes.sync_retry_budget(),
            _marker: PhantomData,
        };
        Ok((logic, ()))
    }
}

/// Stage logic of an [`UnfoldResourceSource`]
pub struct UnfoldResourceLogic<T, R, C, Rd, Cl> {
    create: C,
    read: Rd,
    close: Cl,
    resource: Option<R>,
    decider: Decider,
    retry_budget: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T, R, C, Rd, Cl> UnfoldResourceLogic<T, R, C, Rd, Cl>
where
    T: Send + 'static,
    R: Send + 'static,
    C: FnMut() -> Result<R> + Send + 'static,
    Rd: FnMut(&mut R) -> Result<Option<T>> + Send + 'static,
    Cl: FnMut(R) -> Result<()> + Send + 'static,
{
    fn open(&mut self) -> Result<()> {
        let resource = (self.create)()?;
        debug!("resource opened");
        self.resource = Some(resource);
        Ok(())
    }

    fn close_resource(&mut self) -> Result<()> {
        match self.resource.take() {
            Some(resource) => {
                (self.close)(resource)?;
                debug!("resource closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn close_quietly(&mut self, stage: &str) {
        if let Err(error) = self.close_resource() {
            warn!(stage, %error, "failed to close resource");
        }
    }

    /// Read until one element is pushed, the resource runs dry, a fault
    /// stops the stage, or the retry budget runs out.
    fn read_loop(&mut self, ctx: &mut StageContext<'_, T, ContinueReading>) -> Result<()> {
        let mut recovered = 0;
        loop {
            let Some(resource) = self.resource.as_mut() else {
                return Err(Error::protocol("read without an open resource"));
            };

            let error = match (self.read)(resource) {
                Ok(Some(element)) => return ctx.push(element),
                Ok(None) => {
                    self.close_resource()?;
                    ctx.complete_stage();
                    return Ok(());
                }
                Err(error) => error,
            };

            match (self.decider)(&error) {
                Directive::Stop => {
                    debug!(stage = ctx.stage_name(), %error, "read failed, stopping");
                    self.close_quietly(ctx.stage_name());
                    return Err(error);
                }
                Directive::Resume => {
                    trace!(stage = ctx.stage_name(), %error, "read failed, resuming");
                }
                Directive::Restart => {
                    debug!(stage = ctx.stage_name(), %error, "read failed, restarting resource");
                    self.close_resource()?;
                    self.open()?;
                }
            }

            recovered += 1;
            if recovered >= self.retry_budget {
                trace!(stage = ctx.stage_name(), recovered, "yielding read loop");
                ctx.async_callback().invoke(ContinueReading);
                return Ok(());
            }
        }
    }
}

impl<T, R, C, Rd, Cl> StageLogic for UnfoldResourceLogic<T, R, C, Rd, Cl>
where
    T: Send + 'static,
    R: Send + 'static,
    C: FnMut() -> Result<R> + Send + 'static,
    Rd: FnMut(&mut R) -> Result<Option<T>> + Send + 'static,
    Cl: FnMut(R) -> Result<()> + Send + 'static,
{
    type Item = T;
    type Event = ContinueReading;

    fn pre_start(&mut self, _ctx: &mut StageContext<'_, T, ContinueReading>) -> Result<()> {
        self.open()
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_, T, ContinueReading>) -> Result<()> {
        self.read_loop(ctx)
    }

    fn on_downstream_finish(&mut self, ctx: &mut StageContext<'_, T, ContinueReading>) -> Result<()> {
        self.close_quietly(ctx.stage_name());
        ctx.complete_stage();
        Ok(())
    }

    fn on_event(
        &mut self,
        _event: ContinueReading,
        ctx: &mut StageContext<'_, T, ContinueReading>,
    ) -> Result<()> {
        if ctx.is_available() {
            self.read_loop(ctx)?;
        }
        Ok(())
    }

    fn post_stop(&mut self) {
        if let Err(error) = self.close_resource() {
            warn!(%error, "failed to close resource on teardown");
        }
    }
}
