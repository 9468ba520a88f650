//! Materialization: turning a stage description into a running stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::core::{Error, Result};
use crate::stage::callback::bridge;
use crate::stage::interpreter::Interpreter;
use crate::stage::outlet::outlet;
use crate::stage::{Attributes, SourceHandle, SourceStage};

/// Configuration for materializing stages
#[derive(Clone, Debug, Default)]
pub struct MaterializerConfig {
    /// Prefix prepended to every stage name
    pub name_prefix: String,
    /// Attributes every stage inherits
    pub default_attributes: Attributes,
}

impl MaterializerConfig {
    /// Create a default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stage name prefix
    pub fn name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the attributes every stage inherits
    pub fn default_attributes(mut self, attributes: Attributes) -> Self {
        self.default_attributes = attributes;
        self
    }
}

struct Inner {
    runtime: Handle,
    config: MaterializerConfig,
    next_id: AtomicU64,
}

/// Spawns stage interpreters onto a tokio runtime.
///
/// Cheap to clone; clones share the runtime, configuration and naming sequence.
#[derive(Clone)]
pub struct Materializer {
    inner: Arc<Inner>,
}

impl Materializer {
    /// Materializer on the given runtime
    pub fn new(runtime: Handle, config: MaterializerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                config,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Materializer on the runtime of the calling context
    pub fn try_current() -> Result<Self> {
        Self::try_current_with(MaterializerConfig::default())
    }

    /// Materializer on the runtime of the calling context, with `config`
    pub fn try_current_with(config: MaterializerConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::custom(format!("no tokio runtime to materialize on: {}", e)))?;
        Ok(Self::new(runtime, config))
    }

    /// Configuration in use
    pub fn config(&self) -> &MaterializerConfig {
        &self.inner.config
    }

    /// Runtime the stages run on
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Start `stage`, returning its downstream handle and materialized value
    pub fn materialize<S: SourceStage>(&self, stage: S) -> Result<(SourceHandle<S::Item>, S::Mat)> {
        self.materialize_with(stage, &Attributes::new())
    }

    /// Start `stage` under `inherited` attributes (the stage's own win)
    pub fn materialize_with<S: SourceStage>(
        &self,
        stage: S,
        inherited: &Attributes,
    ) -> Result<(SourceHandle<S::Item>, S::Mat)> {
        let config = &self.inner.config;
        let attributes = config
            .default_attributes
            .and(inherited)
            .and(&stage.attributes());
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}{}-{}",
            config.name_prefix,
            attributes.name_or(stage.name()),
            id
        );

        let (callback, inbox) = bridge();
        let (outlet, handle) = outlet(callback.demand_port(), name.clone());
        let (logic, mat) = stage.create_logic(&attributes, callback.clone())?;

        let interpreter = Interpreter {
            logic,
            outlet,
            inbox,
            callback,
            attributes,
            materializer: self.clone(),
            name,
        };
        self.inner.runtime.spawn(interpreter.run());
        Ok((handle, mat))
    }
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("config", &self.inner.config)
            .field("materialized", &self.inner.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
