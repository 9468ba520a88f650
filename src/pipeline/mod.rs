//! Driving a materialized source to a sink.
//!
//! A [`Pipeline`] repeatedly asks its source for a batch, runs the batch
//! through a processor and writes the result to a sink, until the source is
//! exhausted. Any [`SourceHandle`](crate::stage::SourceHandle) can be the
//! source, so every producer stage in this crate can be drained this way.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::core::{Error, Processor, Result, Sink, Source};

/// Configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Upper bound on the batch requested from the source at once
    pub demand_batch_size: usize,
    /// Maximum time a single source or processor call may take
    pub operation_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            demand_batch_size: 100,
            operation_timeout: None,
        }
    }
}

/// Connects a source, a processor and a sink.
pub struct Pipeline<P, R> {
    source: P,
    processor: R,
    config: PipelineConfig,
}

impl<P, R> Pipeline<P, R>
where
    P: Source + Send + 'static,
    R: Processor<Input = P::Item> + Send + 'static,
{
    /// Create a new pipeline
    pub fn new(source: P, processor: R) -> Self {
        Self {
            source,
            processor,
            config: PipelineConfig::default(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the demand batch size
    pub fn demand_batch_size(mut self, size: usize) -> Self {
        self.config.demand_batch_size = size.max(1);
        self
    }

    /// Bound every source and processor call by `timeout`
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = Some(timeout);
        self
    }

    /// Run until the source is exhausted, writing everything to `sink`
    pub async fn sink<C>(self, mut sink: C) -> Result<()>
    where
        C: Sink<Item = R::Output> + Send + 'static,
    {
        let Pipeline {
            mut source,
            mut processor,
            config,
        } = self;
        let mut delivered = 0usize;

        loop {
            let items = bounded(&config, source.handle_demand(config.demand_batch_size)).await?;
            if items.is_empty() {
                let tail = processor.finish().await?;
                if !tail.is_empty() {
                    sink.write_batch(tail).await?;
                }
                sink.finish().await?;
                debug!(delivered, "pipeline finished");
                return Ok(());
            }

            delivered += items.len();
            let outputs = bounded(&config, processor.process_batch(items)).await?;
            if !outputs.is_empty() {
                sink.write_batch(outputs).await?;
            }
        }
    }
}

async fn bounded<F, T>(config: &PipelineConfig, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match config.operation_timeout {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| Error::timeout(limit.as_millis() as u64))?,
        None => operation.await,
    }
}
