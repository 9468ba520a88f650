//! Core traits for the demand-driven side of the system.
//!
//! Stages emit one element per pull through their outlet. Downstream code
//! consumes them through these GenStage-style traits: a [`Source`] answers
//! explicit demand with a batch, a [`Sink`] writes batches, and a
//! [`Processor`] sits in between. A materialized stage handle implements
//! [`Source`], so every stage in this crate plugs straight into a
//! [`Pipeline`](crate::pipeline::Pipeline).

use crate::core::error::Result;
use async_trait::async_trait;

/// A source generates items on demand using GenStage-style demand signaling.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use sourceweld::core::{Result, Source};
///
/// struct CounterSource {
///     current: u64,
///     max: u64,
/// }
///
/// #[async_trait]
/// impl Source for CounterSource {
///     type Item = u64;
///
///     async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>> {
///         let mut items = Vec::with_capacity(demand);
///         while items.len() < demand && self.current <= self.max {
///             items.push(self.current);
///             self.current += 1;
///         }
///         Ok(items)
///     }
/// }
/// ```
#[async_trait]
pub trait Source {
    /// The type of items this source generates
    type Item: Send + 'static;

    /// Handle demand for multiple items.
    ///
    /// Sources return up to `demand` items, or fewer if exhausted.
    /// An empty Vec indicates the source is completely exhausted.
    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>>;

    /// Get the next single item (convenience method).
    async fn next(&mut self) -> Result<Option<Self::Item>> {
        let items = self.handle_demand(1).await?;
        Ok(items.into_iter().next())
    }
}

/// A sink processes items from upstream with batch-first design.
#[async_trait]
pub trait Sink {
    /// The type of items this sink accepts
    type Item: Send + 'static;

    /// Write a batch of items (primary method).
    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()>;

    /// Write a single item (convenience method).
    async fn write(&mut self, item: Self::Item) -> Result<()> {
        self.write_batch(vec![item]).await
    }

    /// Called when the upstream source is exhausted.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A processor transforms items between a source and a sink.
#[async_trait]
pub trait Processor {
    /// The type of items this processor accepts
    type Input: Send + 'static;
    /// The type of items this processor produces
    type Output: Send + 'static;

    /// Process a batch of input items and produce output items.
    async fn process_batch(&mut self, items: Vec<Self::Input>) -> Result<Vec<Self::Output>>;

    /// Called when upstream is exhausted, allowing final output generation.
    async fn finish(&mut self) -> Result<Vec<Self::Output>> {
        Ok(vec![])
    }
}
