//! Processors applied between a materialized source and a sink.

use std::marker::PhantomData;

use async_trait::async_trait;

use crate::core::{Processor, Result};

/// A processor that maps items using a function.
pub struct MapProcessor<F, T, U> {
    f: F,
    _phantom: PhantomData<fn(T) -> U>,
}

impl<F, T, U> MapProcessor<F, T, U> {
    /// Create a new map processor
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, U> Processor for MapProcessor<F, T, U>
where
    F: FnMut(T) -> U + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    type Input = T;
    type Output = U;

    async fn process_batch(&mut self, items: Vec<Self::Input>) -> Result<Vec<Self::Output>> {
        Ok(items.into_iter().map(&mut self.f).collect())
    }
}

/// A processor that keeps only items satisfying a predicate.
pub struct FilterProcessor<F, T> {
    predicate: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> FilterProcessor<F, T> {
    /// Create a new filter processor
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> Processor for FilterProcessor<F, T>
where
    F: FnMut(&T) -> bool + Send + 'static,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn process_batch(&mut self, mut items: Vec<Self::Input>) -> Result<Vec<Self::Output>> {
        items.retain(|item| (self.predicate)(item));
        Ok(items)
    }
}

/// A processor that passes items through unchanged
pub struct NoOpProcessor<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> NoOpProcessor<T> {
    /// Create a new no-op processor
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Processor for NoOpProcessor<T> {
    type Input = T;
    type Output = T;

    async fn process_batch(&mut self, items: Vec<Self::Input>) -> Result<Vec<Self::Output>> {
        Ok(items)
    }
}

impl<T> Default for NoOpProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}
