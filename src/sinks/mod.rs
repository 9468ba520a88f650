//! Sinks for draining materialized sources.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as TokioMutex;
use tracing::trace;

use crate::core::{Error, Result, Sink};
use crate::sources::{OfferResult, SourceQueue};

/// A sink that collects items into a shared vector.
pub struct CollectSink<T> {
    items: Arc<TokioMutex<Vec<T>>>,
}

impl<T: Send + 'static> CollectSink<T> {
    /// Create a new collect sink
    pub fn new() -> Self {
        Self {
            items: Arc::new(TokioMutex::new(Vec::new())),
        }
    }

    /// Snapshot of everything collected so far
    pub async fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.lock().await.clone()
    }

    /// Take everything collected so far
    pub async fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock().await)
    }
}

#[async_trait]
impl<T: Send + 'static> Sink for CollectSink<T> {
    type Item = T;

    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()> {
        self.items.lock().await.extend(items);
        Ok(())
    }
}

impl<T: Send + 'static> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

/// A sink that only counts items
pub struct CountSink<T> {
    count: Arc<AtomicUsize>,
    _phantom: PhantomData<fn(T)>,
}

impl<T> CountSink<T> {
    /// Create a new count sink
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            _phantom: PhantomData,
        }
    }

    /// Items seen so far, across all clones
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<T: Send + 'static> Sink for CountSink<T> {
    type Item = T;

    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()> {
        self.count.fetch_add(items.len(), Ordering::AcqRel);
        Ok(())
    }
}

impl<T> Default for CountSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CountSink<T> {
    fn clone(&self) -> Self {
        Self {
            count: self.count.clone(),
            _phantom: PhantomData,
        }
    }
}

/// A sink that offers every item into a [`SourceQueue`], waiting for each
/// offer to settle before the next one.
///
/// Dropped items are skipped; a closed queue or failed offer fails the
/// write. [`finish`](Sink::finish) completes the queue.
pub struct QueueSink<T> {
    queue: SourceQueue<T>,
    dropped: usize,
}

impl<T: Send + 'static> QueueSink<T> {
    /// Feed `queue`
    pub fn new(queue: SourceQueue<T>) -> Self {
        Self { queue, dropped: 0 }
    }

    /// Items the queue's overflow strategy discarded
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[async_trait]
impl<T: Send + 'static> Sink for QueueSink<T> {
    type Item = T;

    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()> {
        for item in items {
            match self.queue.offer(item).await? {
                OfferResult::Enqueued(_) => {}
                OfferResult::Dropped => {
                    self.dropped += 1;
                    trace!(dropped = self.dropped, "queue dropped an item");
                }
                OfferResult::Failure(error) => return Err(error),
                OfferResult::QueueClosed => return Err(Error::StreamDetached),
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.queue.complete();
        Ok(())
    }
}
