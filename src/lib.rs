//! # Producer stages for demand-driven streams
//!
//! This crate provides the producer side of a pull-based stream: stages that
//! emit elements only when downstream asks for them, while absorbing input
//! from the outside world at its own pace.
//!
//! ## Core Concepts
//!
//! - **Stage**: a [`SourceStage`](stage::SourceStage) description that is
//!   materialized into a running stage and a materialized value
//! - **Async callback**: the only way into a running stage; events from any
//!   thread are handled one at a time on the stage's own task
//! - **Overflow strategy**: what a bounded buffer does when it is full
//! - **Supervision**: a decider mapping resource faults to stop, resume or restart
//!
//! ## Sources
//!
//! - [`QueueSource`](sources::QueueSource): elements offered through a [`SourceQueue`](sources::SourceQueue)
//! - [`UnfoldResourceSource`](sources::UnfoldResourceSource): a blocking resource read until exhausted
//! - [`UnfoldResourceAsyncSource`](sources::UnfoldResourceAsyncSource): the same with async lifecycle functions
//! - [`LazySource`](sources::LazySource): an inner source built on first demand
//! - [`ObservableSource`](sources::ObservableSource): a push-style notifier adapted to pull
//!
//! ## Example
//!
//! ```rust
//! use sourceweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (mut handle, queue) = QueueSource::new(8, OverflowStrategy::DropHead).materialize()?;
//!
//!     queue.offer(1).await?;
//!     queue.offer(2).await?;
//!     queue.complete();
//!
//!     assert_eq!(handle.pull().await?, Some(1));
//!     assert_eq!(handle.pull().await?, Some(2));
//!     assert_eq!(handle.pull().await?, None);
//!     queue.watch_completion().await?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod core;
pub mod materializer;
pub mod pipeline;
pub mod processors;
pub mod sinks;
pub mod sources;
pub mod stage;

// Re-export commonly used items
pub mod prelude {
    pub use crate::buffer::{EnqueueKind, OverflowStrategy};
    pub use crate::core::{Error, Processor, Result, Sink, Source};
    pub use crate::materializer::{Materializer, MaterializerConfig};
    pub use crate::pipeline::{Pipeline, PipelineConfig};
    pub use crate::processors::{FilterProcessor, MapProcessor, NoOpProcessor};
    pub use crate::sinks::{CollectSink, CountSink, QueueSink};
    pub use crate::sources::{
        EmptySource, LazySource, Observable, ObservableSource, Observer, OfferResult, QueueSource,
        SourceQueue, Subject, Subscription, UnfoldResourceAsyncSource, UnfoldResourceSource,
    };
    pub use crate::stage::{
        Attributes, Directive, SourceHandle, SourceStage, SourceStageExt,
    };
}

// Re-export main error type
pub use crate::core::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
