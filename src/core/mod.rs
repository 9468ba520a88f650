//! Core traits and types for the sourceweld library.
//!
//! This module contains the error type and the demand-driven traits that
//! downstream code uses to consume materialized stages.

pub mod error;
pub mod traits;

// Re-export core items
pub use error::{Error, IntoError, Result};
pub use traits::{Processor, Sink, Source};
