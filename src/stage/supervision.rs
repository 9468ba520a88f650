//! Supervision directives for faults raised by external resources.
//!
//! Only resource open/read/close faults are supervised. Buffer overflow and
//! configuration faults follow their own deterministic rules.

use std::fmt;
use std::sync::Arc;

use crate::core::Error;

/// What a stage does after a supervised fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Directive {
    /// Fail the stage with the fault
    Stop,
    /// Ignore the fault and try again with the same resource
    Resume,
    /// Close the resource, open a fresh one and try again
    Restart,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Stop => f.write_str("stop"),
            Directive::Resume => f.write_str("resume"),
            Directive::Restart => f.write_str("restart"),
        }
    }
}

/// Maps a fault to a [`Directive`].
pub type Decider = Arc<dyn Fn(&Error) -> Directive + Send + Sync>;

/// Build a decider from a closure.
pub fn decider<F>(f: F) -> Decider
where
    F: Fn(&Error) -> Directive + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Stops on every fault. Used when no strategy is configured.
pub fn stopping_decider() -> Decider {
    decider(|_| Directive::Stop)
}

/// Resumes on every fault.
pub fn resuming_decider() -> Decider {
    decider(|_| Directive::Resume)
}

/// Restarts on every fault.
pub fn restarting_decider() -> Decider {
    decider(|_| Directive::Restart)
}
