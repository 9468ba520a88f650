//! Per-stage configuration attributes.

use std::fmt;

use super::supervision::{decider, stopping_decider, Decider, Directive};

/// Consecutive synchronous fault recoveries a stage performs before yielding
/// its turn back to the interpreter.
pub const DEFAULT_SYNC_RETRY_BUDGET: usize = 64;

/// Configuration attached to a stage at materialization.
///
/// Attributes set on a stage override those inherited from the materializer
/// (see [`Attributes::and`]).
#[derive(Clone, Default)]
pub struct Attributes {
    name: Option<String>,
    decider: Option<Decider>,
    sync_retry_budget: Option<usize>,
}

impl Attributes {
    /// Empty attributes
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes carrying only a stage name
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self::new().with_name(name)
    }

    /// Set the stage name used in logs
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the supervision decider for resource faults
    pub fn with_decider(mut self, decider: Decider) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Apply the same directive to every resource fault
    pub fn with_supervision(self, directive: Directive) -> Self {
        self.with_decider(decider(move |_| directive))
    }

    /// Set how many consecutive faults a synchronous pull loop recovers
    /// from before yielding. Zero is treated as one.
    pub fn with_sync_retry_budget(mut self, budget: usize) -> Self {
        self.sync_retry_budget = Some(budget.max(1));
        self
    }

    /// The configured stage name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The configured stage name, or `default`
    pub fn name_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(default)
    }

    /// Supervision lookup: the configured decider, or one that stops on every fault
    pub fn decider(&self) -> Decider {
        self.decider.clone().unwrap_or_else(stopping_decider)
    }

    /// The synchronous retry budget, or [`DEFAULT_SYNC_RETRY_BUDGET`]
    pub fn sync_retry_budget(&self) -> usize {
        self.sync_retry_budget.unwrap_or(DEFAULT_SYNC_RETRY_BUDGET)
    }

    /// Combine with `other`; values set in `other` win.
    pub fn and(&self, other: &Attributes) -> Attributes {
        Attributes {
            name: other.name.clone().or_else(|| self.name.clone()),
            decider: other.decider.clone().or_else(|| self.decider.clone()),
            sync_retry_budget: other.sync_retry_budget.or(self.sync_retry_budget),
        }
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("name", &self.name)
            .field("decider", &self.decider.as_ref().map(|_| ".."))
            .field("sync_retry_budget", &self.sync_retry_budget)
            .finish()
    }
}
