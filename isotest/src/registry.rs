//! The collection of pending tests.

use crate::effects::{EffectRecord, EffectSpec};
use crate::error::Error;
use crate::trace_categories;

/// Ordered collection of prepared tests waiting to run.
///
/// Tests are taken most-recently-registered first. Callers must not rely
/// on any particular order.
#[derive(Debug, Default)]
pub struct TestRegistry {
    pending: Vec<EffectRecord>,
}

impl TestRegistry {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self { pending: vec![] }
    }

    /// Prepares an independent record from `spec` and queues it.
    ///
    /// Registering the same description several times queues that many
    /// independent executions.
    pub fn register(&mut self, spec: &EffectSpec) -> Result<(), Error> {
        let record = EffectRecord::prepare(spec)?;
        tracing::debug!(target: trace_categories::REGISTRY, "registered test '{}'", record.name);
        self.pending.push(record);
        Ok(())
    }

    /// Number of tests currently pending.
    pub fn count(&self) -> usize {
        self.pending.len()
    }

    /// Whether no tests are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and returns the next pending test, or `None` if there is none.
    pub fn take_next(&mut self) -> Option<EffectRecord> {
        self.pending.pop()
    }

    /// Drops every pending test for which `keep` returns false.
    pub fn retain(&mut self, keep: impl FnMut(&EffectRecord) -> bool) {
        self.pending.retain(keep);
    }

    /// Iterates pending tests in the order they will be taken.
    pub fn iter(&self) -> impl Iterator<Item = &EffectRecord> {
        self.pending.iter().rev()
    }
}
