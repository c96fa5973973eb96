//! Transaction tracking for in-flight SSTable builds.
//!
//! A writer registers with a tracker before creating any file, so a crash
//! leaves no temp files the outer system does not know about. The tracker
//! is notified again on commit or abort; anything still registered at
//! recovery time is garbage to sweep.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::Result;
use crate::sstable::Descriptor;

/// Outcome recorded for a tracked build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    InFlight,
    Committed,
    Aborted,
}

/// Observes writer lifecycles. `track_new` is invoked before any file
/// exists; exactly one of `on_commit`/`on_abort` follows.
pub trait TransactionTracker: Send + Sync {
    fn track_new(&self, descriptor: &Descriptor);

    fn on_commit(&self, descriptor: &Descriptor);

    fn on_abort(&self, descriptor: &Descriptor);
}

/// In-memory tracker: keeps per-generation state for recovery sweeps and
/// assertions in tests.
#[derive(Debug, Default)]
pub struct TransactionLog {
    entries: Mutex<Vec<(Descriptor, TrackedState)>>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_of(&self, descriptor: &Descriptor) -> Result<Option<TrackedState>> {
        Ok(self
            .entries
            .lock()?
            .iter()
            .rev()
            .find(|(d, _)| d == descriptor)
            .map(|(_, state)| *state))
    }

    /// Builds registered but never resolved; candidates for cleanup after
    /// a crash.
    pub fn in_flight(&self) -> Result<Vec<Descriptor>> {
        Ok(self
            .entries
            .lock()?
            .iter()
            .filter(|(_, state)| *state == TrackedState::InFlight)
            .map(|(d, _)| d.clone())
            .collect())
    }

    fn record_new(&self, descriptor: &Descriptor) -> Result<()> {
        self.entries
            .lock()?
            .push((descriptor.clone(), TrackedState::InFlight));
        Ok(())
    }

    fn set_state(&self, descriptor: &Descriptor, state: TrackedState) -> Result<()> {
        let mut entries = self.entries.lock()?;
        match entries.iter_mut().find(|(d, _)| d == descriptor) {
            Some(entry) => entry.1 = state,
            None => {
                warn!(
                    generation = descriptor.generation,
                    ?state,
                    "resolution for untracked build"
                );
                entries.push((descriptor.clone(), state));
            }
        }
        Ok(())
    }
}

impl TransactionTracker for TransactionLog {
    fn track_new(&self, descriptor: &Descriptor) {
        if let Err(error) = self.record_new(descriptor) {
            warn!(generation = descriptor.generation, %error, "failed to track build");
        }
    }

    fn on_commit(&self, descriptor: &Descriptor) {
        info!(
            keyspace = %descriptor.keyspace,
            table = %descriptor.table,
            generation = descriptor.generation,
            "sstable committed"
        );
        if let Err(error) = self.set_state(descriptor, TrackedState::Committed) {
            warn!(generation = descriptor.generation, %error, "failed to record commit");
        }
    }

    fn on_abort(&self, descriptor: &Descriptor) {
        if let Err(error) = self.set_state(descriptor, TrackedState::Aborted) {
            warn!(generation = descriptor.generation, %error, "failed to record abort");
        }
    }
}
