//! Experiment Store
//!
//! Bookkeeping for model runs: every parameter combination of a design is
//! reserved once, run at most once, and its outcome recorded exactly once.
//!
//! ## Lifecycle
//!
//! ```text
//! reserve ──> Pending ──record_result──> Complete ──┐
//!                │                                  ├──archive──> Parquet
//!                └────record_failure──> Failed ─────┘
//! ```
//!
//! ## Persistence
//!
//! An opened store keeps an append-only JSON-lines journal. Each transition
//! is one line, written (and fsynced unless disabled) before it becomes
//! visible. Reopening replays the journal; a torn trailing line left by a
//! crash is dropped. Archived experiments move to Parquet files read through
//! [`Archive`].
//!
//! ## Usage
//!
//! ```rust
//! use trueno_ema::bounds::Bounds;
//! use trueno_ema::experiment::ExperimentStore;
//! use trueno_ema::scope::{Measure, Parameter, Scope};
//! use trueno_ema::value::{assignment, measures};
//!
//! let scope = Scope::new("road_test")
//!     .with(Parameter::uncertainty("x", Bounds::continuous("x", 0.0, 10.0)?, 5.0))?
//!     .with(Measure::new("measure"))?;
//!
//! let store = ExperimentStore::in_memory();
//! let ids = store.reserve(&scope, "d1", &[assignment([("x", 3.0.into())])])?;
//! store.record_result(ids[0], measures([("measure", 5.0)]))?;
//!
//! assert!(store.pending(&scope, "d1").is_empty());
//! assert_eq!(store.query(&scope, None)?.len(), 1);
//! # Ok::<(), trueno_ema::Error>(())
//! ```

mod archive;
mod journal;
mod record;
mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use archive::Archive;
pub use journal::JOURNAL_VERSION;
pub use record::{ExperimentRecord, ExperimentRecordBuilder, ExperimentStatus};
pub use store::{ArchiveOutcome, ExperimentStore, StoreBuilder, SYNC_ENV_VAR};

/// Store-wide experiment id; monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(u64);

impl ExperimentId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ExperimentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
