//! Error types for Trueno-EMA
//!
//! Every failure carries the identity (parameter, experiment, design) needed to
//! correct it without re-running the whole study.

use std::path::PathBuf;

use thiserror::Error;

use crate::experiment::ExperimentId;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-EMA error types
#[derive(Error, Debug)]
pub enum Error {
    /// Inconsistent scope or box definition (undeclared name, broken refinement chain)
    #[error("Scope error: {0}")]
    Scope(String),

    /// Malformed scope, bounds, or box definition
    #[error("Scope format error: {0}")]
    ScopeFormat(String),

    /// The same (design, assignment) identity is already reserved
    #[error("Duplicate reservation in design '{design}': assignment already held by experiment {existing}")]
    DuplicateReservation {
        /// Design the reservation targeted
        design: String,
        /// Experiment that already holds the assignment
        existing: ExperimentId,
    },

    /// Operation requires that no pending experiments exist
    #[error("Pending experiments: {0}\nDrain or fail the pending experiments first.")]
    PendingExperiments(String),

    /// Status transition attempted on an experiment that already left pending
    #[error("Experiment {experiment_id} is not pending (status: {status})")]
    NotPending {
        /// Experiment the transition targeted
        experiment_id: ExperimentId,
        /// Status found when the transition was attempted
        status: String,
    },

    /// No live experiment has this id
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(ExperimentId),

    /// Archive destination is unusable; nothing was moved
    #[error("Archive path missing or not writable: {}\n{reason}", path.display())]
    MissingArchivePath {
        /// Requested destination
        path: PathBuf,
        /// Why the destination was rejected
        reason: String,
    },

    /// Two conflicting correlation values for the same parameter pair
    #[error("Asymmetric correlation between '{first}' and '{second}': {existing} declared, {requested} requested")]
    AsymmetricCorrelation {
        /// First parameter of the pair
        first: String,
        /// Second parameter of the pair
        second: String,
        /// Coefficient already declared
        existing: f64,
        /// Conflicting coefficient
        requested: f64,
    },

    /// Distribution continuity does not match the parameter's domain
    #[error("Distribution type error for '{parameter}': {message}")]
    DistributionType {
        /// Parameter being sampled
        parameter: String,
        /// Mismatch description
        message: String,
    },

    /// Distribution could not be instantiated from its parameters
    #[error("Distribution freeze error for '{parameter}': {message}")]
    DistributionFreeze {
        /// Parameter being sampled
        parameter: String,
        /// Construction failure
        message: String,
    },

    /// Core model adapter failed to produce measures
    #[error("Model error: {0}")]
    Model(String),

    /// Storage error (journal/Parquet)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for `Scope` and `ScopeFormat` failures.
    #[must_use]
    pub const fn is_scope_error(&self) -> bool {
        matches!(self, Self::Scope(_) | Self::ScopeFormat(_))
    }

    /// True for conditions a caller reconciles by inspecting `pending(...)`.
    #[must_use]
    pub const fn is_pending_experiments(&self) -> bool {
        matches!(
            self,
            Self::DuplicateReservation { .. } | Self::PendingExperiments(_)
        )
    }

    pub(crate) fn scope(msg: impl Into<String>) -> Self {
        Self::Scope(msg.into())
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::ScopeFormat(msg.into())
    }
}
