//! Drain a design's pending experiments through a core model

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{info, warn};

use super::CoreModel;
use crate::experiment::{ExperimentRecord, ExperimentStore};
use crate::scope::Scope;
use crate::{Error, Result};

/// Outcome counts of [`run_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Experiments that recorded measures
    pub completed: usize,
    /// Experiments recorded as failed
    pub failed: usize,
    /// Experiments another writer resolved first
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Completed,
    Failed,
    Skipped,
}

impl RunSummary {
    fn tally(outcomes: &[Outcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut s, o| {
            match o {
                Outcome::Completed => s.completed += 1,
                Outcome::Failed => s.failed += 1,
                Outcome::Skipped => s.skipped += 1,
            }
            s
        })
    }

    /// Experiments handled in this run.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

fn run_one(
    store: &ExperimentStore,
    model: &dyn CoreModel,
    record: &ExperimentRecord,
) -> Result<Outcome> {
    let id = record.experiment_id();
    let recorded = match model.run(record.assignment()) {
        Ok(measures) => match store.record_result(id, measures) {
            Err(e) if e.is_scope_error() => {
                // measures the scope does not accept fail the experiment
                store.record_failure(id, e.to_string()).map(|()| Outcome::Failed)
            }
            other => other.map(|()| Outcome::Completed),
        },
        Err(e) => {
            warn!(experiment = %id, model = model.name(), error = %e, "model run failed");
            store.record_failure(id, e.to_string()).map(|()| Outcome::Failed)
        }
    };
    match recorded {
        Err(Error::NotPending { .. }) => Ok(Outcome::Skipped),
        other => other,
    }
}

/// Run `model` on every pending experiment of `design` and record each
/// outcome. Runs in parallel with the `parallel` feature.
///
/// Model errors and measures rejected by the scope become failed
/// experiments; experiments resolved concurrently by another writer are
/// skipped. Call again to resume after an interruption.
///
/// # Errors
///
/// Storage errors from the store; experiments recorded before the error
/// stay recorded.
pub fn run_pending(
    store: &ExperimentStore,
    scope: &Scope,
    design: &str,
    model: &dyn CoreModel,
) -> Result<RunSummary> {
    let pending = store.pending(scope, design);
    info!(
        scope = scope.name(),
        design,
        model = model.name(),
        pending = pending.len(),
        "running pending experiments"
    );

    #[cfg(feature = "parallel")]
    let outcomes = pending
        .par_iter()
        .map(|r| run_one(store, model, r))
        .collect::<Result<Vec<_>>>()?;

    #[cfg(not(feature = "parallel"))]
    let outcomes = pending
        .iter()
        .map(|r| run_one(store, model, r))
        .collect::<Result<Vec<_>>>()?;

    let summary = RunSummary::tally(&outcomes);
    info!(
        design,
        completed = summary.completed,
        failed = summary.failed,
        skipped = summary.skipped,
        "run finished"
    );
    Ok(summary)
}
