//! Scenario discovery statistics
//!
//! Scores a box against the completed experiments that show an outcome of
//! interest:
//!
//! - **coverage**: share of the cases of interest that fall inside the box
//! - **density**: share of the cases inside the box that are of interest
//! - **mass**: share of all cases that fall inside the box
//!
//! Counting runs over record snapshots in parallel when the `parallel`
//! feature is enabled.
//!
//! ## Example
//!
//! ```rust
//! use trueno_ema::bounds::Bounds;
//! use trueno_ema::boxes::ParameterBox;
//! use trueno_ema::discovery::BoxStats;
//! use trueno_ema::experiment::ExperimentStore;
//! use trueno_ema::scope::{Measure, Parameter, Scope};
//! use trueno_ema::value::{assignment, measures};
//!
//! let scope = Scope::new("toy")
//!     .with(Parameter::uncertainty("x", Bounds::continuous("x", 0.0, 10.0)?, 5.0))?
//!     .with(Measure::new("cost"))?;
//! let store = ExperimentStore::in_memory();
//! let points: Vec<_> = (0..10_i32).map(|i| assignment([("x", f64::from(i).into())])).collect();
//! for id in store.reserve(&scope, "d1", &points)? {
//!     let x = store.get(id).and_then(|r| r.value("x").and_then(|v| v.as_f64())).unwrap_or(0.0);
//!     store.record_result(id, measures([("cost", x * 2.0)]))?;
//! }
//!
//! let bx = ParameterBox::new("high").with_bounds(Bounds::continuous("x", 6.0, 10.0)?)?;
//! let records = store.query(&scope, None)?;
//! let stats = BoxStats::compute(&bx, &records, |r| r.measure("cost").is_some_and(|c| c > 10.0));
//! assert_eq!(stats.inside(), 4);
//! assert!((stats.coverage() - 1.0).abs() < 1e-12);
//! # Ok::<(), trueno_ema::Error>(())
//! ```

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::boxes::{Boxes, ChainedBox, NodeId, ParameterBox};
use crate::experiment::{ExperimentId, ExperimentRecord};
use crate::scope::Scope;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    total: usize,
    inside: usize,
    of_interest: usize,
    inside_of_interest: usize,
}

impl Tally {
    const fn observe(inside: bool, of_interest: bool) -> Self {
        Self {
            total: 1,
            inside: inside as usize,
            of_interest: of_interest as usize,
            inside_of_interest: (inside && of_interest) as usize,
        }
    }

    const fn add(self, other: Self) -> Self {
        Self {
            total: self.total + other.total,
            inside: self.inside + other.inside,
            of_interest: self.of_interest + other.of_interest,
            inside_of_interest: self.inside_of_interest + other.inside_of_interest,
        }
    }
}

/// Coverage, density and mass of one box over a set of experiments.
///
/// Ratios with an empty denominator are `0.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxStats {
    coverage: f64,
    density: f64,
    mass: f64,
    inside: usize,
    total: usize,
    of_interest: usize,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl BoxStats {
    /// Score `bx` over `records`; `of_interest` marks the cases to explain.
    ///
    /// Records are taken as given; pass completed experiments (see
    /// [`crate::experiment::ExperimentStore::query`]).
    #[must_use]
    pub fn compute<F>(bx: &ParameterBox, records: &[ExperimentRecord], of_interest: F) -> Self
    where
        F: Fn(&ExperimentRecord) -> bool + Sync,
    {
        let observe = |r: &ExperimentRecord| Tally::observe(bx.contains(r.assignment()), of_interest(r));

        #[cfg(feature = "parallel")]
        let tally = records
            .par_iter()
            .map(observe)
            .reduce(Tally::default, Tally::add);

        #[cfg(not(feature = "parallel"))]
        let tally = records.iter().map(observe).fold(Tally::default(), Tally::add);

        Self::from_tally(tally)
    }

    /// Score the effective box of a chain node.
    ///
    /// # Errors
    ///
    /// See [`ChainedBox::effective`].
    pub fn compute_chained<F>(
        chain: &ChainedBox,
        node: NodeId,
        records: &[ExperimentRecord],
        of_interest: F,
    ) -> Result<Self>
    where
        F: Fn(&ExperimentRecord) -> bool + Sync,
    {
        let effective = chain.effective(node)?;
        Ok(Self::compute(&effective, records, of_interest))
    }

    fn from_tally(t: Tally) -> Self {
        Self {
            coverage: ratio(t.inside_of_interest, t.of_interest),
            density: ratio(t.inside_of_interest, t.inside),
            mass: ratio(t.inside, t.total),
            inside: t.inside,
            total: t.total,
            of_interest: t.of_interest,
        }
    }

    /// Share of cases of interest inside the box.
    #[must_use]
    pub const fn coverage(&self) -> f64 {
        self.coverage
    }

    /// Share of cases inside the box that are of interest.
    #[must_use]
    pub const fn density(&self) -> f64 {
        self.density
    }

    /// Share of all cases inside the box.
    #[must_use]
    pub const fn mass(&self) -> f64 {
        self.mass
    }

    /// Cases inside the box.
    #[must_use]
    pub const fn inside(&self) -> usize {
        self.inside
    }

    /// All cases scored.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Cases of interest.
    #[must_use]
    pub const fn of_interest(&self) -> usize {
        self.of_interest
    }
}

impl Boxes {
    /// For each record, the names of the member boxes containing it.
    #[must_use]
    pub fn membership(&self, records: &[ExperimentRecord]) -> Vec<(ExperimentId, Vec<String>)> {
        let names = |r: &ExperimentRecord| {
            (
                r.experiment_id(),
                self.containing(r.assignment())
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            )
        };

        #[cfg(feature = "parallel")]
        let membership = records.par_iter().map(names).collect();

        #[cfg(not(feature = "parallel"))]
        let membership = records.iter().map(names).collect();

        membership
    }
}

/// Values of one measure across `records`, with the measure's transform
/// applied. Records that did not report it yield `NaN`.
///
/// # Errors
///
/// `Scope` if `measure` is not declared by `scope`.
pub fn measure_values(scope: &Scope, records: &[ExperimentRecord], measure: &str) -> Result<Vec<f64>> {
    let declared = scope.measure(measure).ok_or_else(|| {
        Error::scope(format!(
            "'{measure}' is not a measure of scope '{}'",
            scope.name()
        ))
    })?;
    Ok(records
        .iter()
        .map(|r| r.measure(measure).map_or(f64::NAN, |v| declared.transform_value(v)))
        .collect())
}
