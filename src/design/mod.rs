//! Sampling designs
//!
//! A [`Design`] is a named batch of complete assignments drawn from a
//! [`Scope`], ready to hand to
//! [`ExperimentStore::reserve`](crate::experiment::ExperimentStore::reserve).
//! Every sampled parameter's distribution is frozen against its domain when
//! the design is built, so a triangle peak outside the range or a weighted
//! choice over a real interval fails here, before any experiment exists.
//!
//! ## Methods
//!
//! - [`SamplingMethod::MonteCarlo`]: independent draws per parameter.
//! - [`SamplingMethod::LatinHypercube`]: each parameter's quantile range is
//!   cut into `n` equal strata and every stratum is used exactly once, with
//!   strata paired across parameters by independent shuffles.
//!
//! ```rust
//! use trueno_ema::bounds::Bounds;
//! use trueno_ema::design::{DesignBuilder, SamplingMethod};
//! use trueno_ema::scope::{Parameter, Scope};
//!
//! let scope = Scope::new("s")
//!     .with(Parameter::uncertainty("x", Bounds::continuous("x", 0.0, 1.0)?, 0.5))?;
//! let design = DesignBuilder::new(&scope, "lhs")
//!     .method(SamplingMethod::LatinHypercube)
//!     .samples(10)
//!     .seed(42)
//!     .build()?;
//! assert_eq!(design.len(), 10);
//! # Ok::<(), trueno_ema::Error>(())
//! ```

mod distribution;

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scope::{Parameter, ParameterRole, Scope};
use crate::value::{assignment_key, Assignment, Value};
use crate::{Error, Result};

use distribution::Frozen;

/// How sample points are placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Independent random draws
    MonteCarlo,
    /// Stratified draws, one per quantile stratum per parameter
    #[default]
    LatinHypercube,
}

/// Which parameters vary across the design; the rest stay at their default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFrom {
    /// Exogenous uncertainties only
    Uncertainties,
    /// Policy levers only
    Levers,
    /// Uncertainties and levers
    #[default]
    All,
}

impl SampleFrom {
    const fn varies(self, role: ParameterRole) -> bool {
        matches!(
            (self, role),
            (Self::All, ParameterRole::Uncertainty | ParameterRole::Lever)
                | (Self::Uncertainties, ParameterRole::Uncertainty)
                | (Self::Levers, ParameterRole::Lever)
        )
    }
}

/// Named batch of sampled assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Design {
    name: String,
    scope: String,
    method: SamplingMethod,
    sample_from: SampleFrom,
    seed: u64,
    assignments: Vec<Assignment>,
}

impl Design {
    /// Design name, used as the reservation tag.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the scope the design was drawn from.
    #[must_use]
    pub fn scope_name(&self) -> &str {
        &self.scope
    }

    /// Sampling method.
    #[must_use]
    pub const fn method(&self) -> SamplingMethod {
        self.method
    }

    /// Which parameters vary.
    #[must_use]
    pub const fn sample_from(&self) -> SampleFrom {
        self.sample_from
    }

    /// RNG seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Sampled assignments, one per experiment.
    #[must_use]
    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Take the assignments.
    #[must_use]
    pub fn into_assignments(self) -> Vec<Assignment> {
        self.assignments
    }

    /// Number of distinct assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Whether no assignment was drawn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Builder for [`Design`].
#[derive(Debug, Clone)]
pub struct DesignBuilder<'a> {
    scope: &'a Scope,
    name: String,
    method: SamplingMethod,
    samples: usize,
    seed: u64,
    sample_from: SampleFrom,
}

impl<'a> DesignBuilder<'a> {
    /// Latin hypercube of 100 samples over all uncertainties and levers,
    /// seed 0.
    #[must_use]
    pub fn new(scope: &'a Scope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            method: SamplingMethod::default(),
            samples: 100,
            seed: 0,
            sample_from: SampleFrom::default(),
        }
    }

    /// Set the sampling method.
    #[must_use]
    pub const fn method(mut self, method: SamplingMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the number of samples.
    #[must_use]
    pub const fn samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    /// Set the RNG seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Choose which parameters vary.
    #[must_use]
    pub const fn sample_from(mut self, sample_from: SampleFrom) -> Self {
        self.sample_from = sample_from;
        self
    }

    /// Freeze distributions and draw the design.
    ///
    /// Repeated assignments (possible when every varying parameter is
    /// discrete) are kept once, so the design may hold fewer than
    /// `samples` rows.
    ///
    /// # Errors
    ///
    /// `DistributionType` / `DistributionFreeze` for a parameter whose
    /// distribution cannot be sampled over its domain, `Other` for an empty
    /// name or zero samples.
    pub fn build(self) -> Result<Design> {
        if self.name.is_empty() {
            return Err(Error::Other("a design needs a name".into()));
        }
        if self.samples == 0 {
            return Err(Error::Other(format!(
                "design '{}' needs at least one sample",
                self.name
            )));
        }

        let columns: Vec<(&Parameter, Frozen)> = self
            .scope
            .parameters()
            .iter()
            .map(|p| {
                let frozen = if self.sample_from.varies(p.role()) {
                    Frozen::freeze(p)?
                } else {
                    Frozen::Fixed(p.default_value().clone())
                };
                Ok((p, frozen))
            })
            .collect::<Result<_>>()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = self.samples;
        let mut rows = vec![Assignment::new(); n];
        for (parameter, frozen) in &columns {
            let values = match self.method {
                SamplingMethod::MonteCarlo => {
                    (0..n).map(|_| frozen.sample(&mut rng)).collect()
                }
                SamplingMethod::LatinHypercube => latin_column(frozen, n, &mut rng),
            };
            for (row, value) in rows.iter_mut().zip(values) {
                row.insert(parameter.name().to_string(), value);
            }
        }

        let mut seen = BTreeSet::new();
        rows.retain(|row| seen.insert(assignment_key(row)));
        if rows.len() < n {
            debug!(
                design = %self.name,
                requested = n,
                distinct = rows.len(),
                "dropped repeated assignments"
            );
        }
        debug!(
            design = %self.name,
            scope = self.scope.name(),
            method = ?self.method,
            samples = rows.len(),
            "built sampling design"
        );

        Ok(Design {
            name: self.name,
            scope: self.scope.name().to_string(),
            method: self.method,
            sample_from: self.sample_from,
            seed: self.seed,
            assignments: rows,
        })
    }
}

/// One LHS column: stratum `i` contributes quantile `(i + u) / n`.
#[allow(clippy::cast_precision_loss)]
fn latin_column<R: Rng>(frozen: &Frozen, n: usize, rng: &mut R) -> Vec<Value> {
    if let Frozen::Fixed(v) = frozen {
        return vec![v.clone(); n];
    }
    let mut strata: Vec<usize> = (0..n).collect();
    strata.shuffle(rng);
    strata
        .into_iter()
        .map(|i| {
            let u: f64 = rng.gen();
            frozen.ppf((i as f64 + u) / n as f64)
        })
        .collect()
}
