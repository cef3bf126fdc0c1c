//! Nearest-neighbour surrogate model
//!
//! Inverse-distance weighting over the `k` closest training experiments.
//! Numeric dimensions are scaled by the width of their declared domain (or
//! of the training data when the domain is unbounded); categorical and
//! boolean dimensions contribute 0 on a match and 1 otherwise. An assignment
//! equal to a training point returns that point's measures unchanged.

use tracing::debug;

use super::CoreModel;
use crate::bounds::BoundsKind;
use crate::experiment::ExperimentRecord;
use crate::scope::{Parameter, ParameterRole, Scope};
use crate::value::{Assignment, Measures, Value};
use crate::{Error, Result};

/// Default neighbourhood size.
pub const DEFAULT_NEIGHBORS: usize = 5;

#[derive(Debug, Clone)]
enum Feature {
    Numeric { name: String, scale: f64 },
    Label { name: String },
}

impl Feature {
    fn distance(&self, a: &Assignment, b: &Assignment) -> f64 {
        match self {
            Self::Numeric { name, scale } => {
                let x = a.get(name).and_then(Value::as_f64);
                let y = b.get(name).and_then(Value::as_f64);
                match (x, y) {
                    (Some(x), Some(y)) => (x - y) / scale,
                    _ => 1.0,
                }
            }
            Self::Label { name } => {
                if a.get(name) == b.get(name) {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }
}

/// Meta-model fit on completed experiments.
#[derive(Debug, Clone)]
pub struct SurrogateModel {
    name: String,
    scope: Scope,
    features: Vec<Feature>,
    points: Vec<(Assignment, Measures)>,
    neighbors: usize,
}

fn numeric_scale(parameter: &Parameter, training: &[(Assignment, Measures)]) -> f64 {
    if let Some((lo, hi)) = parameter.domain().numeric_range() {
        if (hi - lo).is_finite() && hi > lo {
            return hi - lo;
        }
    }
    let values = training
        .iter()
        .filter_map(|(a, _)| a.get(parameter.name()).and_then(Value::as_f64));
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if hi > lo {
        hi - lo
    } else {
        1.0
    }
}

impl SurrogateModel {
    /// Fit on the completed experiments among `records`.
    ///
    /// # Errors
    ///
    /// `Model` if no record of `scope` is complete, or `neighbors` is 0.
    pub fn fit(
        name: impl Into<String>,
        scope: &Scope,
        records: &[ExperimentRecord],
        neighbors: usize,
    ) -> Result<Self> {
        let name = name.into();
        if neighbors == 0 {
            return Err(Error::Model(format!("{name}: neighbourhood size must be positive")));
        }
        let points: Vec<(Assignment, Measures)> = records
            .iter()
            .filter(|r| r.scope() == scope.name())
            .filter_map(|r| r.measures().map(|m| (r.assignment().clone(), m.clone())))
            .collect();
        if points.is_empty() {
            return Err(Error::Model(format!(
                "{name}: no completed experiments of scope '{}' to fit on",
                scope.name()
            )));
        }

        let features = scope
            .parameters()
            .iter()
            .filter(|p| p.role() != ParameterRole::Constant)
            .map(|p| match p.kind() {
                BoundsKind::Continuous | BoundsKind::Discrete => Feature::Numeric {
                    name: p.name().to_string(),
                    scale: numeric_scale(p, &points),
                },
                BoundsKind::Categorical | BoundsKind::Boolean | BoundsKind::Unrestricted => {
                    Feature::Label {
                        name: p.name().to_string(),
                    }
                }
            })
            .collect();

        debug!(model = %name, points = points.len(), neighbors, "fit surrogate model");
        Ok(Self {
            name,
            scope: scope.clone(),
            features,
            points,
            neighbors,
        })
    }

    /// Number of training points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; fitting requires at least one point.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn distance(&self, a: &Assignment, b: &Assignment) -> f64 {
        self.features
            .iter()
            .map(|f| f.distance(a, b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl CoreModel for SurrogateModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, assignment: &Assignment) -> Result<Measures> {
        let query = self
            .scope
            .normalize_assignment(assignment)
            .map_err(|e| Error::Model(format!("{}: {e}", self.name)))?;

        let mut ranked: Vec<(f64, &Measures)> = self
            .points
            .iter()
            .map(|(a, m)| (self.distance(&query, a), m))
            .collect();
        ranked.sort_by(|x, y| x.0.total_cmp(&y.0));

        if let Some((d, measures)) = ranked.first() {
            if *d == 0.0 {
                return Ok((*measures).clone());
            }
        }

        let nearest = &ranked[..self.neighbors.min(ranked.len())];
        let mut sums: Measures = Measures::new();
        let mut weights: Measures = Measures::new();
        for (d, measures) in nearest {
            let w = d.powi(-2);
            for (name, value) in *measures {
                if value.is_finite() {
                    *sums.entry(name.clone()).or_insert(0.0) += w * value;
                    *weights.entry(name.clone()).or_insert(0.0) += w;
                }
            }
        }
        Ok(sums
            .into_iter()
            .map(|(name, sum)| {
                let w = weights.get(&name).copied().unwrap_or(f64::NAN);
                (name, sum / w)
            })
            .collect())
    }
}
