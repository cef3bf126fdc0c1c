//! Scope: the declared parameter space of a study
//!
//! A [`Scope`] names every uncertainty, lever, constant and measure, with a
//! [`Bounds`]-typed domain per parameter. It is built once per study,
//! validated eagerly, and read-only afterwards; boxes, designs and the
//! experiment store all refer to it.
//!
//! ```rust
//! use trueno_ema::bounds::Bounds;
//! use trueno_ema::scope::{Measure, Parameter, Scope};
//!
//! let mut scope = Scope::new("road_test");
//! scope.declare(Parameter::uncertainty("x", Bounds::continuous("x", 0.0, 10.0)?, 5.0))?;
//! scope.declare(Parameter::lever("y", Bounds::categorical("y", ["lo", "hi"])?, "lo"))?;
//! scope.declare(Measure::new("cost"))?;
//!
//! assert_eq!(scope.domain_of("x")?.numeric_range(), Some((0.0, 10.0)));
//! assert!(scope.domain_of("z").is_err());
//! # Ok::<(), trueno_ema::Error>(())
//! ```

mod loader;
mod measure;
mod parameter;

pub use measure::{Measure, MeasureKind, MeasureType, Transform};
pub use parameter::{Distribution, Parameter, ParameterRole};

use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use crate::value::{Assignment, Measures};
use crate::{Error, Result};

/// Item accepted by [`Scope::declare`].
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    /// Uncertainty, lever or constant
    Parameter(Parameter),
    /// Model output
    Measure(Measure),
}

impl From<Parameter> for Declaration {
    fn from(p: Parameter) -> Self {
        Self::Parameter(p)
    }
}

impl From<Measure> for Declaration {
    fn from(m: Measure) -> Self {
        Self::Measure(m)
    }
}

/// Declared correlation between two parameters (names stored sorted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    first: String,
    second: String,
    rho: f64,
}

impl Correlation {
    /// Parameter pair, sorted by name.
    #[must_use]
    pub fn pair(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }

    /// Correlation coefficient.
    #[must_use]
    pub const fn rho(&self) -> f64 {
        self.rho
    }
}

/// Declared parameter space of a study.
///
/// Deserialization replays every declaration and correlation, so a stored
/// scope is checked exactly like one built in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScope")]
pub struct Scope {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    parameters: Vec<Parameter>,
    measures: Vec<Measure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    correlations: Vec<Correlation>,
}

#[derive(Deserialize)]
struct RawScope {
    name: String,
    #[serde(default)]
    description: String,
    parameters: Vec<Parameter>,
    measures: Vec<Measure>,
    #[serde(default)]
    correlations: Vec<Correlation>,
}

impl TryFrom<RawScope> for Scope {
    type Error = Error;

    fn try_from(raw: RawScope) -> Result<Self> {
        let mut scope = Self::new(raw.name).with_description(raw.description);
        for parameter in raw.parameters {
            scope.declare(parameter)?;
        }
        for measure in raw.measures {
            scope.declare(measure)?;
        }
        for c in raw.correlations {
            scope.correlate(&c.first, &c.second, c.rho)?;
        }
        Ok(scope)
    }
}

impl Scope {
    /// Empty scope.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            measures: Vec::new(),
            correlations: Vec::new(),
        }
    }

    /// Set a free-text description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare and return `self`, for chained construction.
    ///
    /// # Errors
    ///
    /// See [`Scope::declare`].
    pub fn with(mut self, declaration: impl Into<Declaration>) -> Result<Self> {
        self.declare(declaration)?;
        Ok(self)
    }

    /// Add a parameter or measure.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if the name is already declared (as a parameter or a
    /// measure) or the parameter's domain/default is malformed.
    pub fn declare(&mut self, declaration: impl Into<Declaration>) -> Result<()> {
        let declaration = declaration.into();
        let name = match &declaration {
            Declaration::Parameter(p) => p.name(),
            Declaration::Measure(m) => m.name(),
        };
        if name.is_empty() {
            return Err(Error::format(format!(
                "scope '{}' cannot declare an unnamed item",
                self.name
            )));
        }
        if self.is_declared(name) {
            return Err(Error::format(format!(
                "'{name}' is declared twice in scope '{}'",
                self.name
            )));
        }
        match declaration {
            Declaration::Parameter(p) => {
                p.validate()?;
                self.parameters.push(p);
            }
            Declaration::Measure(m) => self.measures.push(m),
        }
        Ok(())
    }

    fn is_declared(&self, name: &str) -> bool {
        self.parameter(name).is_some() || self.measure(name).is_some()
    }

    /// Declare a correlation between two parameters.
    ///
    /// Re-declaring the same pair (in either order) with the same value is
    /// accepted.
    ///
    /// # Errors
    ///
    /// `Scope` for undeclared parameters, `ScopeFormat` for self-correlation
    /// or a coefficient outside `[-1, 1]`, `AsymmetricCorrelation` when the
    /// pair already carries a different value.
    pub fn correlate(&mut self, a: &str, b: &str, rho: f64) -> Result<()> {
        for name in [a, b] {
            if self.parameter(name).is_none() {
                return Err(Error::scope(format!(
                    "cannot correlate undeclared parameter '{name}' in scope '{}'",
                    self.name
                )));
            }
        }
        if a == b {
            return Err(Error::format(format!("parameter '{a}' cannot correlate with itself")));
        }
        if !(-1.0..=1.0).contains(&rho) {
            return Err(Error::format(format!(
                "correlation of '{a}' and '{b}' must lie in [-1, 1], got {rho}"
            )));
        }
        if let Some(existing) = self.correlation(a, b) {
            if (existing - rho).abs() > f64::EPSILON {
                return Err(Error::AsymmetricCorrelation {
                    first: a.to_string(),
                    second: b.to_string(),
                    existing,
                    requested: rho,
                });
            }
            return Ok(());
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        self.correlations.push(Correlation {
            first: first.to_string(),
            second: second.to_string(),
            rho,
        });
        Ok(())
    }

    /// Declared correlation of a pair, in either order.
    #[must_use]
    pub fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        self.correlations
            .iter()
            .find(|c| c.first == first && c.second == second)
            .map(|c| c.rho)
    }

    /// All declared correlations.
    #[must_use]
    pub fn correlations(&self) -> &[Correlation] {
        &self.correlations
    }

    /// Scope name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameters in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Parameters with the given role, in declaration order.
    pub fn parameters_with_role(&self, role: ParameterRole) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(move |p| p.role() == role)
    }

    /// Exogenous uncertainties.
    pub fn uncertainties(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters_with_role(ParameterRole::Uncertainty)
    }

    /// Policy levers.
    pub fn levers(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters_with_role(ParameterRole::Lever)
    }

    /// Constants.
    pub fn constants(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters_with_role(ParameterRole::Constant)
    }

    /// Measures in declaration order.
    #[must_use]
    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    /// Parameter by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    /// Measure by name.
    #[must_use]
    pub fn measure(&self, name: &str) -> Option<&Measure> {
        self.measures.iter().find(|m| m.name() == name)
    }

    /// Declared domain of a parameter.
    ///
    /// # Errors
    ///
    /// `Scope` if `name` is not a declared parameter.
    pub fn domain_of(&self, name: &str) -> Result<&Bounds> {
        self.parameter(name).map(Parameter::domain).ok_or_else(|| {
            Error::scope(format!(
                "'{name}' is not a parameter of scope '{}'",
                self.name
            ))
        })
    }

    /// Complete and normalize an assignment.
    ///
    /// Absent parameters take their default; values are coerced to their
    /// parameter's kind and checked against its domain.
    ///
    /// # Errors
    ///
    /// `Scope` for an undeclared name or an invalid value.
    pub fn normalize_assignment(&self, assignment: &Assignment) -> Result<Assignment> {
        if let Some(unknown) = assignment.keys().find(|k| self.parameter(k).is_none()) {
            return Err(Error::scope(format!(
                "assignment sets '{unknown}', which scope '{}' does not declare",
                self.name
            )));
        }
        self.parameters
            .iter()
            .map(|p| {
                let value = assignment.get(p.name()).unwrap_or_else(|| p.default_value());
                Ok((p.name().to_string(), p.normalize(value)?))
            })
            .collect()
    }

    /// Check measure names and types.
    ///
    /// # Errors
    ///
    /// `Scope` for an undeclared measure, `ScopeFormat` for a type mismatch.
    pub fn validate_measures(&self, measures: &Measures) -> Result<()> {
        for (name, value) in measures {
            let measure = self.measure(name).ok_or_else(|| {
                Error::scope(format!(
                    "'{name}' is not a measure of scope '{}'",
                    self.name
                ))
            })?;
            measure.validate_value(*value)?;
        }
        Ok(())
    }
}
