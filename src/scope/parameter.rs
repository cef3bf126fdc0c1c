//! Parameter declarations (uncertainties, levers, constants)

use serde::{Deserialize, Serialize};

use crate::bounds::{Bounds, BoundsKind};
use crate::value::Value;
use crate::{Error, Result};

/// Role of a parameter in a study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterRole {
    /// Exogenous uncertainty, outside the decision maker's control
    Uncertainty,
    /// Policy lever chosen by the decision maker
    Lever,
    /// Fixed input
    Constant,
}

/// Sampling distribution of a parameter over its domain.
///
/// `Uniform` applies to every domain kind. `Triangle` is continuous and
/// `Weighted` is categorical; using either on another kind is rejected when a
/// sampling design is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum Distribution {
    /// Uniform over the domain
    Uniform,
    /// Triangular between the domain limits with the given mode
    Triangle {
        /// Mode of the distribution
        peak: f64,
    },
    /// Category weights, one per label in label order
    Weighted {
        /// Relative weights
        weights: Vec<f64>,
    },
}

impl Distribution {
    /// Whether the distribution only makes sense over a real range.
    #[must_use]
    pub const fn is_continuous(&self) -> bool {
        matches!(self, Self::Triangle { .. })
    }

    /// Whether the distribution only makes sense over labels.
    #[must_use]
    pub const fn is_categorical(&self) -> bool {
        matches!(self, Self::Weighted { .. })
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    role: ParameterRole,
    domain: Bounds,
    default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    distribution: Option<Distribution>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
}

impl Parameter {
    /// Exogenous uncertainty over `domain`.
    #[must_use]
    pub fn uncertainty(name: impl Into<String>, domain: Bounds, default: impl Into<Value>) -> Self {
        Self::with_role(name, ParameterRole::Uncertainty, domain, default)
    }

    /// Policy lever over `domain`.
    #[must_use]
    pub fn lever(name: impl Into<String>, domain: Bounds, default: impl Into<Value>) -> Self {
        Self::with_role(name, ParameterRole::Lever, domain, default)
    }

    /// Constant: its domain holds exactly `value`.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` for a NaN value.
    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        let domain = Bounds::point(name.clone(), &value)?;
        Ok(Self::with_role(name, ParameterRole::Constant, domain, value))
    }

    fn with_role(
        name: impl Into<String>,
        role: ParameterRole,
        domain: Bounds,
        default: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            domain,
            default: default.into(),
            distribution: None,
            description: String::new(),
        }
    }

    /// Set the sampling distribution.
    #[must_use]
    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = Some(distribution);
        self
    }

    /// Set a free-text description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter role.
    #[must_use]
    pub const fn role(&self) -> ParameterRole {
        self.role
    }

    /// Declared domain.
    #[must_use]
    pub const fn domain(&self) -> &Bounds {
        &self.domain
    }

    /// Default value.
    #[must_use]
    pub const fn default_value(&self) -> &Value {
        &self.default
    }

    /// Declared distribution; `None` means uniform.
    #[must_use]
    pub const fn distribution(&self) -> Option<&Distribution> {
        self.distribution.as_ref()
    }

    /// Free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Domain kind.
    #[must_use]
    pub const fn kind(&self) -> BoundsKind {
        self.domain.kind()
    }

    /// Coerce a value to this parameter's kind and check it against the domain.
    ///
    /// # Errors
    ///
    /// `Scope` naming the parameter if the value has the wrong type or lies
    /// outside the domain.
    pub fn normalize(&self, value: &Value) -> Result<Value> {
        let coerced = match self.kind() {
            BoundsKind::Unrestricted => Some(value.clone()),
            BoundsKind::Continuous => value.as_f64().map(Value::Float),
            BoundsKind::Discrete => value.as_i64().map(Value::Int),
            BoundsKind::Categorical => value.as_str().map(Value::from),
            BoundsKind::Boolean => value.as_bool().map(Value::Bool),
        };
        let coerced = coerced.ok_or_else(|| {
            Error::scope(format!(
                "parameter '{}' expects a {} value, got {} {value}",
                self.name,
                self.kind(),
                value.type_name()
            ))
        })?;
        if !self.domain.contains_value(&coerced) {
            return Err(Error::scope(format!(
                "value {coerced} for parameter '{}' is outside its domain {}",
                self.name, self.domain
            )));
        }
        Ok(coerced)
    }

    /// Well-formedness checks run by [`super::Scope::declare`].
    pub(crate) fn validate(&self) -> Result<()> {
        if self.domain.name() != self.name {
            return Err(Error::format(format!(
                "parameter '{}' declares bounds for '{}'",
                self.name,
                self.domain.name()
            )));
        }
        Bounds::from_domain(self.name.clone(), self.domain.domain().clone())?;
        self.normalize(&self.default).map_err(|e| {
            Error::format(format!("default of parameter '{}' is invalid: {e}", self.name))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_coerces_int_into_real_domain() {
        let p = Parameter::uncertainty("x", Bounds::continuous("x", 0.0, 10.0).unwrap(), 5.0);
        assert_eq!(p.normalize(&Value::Int(3)).unwrap(), Value::Float(3.0));
        assert!(p.normalize(&Value::Float(11.0)).is_err());
        assert!(p.normalize(&Value::from("3")).is_err());
    }

    #[test]
    fn test_normalize_discrete() {
        let p = Parameter::lever("n", Bounds::discrete("n", 1, 4).unwrap(), 1);
        assert_eq!(p.normalize(&Value::Float(2.0)).unwrap(), Value::Int(2));
        let err = p.normalize(&Value::Float(2.5)).unwrap_err();
        assert!(err.to_string().contains("'n'"));
    }

    #[test]
    fn test_constant_domain_is_a_point() {
        let c = Parameter::constant("c", 2.5).unwrap();
        assert_eq!(c.role(), ParameterRole::Constant);
        assert!(c.normalize(&Value::Float(2.5)).is_ok());
        assert!(c.normalize(&Value::Float(2.0)).is_err());
        assert!(Parameter::constant("bad", f64::NAN).is_err());
    }

    #[test]
    fn test_validate_rejects_default_outside_domain() {
        let p = Parameter::uncertainty("x", Bounds::continuous("x", 0.0, 1.0).unwrap(), 5.0);
        assert!(matches!(p.validate(), Err(Error::ScopeFormat(_))));
    }

    #[test]
    fn test_validate_rejects_misnamed_bounds() {
        let p = Parameter::uncertainty("x", Bounds::continuous("z", 0.0, 1.0).unwrap(), 0.5);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_distribution_classes() {
        assert!(Distribution::Triangle { peak: 1.0 }.is_continuous());
        assert!(Distribution::Weighted { weights: vec![1.0] }.is_categorical());
        assert!(!Distribution::Uniform.is_continuous());
    }
}
