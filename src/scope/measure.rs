//! Measure (model output) declarations

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Optimization direction of a measure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureKind {
    /// Smaller is better
    Minimize,
    /// Larger is better
    Maximize,
    /// Reported only
    #[default]
    Info,
}

/// Value type of a measure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureType {
    /// Real-valued
    #[default]
    Real,
    /// Integral count
    Integer,
}

/// Transform applied when a measure is read for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    /// Natural logarithm
    Ln,
    /// `ln(1 + x)`
    Log1p,
    /// `e^x`
    Exp,
}

/// One declared measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    name: String,
    #[serde(default)]
    kind: MeasureKind,
    #[serde(default)]
    dtype: MeasureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transform: Option<Transform>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
}

impl Measure {
    /// Real-valued informational measure.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MeasureKind::Info,
            dtype: MeasureType::Real,
            transform: None,
            description: String::new(),
        }
    }

    /// Set the optimization direction.
    #[must_use]
    pub const fn with_kind(mut self, kind: MeasureKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the value type.
    #[must_use]
    pub const fn with_type(mut self, dtype: MeasureType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Set the read transform.
    #[must_use]
    pub const fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Set a free-text description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Measure name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optimization direction.
    #[must_use]
    pub const fn kind(&self) -> MeasureKind {
        self.kind
    }

    /// Value type.
    #[must_use]
    pub const fn dtype(&self) -> MeasureType {
        self.dtype
    }

    /// Read transform, if any.
    #[must_use]
    pub const fn transform(&self) -> Option<Transform> {
        self.transform
    }

    /// Free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Apply the declared transform to a stored value.
    #[must_use]
    pub fn transform_value(&self, value: f64) -> f64 {
        match self.transform {
            None => value,
            Some(Transform::Ln) => value.ln(),
            Some(Transform::Log1p) => value.ln_1p(),
            Some(Transform::Exp) => value.exp(),
        }
    }

    /// Check a raw value against the declared type.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if an integer measure receives a non-integral value.
    pub fn validate_value(&self, value: f64) -> Result<()> {
        if self.dtype == MeasureType::Integer && !(value.is_finite() && value.fract() == 0.0) {
            return Err(Error::format(format!(
                "measure '{}' is an integer, got {value}",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transforms() {
        let m = Measure::new("cost").with_transform(Transform::Ln);
        assert!((m.transform_value(std::f64::consts::E) - 1.0).abs() < 1e-12);
        let m = Measure::new("cost").with_transform(Transform::Log1p);
        assert!(m.transform_value(0.0).abs() < f64::EPSILON);
        assert!((Measure::new("raw").transform_value(4.0) - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_integer_measure_validation() {
        let m = Measure::new("count").with_type(MeasureType::Integer);
        assert!(m.validate_value(3.0).is_ok());
        assert!(m.validate_value(3.5).is_err());
        assert!(m.validate_value(f64::NAN).is_err());
        assert!(Measure::new("real").validate_value(f64::NAN).is_ok());
    }

    #[test]
    fn test_defaults() {
        let m = Measure::new("m");
        assert_eq!(m.kind(), MeasureKind::Info);
        assert_eq!(m.dtype(), MeasureType::Real);
        assert!(m.transform().is_none());
    }
}
