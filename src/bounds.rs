//! Per-dimension constraints over one named parameter
//!
//! A [`Bounds`] is immutable: every narrowing operation returns a new value.
//!
//! ## Boundary convention
//!
//! Numeric ranges are inclusive on both ends unless a continuous range is
//! built with [`Bounds::continuous_exclusive`]. The same rule drives
//! [`Bounds::contains_value`] and [`Bounds::intersect`], so a point on the
//! shared edge of two adjacent inclusive ranges belongs to both.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;
use crate::{Error, Result};

/// Kind of a [`Bounds`] domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundsKind {
    /// No restriction
    Unrestricted,
    /// Real-valued range
    Continuous,
    /// Integer range
    Discrete,
    /// Subset of category labels
    Categorical,
    /// Subset of {false, true}
    Boolean,
}

impl fmt::Display for BoundsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unrestricted => "unrestricted",
            Self::Continuous => "continuous",
            Self::Discrete => "discrete",
            Self::Categorical => "categorical",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Allowed values of one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Domain {
    /// Every value passes
    Unrestricted,
    /// `lower <= x <= upper` (or `< upper` when `upper_exclusive`)
    Continuous {
        /// Lower limit (may be `-inf`)
        #[serde(with = "limit")]
        lower: f64,
        /// Upper limit (may be `+inf`)
        #[serde(with = "limit")]
        upper: f64,
        /// Whether `upper` itself is excluded
        #[serde(default)]
        upper_exclusive: bool,
    },
    /// `lower <= n <= upper`
    Discrete {
        /// Lower limit
        lower: i64,
        /// Upper limit
        upper: i64,
    },
    /// Allowed category labels
    Categorical {
        /// Non-empty label set
        values: BTreeSet<String>,
    },
    /// Allowed boolean values
    Boolean {
        /// Non-empty subset of {false, true}
        values: BTreeSet<bool>,
    },
}

/// Real limits in JSON/YAML: infinities are written as `"inf"` / `"-inf"`.
mod limit {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub(super) fn serialize<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() {
            s.serialize_str(if *value > 0.0 { "inf" } else { "-inf" })
        } else {
            s.serialize_f64(*value)
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(t) => match t.as_str() {
                "inf" | "+inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::custom(format!("invalid limit '{other}'"))),
            },
        }
    }
}

/// Immutable constraint over one named parameter.
///
/// Deserialized bounds pass the same checks as [`Bounds::from_domain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds")]
pub struct Bounds {
    name: String,
    domain: Domain,
    nullable: bool,
}

#[derive(Deserialize)]
struct RawBounds {
    name: String,
    domain: Domain,
    #[serde(default)]
    nullable: bool,
}

impl TryFrom<RawBounds> for Bounds {
    type Error = Error;

    fn try_from(raw: RawBounds) -> Result<Self> {
        Ok(Self::from_domain(raw.name, raw.domain)?.with_nullable(raw.nullable))
    }
}

impl Bounds {
    /// Open bounds: every value passes, including a missing one.
    #[must_use]
    pub fn unrestricted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Unrestricted,
            nullable: true,
        }
    }

    /// Inclusive real range `[lower, upper]`. Either end may be infinite.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if a limit is NaN or `lower > upper`.
    pub fn continuous(name: impl Into<String>, lower: f64, upper: f64) -> Result<Self> {
        Self::from_domain(
            name,
            Domain::Continuous {
                lower,
                upper,
                upper_exclusive: false,
            },
        )
    }

    /// Half-open real range `[lower, upper)`.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if a limit is NaN or the range is empty.
    pub fn continuous_exclusive(name: impl Into<String>, lower: f64, upper: f64) -> Result<Self> {
        Self::from_domain(
            name,
            Domain::Continuous {
                lower,
                upper,
                upper_exclusive: true,
            },
        )
    }

    /// Inclusive integer range `[lower, upper]`.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if `lower > upper`.
    pub fn discrete(name: impl Into<String>, lower: i64, upper: i64) -> Result<Self> {
        Self::from_domain(name, Domain::Discrete { lower, upper })
    }

    /// Allowed category labels.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if no label is given.
    pub fn categorical<I, S>(name: impl Into<String>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_domain(
            name,
            Domain::Categorical {
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Allowed boolean values.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if no value is given.
    pub fn boolean(name: impl Into<String>, values: impl IntoIterator<Item = bool>) -> Result<Self> {
        Self::from_domain(
            name,
            Domain::Boolean {
                values: values.into_iter().collect(),
            },
        )
    }

    /// Bounds admitting exactly one value (used for constants).
    ///
    /// # Errors
    ///
    /// `ScopeFormat` for a NaN real.
    pub fn point(name: impl Into<String>, value: &Value) -> Result<Self> {
        let domain = match value {
            Value::Float(v) => Domain::Continuous {
                lower: *v,
                upper: *v,
                upper_exclusive: false,
            },
            Value::Int(v) => Domain::Discrete {
                lower: *v,
                upper: *v,
            },
            Value::Str(s) => Domain::Categorical {
                values: BTreeSet::from([s.clone()]),
            },
            Value::Bool(b) => Domain::Boolean {
                values: BTreeSet::from([*b]),
            },
        };
        Self::from_domain(name, domain)
    }

    /// Validate and wrap a raw domain.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if the domain is empty or malformed.
    pub fn from_domain(name: impl Into<String>, domain: Domain) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::format("bounds must name a parameter"));
        }
        match &domain {
            Domain::Unrestricted => {}
            Domain::Continuous {
                lower,
                upper,
                upper_exclusive,
            } => {
                if lower.is_nan() || upper.is_nan() {
                    return Err(Error::format(format!("bounds for '{name}' contain NaN")));
                }
                if lower > upper || (*upper_exclusive && lower >= upper) {
                    return Err(Error::format(format!(
                        "bounds for '{name}' are empty: lower {lower} exceeds upper {upper}"
                    )));
                }
            }
            Domain::Discrete { lower, upper } => {
                if lower > upper {
                    return Err(Error::format(format!(
                        "bounds for '{name}' are empty: lower {lower} exceeds upper {upper}"
                    )));
                }
            }
            Domain::Categorical { values } => {
                if values.is_empty() {
                    return Err(Error::format(format!(
                        "categorical bounds for '{name}' allow no values"
                    )));
                }
            }
            Domain::Boolean { values } => {
                if values.is_empty() {
                    return Err(Error::format(format!(
                        "boolean bounds for '{name}' allow no values"
                    )));
                }
            }
        }
        let nullable = matches!(domain, Domain::Unrestricted);
        Ok(Self {
            name,
            domain,
            nullable,
        })
    }

    /// Return a copy that also admits a missing value.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Constrained parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw domain.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Whether a missing value passes.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Domain kind.
    #[must_use]
    pub const fn kind(&self) -> BoundsKind {
        match self.domain {
            Domain::Unrestricted => BoundsKind::Unrestricted,
            Domain::Continuous { .. } => BoundsKind::Continuous,
            Domain::Discrete { .. } => BoundsKind::Discrete,
            Domain::Categorical { .. } => BoundsKind::Categorical,
            Domain::Boolean { .. } => BoundsKind::Boolean,
        }
    }

    /// Whether this is the open constraint.
    #[must_use]
    pub const fn is_unrestricted(&self) -> bool {
        matches!(self.domain, Domain::Unrestricted)
    }

    /// Numeric limits as reals, if the domain is a range.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn numeric_range(&self) -> Option<(f64, f64)> {
        match self.domain {
            Domain::Continuous { lower, upper, .. } => Some((lower, upper)),
            Domain::Discrete { lower, upper } => Some((lower as f64, upper as f64)),
            _ => None,
        }
    }

    /// Membership of a concrete value.
    ///
    /// Continuous bounds accept integers; discrete bounds accept integral reals.
    #[must_use]
    pub fn contains_value(&self, value: &Value) -> bool {
        match &self.domain {
            Domain::Unrestricted => true,
            Domain::Continuous {
                lower,
                upper,
                upper_exclusive,
            } => value.as_f64().is_some_and(|x| {
                x >= *lower && if *upper_exclusive { x < *upper } else { x <= *upper }
            }),
            Domain::Discrete { lower, upper } => {
                value.as_i64().is_some_and(|n| n >= *lower && n <= *upper)
            }
            Domain::Categorical { values } => value.as_str().is_some_and(|s| values.contains(s)),
            Domain::Boolean { values } => value.as_bool().is_some_and(|b| values.contains(&b)),
        }
    }

    /// Membership of a possibly missing value.
    #[must_use]
    pub fn admits(&self, value: Option<&Value>) -> bool {
        value.map_or(self.nullable, |v| self.contains_value(v))
    }

    /// Intersect two constraints on the same parameter.
    ///
    /// `Ok(None)` means the ranges do not overlap; scenario discovery tries
    /// disjoint boxes routinely, so this is a normal outcome.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if the bounds name different parameters or have
    /// inconsistent kinds.
    pub fn intersect(&self, other: &Self) -> Result<Option<Self>> {
        if self.name != other.name {
            return Err(Error::format(format!(
                "cannot intersect bounds on different parameters '{}' and '{}'",
                self.name, other.name
            )));
        }
        let nullable = self.nullable && other.nullable;
        let domain = match (&self.domain, &other.domain) {
            (Domain::Unrestricted, d) | (d, Domain::Unrestricted) => Some(d.clone()),
            (
                Domain::Continuous {
                    lower: l1,
                    upper: u1,
                    upper_exclusive: x1,
                },
                Domain::Continuous {
                    lower: l2,
                    upper: u2,
                    upper_exclusive: x2,
                },
            ) => {
                let lower = l1.max(*l2);
                let (upper, upper_exclusive) = if u1 < u2 {
                    (*u1, *x1)
                } else if u2 < u1 {
                    (*u2, *x2)
                } else {
                    (*u1, *x1 || *x2)
                };
                let empty = lower > upper || (upper_exclusive && lower >= upper);
                (!empty).then_some(Domain::Continuous {
                    lower,
                    upper,
                    upper_exclusive,
                })
            }
            (
                Domain::Discrete {
                    lower: l1,
                    upper: u1,
                },
                Domain::Discrete {
                    lower: l2,
                    upper: u2,
                },
            ) => {
                let lower = *l1.max(l2);
                let upper = *u1.min(u2);
                (lower <= upper).then_some(Domain::Discrete { lower, upper })
            }
            (Domain::Categorical { values: a }, Domain::Categorical { values: b }) => {
                let values: BTreeSet<String> = a.intersection(b).cloned().collect();
                (!values.is_empty()).then_some(Domain::Categorical { values })
            }
            (Domain::Boolean { values: a }, Domain::Boolean { values: b }) => {
                let values: BTreeSet<bool> = a.intersection(b).copied().collect();
                (!values.is_empty()).then_some(Domain::Boolean { values })
            }
            _ => {
                return Err(Error::format(format!(
                    "inconsistent bounds kinds for '{}': {} vs {}",
                    self.name,
                    self.kind(),
                    other.kind()
                )))
            }
        };
        Ok(domain.map(|domain| Self {
            name: self.name.clone(),
            domain,
            nullable,
        }))
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Domain::Unrestricted => write!(f, "{}: *", self.name),
            Domain::Continuous {
                lower,
                upper,
                upper_exclusive,
            } => {
                let close = if *upper_exclusive { ')' } else { ']' };
                write!(f, "{}: [{lower}, {upper}{close}", self.name)
            }
            Domain::Discrete { lower, upper } => write!(f, "{}: [{lower}..={upper}]", self.name),
            Domain::Categorical { values } => write!(f, "{}: {values:?}", self.name),
            Domain::Boolean { values } => write!(f, "{}: {values:?}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuous_rejects_inverted_range() {
        let err = Bounds::continuous("x", 5.0, 1.0).unwrap_err();
        assert!(err.is_scope_error());
        assert!(err.to_string().contains("empty"));
        assert!(Bounds::continuous("x", f64::NAN, 1.0).is_err());
        assert!(Bounds::continuous_exclusive("x", 1.0, 1.0).is_err());
        assert!(Bounds::continuous("x", 1.0, 1.0).is_ok());
    }

    #[test]
    fn test_categorical_requires_values() {
        let empty: Vec<String> = Vec::new();
        assert!(Bounds::categorical("y", empty).is_err());
        assert!(Bounds::boolean("b", []).is_err());
    }

    #[test]
    fn test_inclusive_upper_boundary() {
        let b = Bounds::continuous("x", 0.0, 5.0).unwrap();
        assert!(b.contains_value(&Value::Float(5.0)));
        assert!(b.contains_value(&Value::Float(0.0)));
        assert!(b.contains_value(&Value::Int(3)));
        assert!(!b.contains_value(&Value::Float(5.000_001)));
        assert!(!b.contains_value(&Value::from("5")));
    }

    #[test]
    fn test_exclusive_upper_boundary() {
        let b = Bounds::continuous_exclusive("x", 0.0, 5.0).unwrap();
        assert!(!b.contains_value(&Value::Float(5.0)));
        assert!(b.contains_value(&Value::Float(4.999)));
    }

    #[test]
    fn test_discrete_accepts_integral_reals() {
        let b = Bounds::discrete("n", 1, 4).unwrap();
        assert!(b.contains_value(&Value::Int(4)));
        assert!(b.contains_value(&Value::Float(2.0)));
        assert!(!b.contains_value(&Value::Float(2.5)));
        assert!(!b.contains_value(&Value::Int(5)));
    }

    #[test]
    fn test_intersect_numeric() {
        let a = Bounds::continuous("x", 0.0, 6.0).unwrap();
        let b = Bounds::continuous("x", 4.0, 10.0).unwrap();
        let c = a.intersect(&b).unwrap().unwrap();
        assert_eq!(c.numeric_range(), Some((4.0, 6.0)));
    }

    #[test]
    fn test_intersect_touching_inclusive_ranges_share_edge() {
        let a = Bounds::continuous("x", 0.0, 5.0).unwrap();
        let b = Bounds::continuous("x", 5.0, 10.0).unwrap();
        let c = a.intersect(&b).unwrap().unwrap();
        assert!(c.contains_value(&Value::Float(5.0)));
    }

    #[test]
    fn test_intersect_touching_exclusive_range_is_disjoint() {
        let a = Bounds::continuous_exclusive("x", 0.0, 5.0).unwrap();
        let b = Bounds::continuous("x", 5.0, 10.0).unwrap();
        assert!(a.intersect(&b).unwrap().is_none());
        assert!(b.intersect(&a).unwrap().is_none());
    }

    #[test]
    fn test_intersect_disjoint_is_not_an_error() {
        let a = Bounds::discrete("n", 0, 2).unwrap();
        let b = Bounds::discrete("n", 3, 9).unwrap();
        assert!(a.intersect(&b).unwrap().is_none());

        let c = Bounds::categorical("y", ["lo"]).unwrap();
        let d = Bounds::categorical("y", ["hi"]).unwrap();
        assert!(c.intersect(&d).unwrap().is_none());
    }

    #[test]
    fn test_intersect_categorical_sets() {
        let a = Bounds::categorical("y", ["lo", "mid"]).unwrap();
        let b = Bounds::categorical("y", ["mid", "hi"]).unwrap();
        let c = a.intersect(&b).unwrap().unwrap();
        assert!(c.contains_value(&Value::from("mid")));
        assert!(!c.contains_value(&Value::from("lo")));
    }

    #[test]
    fn test_intersect_unrestricted_is_identity() {
        let a = Bounds::continuous("x", 1.0, 2.0).unwrap();
        let open = Bounds::unrestricted("x");
        assert_eq!(a.intersect(&open).unwrap(), Some(a.clone()));
        assert_eq!(open.intersect(&a).unwrap(), Some(a));
    }

    #[test]
    fn test_intersect_kind_mismatch_is_format_error() {
        let a = Bounds::continuous("x", 0.0, 1.0).unwrap();
        let b = Bounds::categorical("x", ["lo"]).unwrap();
        assert!(matches!(a.intersect(&b), Err(Error::ScopeFormat(_))));
    }

    #[test]
    fn test_intersect_different_names_fails() {
        let a = Bounds::continuous("x", 0.0, 1.0).unwrap();
        let b = Bounds::continuous("z", 0.0, 1.0).unwrap();
        assert!(a.intersect(&b).is_err());
    }

    #[test]
    fn test_nullable_admits_missing() {
        let strict = Bounds::continuous("x", 0.0, 1.0).unwrap();
        assert!(!strict.admits(None));
        let lax = strict.clone().with_nullable(true);
        assert!(lax.admits(None));
        assert!(!strict.intersect(&lax).unwrap().unwrap().is_nullable());
    }

    #[test]
    fn test_point_bounds() {
        let b = Bounds::point("c", &Value::Float(2.5)).unwrap();
        assert_eq!(b.kind(), BoundsKind::Continuous);
        assert!(b.contains_value(&Value::Float(2.5)));
        assert!(!b.contains_value(&Value::Float(2.6)));
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = Bounds::categorical("y", ["lo", "hi"]).unwrap();
        let json = serde_json::to_string(&b).unwrap();
        let back: Bounds = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
    }

    #[test]
    fn test_deserialize_rejects_malformed_bounds() {
        for json in [
            r#"{"name":"x","domain":{"kind":"continuous","lower":5.0,"upper":1.0}}"#,
            r#"{"name":"x","domain":{"kind":"continuous","lower":1.0,"upper":1.0,"upper_exclusive":true}}"#,
            r#"{"name":"n","domain":{"kind":"discrete","lower":4,"upper":2}}"#,
            r#"{"name":"y","domain":{"kind":"categorical","values":[]}}"#,
            r#"{"name":"f","domain":{"kind":"boolean","values":[]}}"#,
            r#"{"name":"","domain":{"kind":"unrestricted"}}"#,
        ] {
            let err = serde_json::from_str::<Bounds>(json).unwrap_err();
            assert!(err.to_string().contains("Scope format error"), "{json}: {err}");
        }
    }

    #[test]
    fn test_infinite_limits_survive_json() {
        let b = Bounds::continuous("x", f64::NEG_INFINITY, 3.0).unwrap();
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"-inf\""), "{json}");
        let back: Bounds = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
    }
}
