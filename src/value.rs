//! Parameter values and assignments
//!
//! A [`Value`] is one concrete parameter setting. An [`Assignment`] maps every
//! parameter name of a scope to its value; it is ordered so identical
//! assignments serialize and hash identically.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Full parameter assignment (parameter name -> value).
pub type Assignment = BTreeMap<String, Value>;

/// Measure values returned by a core model (measure name -> value).
pub type Measures = BTreeMap<String, f64>;

/// Concrete value of one parameter.
///
/// Serialized untagged, so `true`, `3`, `3.5` and `"lo"` round-trip through
/// JSON and YAML as the matching variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean switch
    Bool(bool),
    /// Integer (discrete) value
    Int(i64),
    /// Real (continuous) value
    Float(f64),
    /// Category label
    Str(String),
}

impl Value {
    /// Numeric view: reals as-is, integers widened.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view: integers as-is, integral finite reals narrowed.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v)
                if v.is_finite()
                    && v.fract() == 0.0
                    && *v >= i64::MIN as f64
                    && *v <= i64::MAX as f64 =>
            {
                Some(*v as i64)
            }
            _ => None,
        }
    }

    /// Category label view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "real",
            Self::Str(_) => "str",
        }
    }

    /// Unambiguous text form used for identity keys.
    ///
    /// Reals are encoded by bit pattern (with `-0.0` folded into `0.0`) so two
    /// assignments share a key only if their values are exactly equal.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Bool(b) => format!("b:{b}"),
            Self::Int(i) => format!("i:{i}"),
            Self::Float(f) => {
                let f = if *f == 0.0 { 0.0 } else { *f };
                format!("f:{:016x}", f.to_bits())
            }
            Self::Str(s) => format!("s{}:{s}", s.len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Build an [`Assignment`] from `(name, value)` pairs.
///
/// ```rust
/// use trueno_ema::value::{assignment, Value};
///
/// let point = assignment([("x", 3.0.into()), ("y", "lo".into())]);
/// assert_eq!(point["y"], Value::from("lo"));
/// ```
pub fn assignment<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Assignment {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Build [`Measures`] from `(name, value)` pairs.
pub fn measures<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Measures {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Identity key of an assignment (name-length prefixed, canonical values).
pub(crate) fn assignment_key(assignment: &Assignment) -> String {
    let mut key = String::new();
    for (name, value) in assignment {
        key.push_str(&format!("{}:{name}={};", name.len(), value.canonical()));
    }
    key
}

/// Serde adapter for [`Measures`] in JSON: `NaN` is written as `null`,
/// infinities as `"inf"` / `"-inf"`.
pub(crate) mod measures_json {
    use std::collections::BTreeMap;

    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    use super::Measures;

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    /// `None` for NaN.
    fn repr(v: f64) -> Option<Repr> {
        if v.is_nan() {
            None
        } else if v.is_infinite() {
            Some(Repr::Text(if v > 0.0 { "inf" } else { "-inf" }.to_string()))
        } else {
            Some(Repr::Number(v))
        }
    }

    pub(crate) fn serialize<S: Serializer>(measures: &Measures, s: S) -> Result<S::Ok, S::Error> {
        measures
            .iter()
            .map(|(k, v)| (k, repr(*v)))
            .collect::<BTreeMap<_, _>>()
            .serialize(s)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Measures, D::Error> {
        BTreeMap::<String, Option<Repr>>::deserialize(d)?
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    Some(Repr::Number(v)) => v,
                    None => f64::NAN,
                    Some(Repr::Text(t)) => match t.as_str() {
                        "inf" | "+inf" => f64::INFINITY,
                        "-inf" => f64::NEG_INFINITY,
                        other => {
                            return Err(de::Error::custom(format!(
                                "invalid measure value '{other}' for '{k}'"
                            )))
                        }
                    },
                };
                Ok((k, value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(4.0).as_i64(), Some(4));
        assert_eq!(Value::Float(4.5).as_i64(), None);
        assert_eq!(Value::from("a").as_f64(), None);
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
    }

    #[test]
    fn test_untagged_json_roundtrip_keeps_variant() {
        let point = assignment([
            ("a", Value::Bool(false)),
            ("b", Value::Int(7)),
            ("c", Value::Float(3.0)),
            ("d", Value::from("hi")),
        ]);
        let json = serde_json::to_string(&point).unwrap();
        let back: Assignment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn test_canonical_distinguishes_kinds() {
        assert_ne!(Value::Int(1).canonical(), Value::Float(1.0).canonical());
        assert_eq!(Value::Float(-0.0).canonical(), Value::Float(0.0).canonical());
    }

    #[test]
    fn test_assignment_key_is_order_independent() {
        let a = assignment([("x", 1.0.into()), ("y", "lo".into())]);
        let b = assignment([("y", "lo".into()), ("x", 1.0.into())]);
        assert_eq!(assignment_key(&a), assignment_key(&b));

        let c = assignment([("x", 1.5.into()), ("y", "lo".into())]);
        assert_ne!(assignment_key(&a), assignment_key(&c));
    }

    #[test]
    fn test_measures_json_keeps_nan_as_null() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper(#[serde(with = "measures_json")] Measures);

        let json = serde_json::to_string(&Wrapper(measures([("a", 1.5), ("b", f64::NAN)]))).unwrap();
        assert_eq!(json, r#"{"a":1.5,"b":null}"#);
        let Wrapper(back) = serde_json::from_str(&json).unwrap();
        assert!((back["a"] - 1.5).abs() < f64::EPSILON);
        assert!(back["b"].is_nan());
    }

    #[test]
    fn test_measures_json_keeps_infinities() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper(#[serde(with = "measures_json")] Measures);

        let original = measures([("hi", f64::INFINITY), ("lo", f64::NEG_INFINITY)]);
        let json = serde_json::to_string(&Wrapper(original.clone())).unwrap();
        assert_eq!(json, r#"{"hi":"inf","lo":"-inf"}"#);
        let Wrapper(back) = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);

        assert!(serde_json::from_str::<Wrapper>(r#"{"a":"lots"}"#).is_err());
    }
}
