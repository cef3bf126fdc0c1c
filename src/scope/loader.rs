//! YAML scope files
//!
//! ```yaml
//! scope:
//!   name: road_test
//!   desc: optional text
//! inputs:
//!   x: {ptype: uncertainty, dtype: real, min: 0, max: 10, default: 5,
//!       dist: {name: triangle, peak: 3}, corr: {z: 0.3}}
//!   y: {ptype: lever, dtype: cat, values: [lo, hi], default: lo}
//!   c: {ptype: constant, value: 2.5}
//! outputs:
//!   cost: {kind: minimize, transform: ln}
//! ```

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use super::{Distribution, Measure, MeasureKind, MeasureType, Parameter, Scope, Transform};
use crate::bounds::Bounds;
use crate::value::Value;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScopeFile {
    scope: ScopeHeader,
    #[serde(default)]
    inputs: IndexMap<String, InputSpec>,
    #[serde(default)]
    outputs: IndexMap<String, OutputSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScopeHeader {
    name: String,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputSpec {
    ptype: String,
    #[serde(default)]
    dtype: Option<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    values: Option<Vec<String>>,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    dist: Option<Distribution>,
    #[serde(default)]
    corr: IndexMap<String, f64>,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputSpec {
    #[serde(default)]
    kind: MeasureKind,
    #[serde(default)]
    dtype: MeasureType,
    #[serde(default)]
    transform: Option<Transform>,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Uncertainty,
    Lever,
    Constant,
}

impl Scope {
    /// Parse a YAML scope document.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` for malformed documents or declarations,
    /// `AsymmetricCorrelation` when both sides of a pair declare different
    /// correlations.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ScopeFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::format(format!("invalid scope file: {e}")))?;

        let mut scope = Self::new(file.scope.name).with_description(file.scope.desc);
        for (name, spec) in &file.inputs {
            scope.declare(build_parameter(name, spec)?)?;
        }
        for (name, spec) in file.outputs {
            let mut measure = Measure::new(name)
                .with_kind(spec.kind)
                .with_type(spec.dtype)
                .with_description(spec.desc);
            if let Some(t) = spec.transform {
                measure = measure.with_transform(t);
            }
            scope.declare(measure)?;
        }
        for (name, spec) in &file.inputs {
            for (other, rho) in &spec.corr {
                scope.correlate(name, other, *rho).map_err(|e| match e {
                    Error::Scope(msg) => Error::ScopeFormat(msg),
                    other => other,
                })?;
            }
        }
        debug!(
            scope = scope.name(),
            parameters = scope.parameters().len(),
            measures = scope.measures().len(),
            "loaded scope definition"
        );
        Ok(scope)
    }

    /// Read and parse a YAML scope file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as [`Scope::from_yaml_str`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }
}

fn parse_role(name: &str, ptype: &str) -> Result<Role> {
    match ptype.trim().to_ascii_lowercase().as_str() {
        "uncertainty" | "exogenous uncertainty" => Ok(Role::Uncertainty),
        "lever" | "policy lever" => Ok(Role::Lever),
        "constant" => Ok(Role::Constant),
        other => Err(Error::format(format!(
            "input '{name}' has unknown ptype '{other}'"
        ))),
    }
}

fn build_parameter(name: &str, spec: &InputSpec) -> Result<Parameter> {
    let role = parse_role(name, &spec.ptype)?;
    let mut parameter = if role == Role::Constant {
        let value = spec.value.clone().or_else(|| spec.default.clone()).ok_or_else(|| {
            Error::format(format!("constant '{name}' needs a value"))
        })?;
        Parameter::constant(name, value)?
    } else {
        let (domain, fallback) = build_domain(name, spec)?;
        let default = spec.default.clone().unwrap_or(fallback);
        match role {
            Role::Lever => Parameter::lever(name, domain, default),
            _ => Parameter::uncertainty(name, domain, default),
        }
    };
    if let Some(dist) = &spec.dist {
        parameter = parameter.with_distribution(dist.clone());
    }
    if !spec.desc.is_empty() {
        parameter = parameter.with_description(spec.desc.clone());
    }
    Ok(parameter)
}

/// Domain plus the default used when the file gives none.
fn build_domain(name: &str, spec: &InputSpec) -> Result<(Bounds, Value)> {
    let dtype = spec.dtype.as_deref().map_or_else(
        || if spec.values.is_some() { "cat".to_string() } else { "real".to_string() },
        |d| d.trim().to_ascii_lowercase(),
    );
    match dtype.as_str() {
        "real" | "float" => {
            let (lo, hi) = numeric_limits(name, spec)?;
            Ok((Bounds::continuous(name, lo, hi)?, Value::Float(lo / 2.0 + hi / 2.0)))
        }
        "int" | "integer" => {
            let (lo, hi) = numeric_limits(name, spec)?;
            let (lo, hi) = (integral(name, lo)?, integral(name, hi)?);
            let mid = (i128::from(lo) + i128::from(hi)).div_euclid(2);
            Ok((Bounds::discrete(name, lo, hi)?, Value::Int(i64::try_from(mid).unwrap_or(lo))))
        }
        "cat" | "categorical" => {
            let values = spec.values.clone().ok_or_else(|| {
                Error::format(format!("categorical input '{name}' needs values"))
            })?;
            let first = values.first().cloned().ok_or_else(|| {
                Error::format(format!("categorical input '{name}' has no values"))
            })?;
            Ok((Bounds::categorical(name, values)?, Value::Str(first)))
        }
        "bool" | "boolean" => Ok((Bounds::boolean(name, [false, true])?, Value::Bool(false))),
        other => Err(Error::format(format!(
            "input '{name}' has unknown dtype '{other}'"
        ))),
    }
}

fn numeric_limits(name: &str, spec: &InputSpec) -> Result<(f64, f64)> {
    match (spec.min, spec.max) {
        (Some(lo), Some(hi)) => Ok((lo, hi)),
        _ => Err(Error::format(format!("input '{name}' needs both min and max"))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integral(name: &str, v: f64) -> Result<i64> {
    if v.is_finite() && v.fract() == 0.0 {
        Ok(v as i64)
    } else {
        Err(Error::format(format!(
            "integer input '{name}' has non-integral limit {v}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::BoundsKind;
    use crate::scope::ParameterRole;

    const ROAD_TEST: &str = r"
scope:
  name: road_test
  desc: toy model
inputs:
  x:
    ptype: exogenous uncertainty
    dtype: real
    min: 0
    max: 10
    default: 5
    dist: {name: triangle, peak: 3}
    corr: {z: 0.3}
  z:
    ptype: uncertainty
    min: 0
    max: 1
  n:
    ptype: uncertainty
    dtype: int
    min: 1
    max: 4
  y:
    ptype: policy lever
    values: [lo, hi]
  flag:
    ptype: lever
    dtype: bool
  c:
    ptype: constant
    value: 2.5
outputs:
  cost:
    kind: minimize
    transform: ln
  count:
    dtype: integer
";

    #[test]
    fn test_load_road_test() {
        let scope = Scope::from_yaml_str(ROAD_TEST).unwrap();
        assert_eq!(scope.name(), "road_test");
        assert_eq!(scope.description(), "toy model");
        let names: Vec<_> = scope.parameters().iter().map(Parameter::name).collect();
        assert_eq!(names, vec!["x", "z", "n", "y", "flag", "c"]);

        assert_eq!(scope.domain_of("n").unwrap().kind(), BoundsKind::Discrete);
        assert_eq!(scope.domain_of("y").unwrap().kind(), BoundsKind::Categorical);
        assert_eq!(scope.parameter("y").unwrap().role(), ParameterRole::Lever);
        assert_eq!(scope.parameter("y").unwrap().default_value(), &Value::from("lo"));
        assert_eq!(scope.parameter("z").unwrap().default_value(), &Value::Float(0.5));
        assert_eq!(scope.parameter("n").unwrap().default_value(), &Value::Int(2));
        assert_eq!(scope.parameter("c").unwrap().role(), ParameterRole::Constant);
        assert_eq!(
            scope.parameter("x").unwrap().distribution(),
            Some(&Distribution::Triangle { peak: 3.0 })
        );
        assert_eq!(scope.correlation("z", "x"), Some(0.3));
        assert_eq!(scope.measure("cost").unwrap().kind(), MeasureKind::Minimize);
        assert_eq!(scope.measure("count").unwrap().dtype(), MeasureType::Integer);
    }

    #[test]
    fn test_asymmetric_correlation_fails_at_load() {
        let yaml = r"
scope: {name: s}
inputs:
  a: {ptype: uncertainty, min: 0, max: 1, corr: {b: 0.3}}
  b: {ptype: uncertainty, min: 0, max: 1, corr: {a: 0.5}}
";
        let err = Scope::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::AsymmetricCorrelation { .. }));
    }

    #[test]
    fn test_symmetric_correlation_is_accepted() {
        let yaml = r"
scope: {name: s}
inputs:
  a: {ptype: uncertainty, min: 0, max: 1, corr: {b: 0.3}}
  b: {ptype: uncertainty, min: 0, max: 1, corr: {a: 0.3}}
";
        let scope = Scope::from_yaml_str(yaml).unwrap();
        assert_eq!(scope.correlations().len(), 1);
    }

    #[test]
    fn test_malformed_documents() {
        let cases = [
            "not: [valid",
            "scope: {name: s}\ninputs:\n  a: {ptype: wizard, min: 0, max: 1}",
            "scope: {name: s}\ninputs:\n  a: {ptype: uncertainty, min: 0}",
            "scope: {name: s}\ninputs:\n  a: {ptype: uncertainty, min: 2, max: 1}",
            "scope: {name: s}\ninputs:\n  a: {ptype: uncertainty, dtype: int, min: 0.5, max: 1}",
            "scope: {name: s}\ninputs:\n  a: {ptype: uncertainty, min: 0, max: 1, colour: red}",
            "scope: {name: s}\ninputs:\n  a: {ptype: uncertainty, min: 0, max: 1, corr: {zz: 0.1}}",
            "scope: {name: s}\ninputs:\n  a: {ptype: constant}",
            "scope: {name: s}\ninputs:\n  a: {ptype: lever, values: [x], default: y}",
        ];
        for yaml in cases {
            let err = Scope::from_yaml_str(yaml).unwrap_err();
            assert!(
                matches!(err, Error::ScopeFormat(_)),
                "expected ScopeFormat for {yaml:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.yaml");
        std::fs::write(&path, ROAD_TEST).unwrap();
        let scope = Scope::load(&path).unwrap();
        assert_eq!(scope.parameters().len(), 6);
        assert!(matches!(
            Scope::load(dir.path().join("missing.yaml")),
            Err(Error::Io(_))
        ));
    }
}
