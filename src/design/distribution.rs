//! Frozen per-parameter sampling distributions

use rand::distributions::{Distribution as _, WeightedIndex};
use rand::Rng;
use rand_distr::Triangular;

use crate::bounds::Domain;
use crate::scope::{Distribution, Parameter, ParameterRole};
use crate::value::Value;
use crate::{Error, Result};

/// A parameter distribution bound to concrete limits, ready to draw from.
#[derive(Debug, Clone)]
pub(crate) enum Frozen {
    /// Always the same value (constants, degenerate domains)
    Fixed(Value),
    Uniform {
        lower: f64,
        upper: f64,
    },
    Triangle {
        lower: f64,
        peak: f64,
        upper: f64,
        dist: Triangular<f64>,
    },
    Integer {
        lower: i64,
        upper: i64,
    },
    Choice {
        labels: Vec<Value>,
        cumulative: Vec<f64>,
        index: WeightedIndex<f64>,
    },
}

impl Frozen {
    /// Freeze the declared distribution of `parameter` over its domain.
    pub(crate) fn freeze(parameter: &Parameter) -> Result<Self> {
        if parameter.role() == ParameterRole::Constant {
            return Ok(Self::Fixed(parameter.default_value().clone()));
        }
        let name = parameter.name();
        let declared = parameter.distribution().unwrap_or(&Distribution::Uniform);
        let freeze_err = |message: String| Error::DistributionFreeze {
            parameter: name.to_string(),
            message,
        };
        let type_err = |message: String| Error::DistributionType {
            parameter: name.to_string(),
            message,
        };

        match parameter.domain().domain() {
            Domain::Unrestricted => Err(freeze_err("cannot sample an unrestricted domain".into())),
            Domain::Continuous { lower, upper, .. } => {
                let (lower, upper) = (*lower, *upper);
                if declared.is_categorical() {
                    return Err(type_err("weighted choice over a continuous domain".into()));
                }
                if !(lower.is_finite() && upper.is_finite()) {
                    return Err(freeze_err(format!("infinite range [{lower}, {upper}]")));
                }
                match declared {
                    Distribution::Triangle { peak } => {
                        let peak = *peak;
                        if !(lower..=upper).contains(&peak) {
                            return Err(freeze_err(format!(
                                "peak {peak} lies outside [{lower}, {upper}]"
                            )));
                        }
                        if lower == upper {
                            return Ok(Self::Fixed(Value::Float(lower)));
                        }
                        let dist = Triangular::new(lower, upper, peak)
                            .map_err(|e| freeze_err(e.to_string()))?;
                        Ok(Self::Triangle {
                            lower,
                            peak,
                            upper,
                            dist,
                        })
                    }
                    _ if lower == upper => Ok(Self::Fixed(Value::Float(lower))),
                    _ => Ok(Self::Uniform { lower, upper }),
                }
            }
            Domain::Discrete { lower, upper } => {
                if !matches!(declared, Distribution::Uniform) {
                    return Err(type_err(
                        "only uniform sampling applies to an integer domain".into(),
                    ));
                }
                if lower == upper {
                    return Ok(Self::Fixed(Value::Int(*lower)));
                }
                Ok(Self::Integer {
                    lower: *lower,
                    upper: *upper,
                })
            }
            Domain::Categorical { values } => {
                let labels = values.iter().cloned().map(Value::Str).collect();
                Self::choice(labels, declared, &freeze_err, &type_err)
            }
            Domain::Boolean { values } => {
                let labels = values.iter().copied().map(Value::Bool).collect();
                Self::choice(labels, declared, &freeze_err, &type_err)
            }
        }
    }

    fn choice(
        labels: Vec<Value>,
        declared: &Distribution,
        freeze_err: &dyn Fn(String) -> Error,
        type_err: &dyn Fn(String) -> Error,
    ) -> Result<Self> {
        let weights = match declared {
            Distribution::Uniform => vec![1.0; labels.len()],
            Distribution::Weighted { weights } => {
                if weights.len() != labels.len() {
                    return Err(freeze_err(format!(
                        "{} weights for {} labels",
                        weights.len(),
                        labels.len()
                    )));
                }
                weights.clone()
            }
            Distribution::Triangle { .. } => {
                return Err(type_err("triangle distribution over a categorical domain".into()))
            }
        };
        let index = WeightedIndex::new(&weights).map_err(|e| freeze_err(e.to_string()))?;
        if labels.len() == 1 {
            return Ok(Self::Fixed(labels[0].clone()));
        }
        let total: f64 = weights.iter().sum();
        let cumulative = weights
            .iter()
            .scan(0.0, |acc, w| {
                *acc += w / total;
                Some(*acc)
            })
            .collect();
        Ok(Self::Choice {
            labels,
            cumulative,
            index,
        })
    }

    /// Independent random draw.
    pub(crate) fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        match self {
            Self::Fixed(v) => v.clone(),
            Self::Uniform { .. } | Self::Integer { .. } => self.ppf(rng.gen::<f64>()),
            Self::Triangle { dist, .. } => Value::Float(dist.sample(rng)),
            Self::Choice { labels, index, .. } => labels[index.sample(rng)].clone(),
        }
    }

    /// Inverse CDF at quantile `q` in `[0, 1)`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::suboptimal_flops
    )]
    pub(crate) fn ppf(&self, q: f64) -> Value {
        let q = q.clamp(0.0, 1.0);
        match self {
            Self::Fixed(v) => v.clone(),
            // convex combination: no overflow for ranges wider than f64::MAX
            Self::Uniform { lower, upper } => {
                Value::Float((lower * (1.0 - q) + upper * q).clamp(*lower, *upper))
            }
            Self::Triangle {
                lower, peak, upper, ..
            } => {
                let span = upper - lower;
                let split = (peak - lower) / span;
                let x = if q < split {
                    lower + (q * span * (peak - lower)).sqrt()
                } else {
                    upper - ((1.0 - q) * span * (upper - peak)).sqrt()
                };
                Value::Float(x)
            }
            Self::Integer { lower, upper } => {
                let (lower, upper) = (i128::from(*lower), i128::from(*upper));
                let count = (upper - lower + 1) as f64;
                let step = (q * count).floor() as i128;
                let value = (lower + step).min(upper);
                Value::Int(i64::try_from(value).unwrap_or(i64::MAX))
            }
            Self::Choice {
                labels, cumulative, ..
            } => {
                let i = cumulative
                    .iter()
                    .position(|c| q < *c)
                    .unwrap_or(labels.len() - 1);
                labels[i].clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn real(lower: f64, upper: f64) -> Parameter {
        Parameter::uncertainty("x", Bounds::continuous("x", lower, upper).unwrap(), lower)
    }

    #[test]
    fn test_uniform_ppf_spans_range() {
        let f = Frozen::freeze(&real(2.0, 4.0)).unwrap();
        assert_eq!(f.ppf(0.0), Value::Float(2.0));
        assert_eq!(f.ppf(0.5), Value::Float(3.0));
        assert_eq!(f.ppf(1.0), Value::Float(4.0));
    }

    #[test]
    fn test_triangle_ppf_mode_quantile() {
        let p = real(0.0, 10.0).with_distribution(Distribution::Triangle { peak: 2.0 });
        let f = Frozen::freeze(&p).unwrap();
        // CDF at the peak equals (peak - lower) / span
        let x = f.ppf(0.2).as_f64().unwrap();
        assert!((x - 2.0).abs() < 1e-9);
        assert_eq!(f.ppf(0.0), Value::Float(0.0));
    }

    #[test]
    fn test_triangle_peak_outside_range_fails_to_freeze() {
        let p = real(0.0, 1.0).with_distribution(Distribution::Triangle { peak: 3.0 });
        assert!(matches!(Frozen::freeze(&p), Err(Error::DistributionFreeze { .. })));
    }

    #[test]
    fn test_triangle_on_categorical_is_type_error() {
        let p = Parameter::lever("y", Bounds::categorical("y", ["a", "b"]).unwrap(), "a")
            .with_distribution(Distribution::Triangle { peak: 0.5 });
        assert!(matches!(Frozen::freeze(&p), Err(Error::DistributionType { .. })));
    }

    #[test]
    fn test_weighted_on_real_is_type_error() {
        let p = real(0.0, 1.0).with_distribution(Distribution::Weighted {
            weights: vec![1.0],
        });
        assert!(matches!(Frozen::freeze(&p), Err(Error::DistributionType { .. })));
    }

    #[test]
    fn test_weighted_length_mismatch() {
        let p = Parameter::lever("y", Bounds::categorical("y", ["a", "b"]).unwrap(), "a")
            .with_distribution(Distribution::Weighted {
                weights: vec![1.0, 2.0, 3.0],
            });
        assert!(matches!(Frozen::freeze(&p), Err(Error::DistributionFreeze { .. })));
    }

    #[test]
    fn test_weighted_choice_ppf() {
        let p = Parameter::lever("y", Bounds::categorical("y", ["a", "b"]).unwrap(), "a")
            .with_distribution(Distribution::Weighted {
                weights: vec![3.0, 1.0],
            });
        let f = Frozen::freeze(&p).unwrap();
        assert_eq!(f.ppf(0.7), Value::from("a"));
        assert_eq!(f.ppf(0.8), Value::from("b"));
    }

    #[test]
    fn test_full_width_ranges_do_not_overflow() {
        let wide = Parameter::uncertainty("n", Bounds::discrete("n", i64::MIN, i64::MAX).unwrap(), 0);
        let frozen = Frozen::freeze(&wide).unwrap();
        assert_eq!(frozen.ppf(0.0), Value::Int(i64::MIN));
        assert_eq!(frozen.ppf(1.0), Value::Int(i64::MAX));
        assert!(matches!(frozen.ppf(0.5), Value::Int(_)));

        let widest = Parameter::uncertainty(
            "x",
            Bounds::continuous("x", -f64::MAX, f64::MAX).unwrap(),
            0.0,
        );
        let frozen = Frozen::freeze(&widest).unwrap();
        for q in [0.0, 0.25, 0.5, 1.0] {
            let x = frozen.ppf(q).as_f64().unwrap();
            assert!(x.is_finite(), "q={q}: {x}");
        }
    }

    #[test]
    fn test_integer_ppf_covers_every_value() {
        let p = Parameter::uncertainty("n", Bounds::discrete("n", 1, 4).unwrap(), 1);
        let f = Frozen::freeze(&p).unwrap();
        let got: Vec<_> = [0.0, 0.3, 0.6, 0.9, 1.0].iter().map(|q| f.ppf(*q)).collect();
        assert_eq!(
            got,
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4), Value::Int(4)]
        );
    }

    #[test]
    fn test_unrestricted_and_infinite_fail() {
        let p = Parameter::uncertainty("u", Bounds::unrestricted("u"), 0.0);
        assert!(matches!(Frozen::freeze(&p), Err(Error::DistributionFreeze { .. })));
        let p = Parameter::uncertainty(
            "x",
            Bounds::continuous("x", 0.0, f64::INFINITY).unwrap(),
            0.0,
        );
        assert!(matches!(Frozen::freeze(&p), Err(Error::DistributionFreeze { .. })));
    }

    #[test]
    fn test_samples_stay_in_domain() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = real(-1.0, 1.0).with_distribution(Distribution::Triangle { peak: 0.5 });
        let f = Frozen::freeze(&p).unwrap();
        for _ in 0..200 {
            let v = f.sample(&mut rng);
            assert!(p.domain().contains_value(&v));
        }
    }

    #[test]
    fn test_constant_and_degenerate_are_fixed() {
        let c = Parameter::constant("c", 2.5).unwrap();
        assert!(matches!(Frozen::freeze(&c).unwrap(), Frozen::Fixed(Value::Float(_))));
        assert!(matches!(Frozen::freeze(&real(1.0, 1.0)).unwrap(), Frozen::Fixed(_)));
    }
}
