//! Core model adapters
//!
//! A core model turns one parameter assignment into measures. Adapters are
//! interchangeable behind [`CoreModel`]:
//!
//! - [`FunctionModel`]: an in-process closure
//! - [`ProcessModel`]: an external program speaking JSON over stdin/stdout
//! - [`SurrogateModel`]: a nearest-neighbour meta-model fit on completed
//!   experiments
//!
//! [`run_pending`] drains the pending experiments of a design through any of
//! them.

mod process;
mod runner;
mod surrogate;

pub use process::ProcessModel;
pub use runner::{run_pending, RunSummary};
pub use surrogate::{SurrogateModel, DEFAULT_NEIGHBORS};

use std::fmt;

use crate::value::{Assignment, Measures};
use crate::{Error, Result};

/// `run(assignment) -> measures` capability.
///
/// Implementations are shared across runner threads.
pub trait CoreModel: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Evaluate one assignment.
    ///
    /// # Errors
    ///
    /// `Model` when the evaluation fails; the runner records the message as
    /// the experiment's failure cause.
    fn run(&self, assignment: &Assignment) -> Result<Measures>;
}

type ModelFn = dyn Fn(&Assignment) -> anyhow::Result<Measures> + Send + Sync;

/// Model backed by a closure.
///
/// # Example
///
/// ```rust
/// use trueno_ema::model::{CoreModel, FunctionModel};
/// use trueno_ema::value::{assignment, measures};
///
/// let model = FunctionModel::new("square", |a| {
///     let x = a.get("x").and_then(|v| v.as_f64()).ok_or_else(|| anyhow::anyhow!("x missing"))?;
///     Ok(measures([("y", x * x)]))
/// });
/// let out = model.run(&assignment([("x", 3.0.into())]))?;
/// assert_eq!(out["y"], 9.0);
/// # Ok::<(), trueno_ema::Error>(())
/// ```
pub struct FunctionModel {
    name: String,
    function: Box<ModelFn>,
}

impl FunctionModel {
    /// Wrap `function` under `name`.
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Assignment) -> anyhow::Result<Measures> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            function: Box::new(function),
        }
    }
}

impl fmt::Debug for FunctionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionModel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CoreModel for FunctionModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, assignment: &Assignment) -> Result<Measures> {
        (self.function)(assignment).map_err(|e| Error::Model(format!("{}: {e:#}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{assignment, measures};
    use anyhow::Context;

    #[test]
    fn test_function_model_runs_closure() {
        let model = FunctionModel::new("sum", |a: &Assignment| {
            let total = a.values().filter_map(crate::value::Value::as_f64).sum();
            Ok(measures([("total", total)]))
        });
        let out = model
            .run(&assignment([("a", 1.0.into()), ("b", 2.5.into())]))
            .unwrap();
        assert_eq!(out["total"], 3.5);
        assert_eq!(model.name(), "sum");
    }

    #[test]
    fn test_function_model_flattens_error_chain() {
        let model = FunctionModel::new("fragile", |_: &Assignment| {
            Err(anyhow::anyhow!("division by zero")).context("evaluating cost")
        });
        let err = model.run(&Assignment::new()).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::Model(_)));
        assert!(msg.contains("fragile"), "{msg}");
        assert!(msg.contains("evaluating cost"), "{msg}");
        assert!(msg.contains("division by zero"), "{msg}");
    }

    #[test]
    fn test_models_are_object_safe() {
        let models: Vec<Box<dyn CoreModel>> = vec![Box::new(FunctionModel::new("m", |_: &Assignment| {
            Ok(Measures::new())
        }))];
        assert_eq!(models[0].name(), "m");
    }
}
