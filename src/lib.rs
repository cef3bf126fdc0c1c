//! # Trueno-EMA: Exploratory Modeling Core
//!
//! **Version**: 0.1.0
//!
//! Trueno-EMA runs a simulation model across sampled combinations of uncertain
//! inputs and policy levers, keeps a journaled record of every experiment, and
//! scores boxes of the input space against the outcomes (scenario discovery).
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: an assignment is reserved at most once per design;
//!   status transitions are guarded (pending -> complete | failed)
//! - **Jidoka**: malformed scopes, boxes and distributions fail at
//!   construction, before any model run
//! - **Genchi Genbutsu**: every transition is journaled before it is visible;
//!   reopening a store resumes exactly where it stopped
//!
//! ## Modules
//!
//! - [`bounds`], [`boxes`]: per-dimension constraints and box algebra
//! - [`scope`]: parameters, measures, correlations; YAML scope files
//! - [`design`]: Monte Carlo and Latin hypercube sampling designs
//! - [`experiment`]: the experiment store, journal and Parquet archive
//! - [`model`]: core model adapters and the pending-experiment runner
//! - [`discovery`]: coverage, density and mass of boxes
//!
//! ## Example Usage
//!
//! ```rust
//! use trueno_ema::bounds::Bounds;
//! use trueno_ema::design::DesignBuilder;
//! use trueno_ema::experiment::ExperimentStore;
//! use trueno_ema::model::{run_pending, FunctionModel};
//! use trueno_ema::scope::{Measure, Parameter, Scope};
//! use trueno_ema::value::measures;
//!
//! let scope = Scope::new("road_test")
//!     .with(Parameter::uncertainty("x", Bounds::continuous("x", 0.0, 10.0)?, 5.0))?
//!     .with(Measure::new("cost"))?;
//!
//! let design = DesignBuilder::new(&scope, "lhs").samples(20).seed(7).build()?;
//! let store = ExperimentStore::in_memory();
//! store.reserve(&scope, design.name(), design.assignments())?;
//!
//! let model = FunctionModel::new("double", |a| {
//!     let x = a["x"].as_f64().unwrap_or_default();
//!     Ok(measures([("cost", 2.0 * x)]))
//! });
//! let summary = run_pending(&store, &scope, "lhs", &model)?;
//! assert_eq!(summary.completed, 20);
//! # Ok::<(), trueno_ema::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod bounds;
pub mod boxes;
pub mod design;
pub mod discovery;
pub mod error;
pub mod experiment;
pub mod model;
pub mod scope;
pub mod storage;
pub mod value;

pub use error::{Error, Result};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
