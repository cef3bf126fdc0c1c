//! Experiment Record - one reserved parameter assignment and its outcome

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExperimentId;
use crate::value::{measures_json, Assignment, Measures, Value};
use crate::{Error, Result};

/// Lifecycle status of an experiment.
///
/// `Pending` is the only state with outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Reserved, not yet run
    Pending,
    /// Model returned measures
    Complete,
    /// Model failed; retry under a new design
    Failed,
}

impl ExperimentStatus {
    /// Whether the experiment has left pending.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
        })
    }
}

/// Experiment Record represents one parameter assignment of a design.
///
/// The assignment never changes after reservation; only status, measures,
/// failure cause and `finished_at` move, and only out of `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    experiment_id: ExperimentId,
    scope: String,
    design: String,
    assignment: Assignment,
    status: ExperimentStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_measures"
    )]
    measures: Option<Measures>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    reserved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
}

mod optional_measures {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{measures_json, Measures};

    #[derive(Serialize, Deserialize)]
    struct Wrapped(#[serde(with = "measures_json")] Measures);

    #[allow(clippy::ref_option)]
    pub(super) fn serialize<S: Serializer>(m: &Option<Measures>, s: S) -> Result<S::Ok, S::Error> {
        m.as_ref().map(|m| Wrapped(m.clone())).serialize(s)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Measures>, D::Error> {
        Ok(Option::<Wrapped>::deserialize(d)?.map(|w| w.0))
    }
}

impl ExperimentRecord {
    /// Create a pending record reserved now.
    ///
    /// # Arguments
    ///
    /// * `experiment_id` - Store-assigned id
    /// * `scope` - Name of the scope the assignment belongs to
    /// * `design` - Design (sampling batch) name
    /// * `assignment` - Normalized assignment
    #[must_use]
    pub fn new(
        experiment_id: ExperimentId,
        scope: impl Into<String>,
        design: impl Into<String>,
        assignment: Assignment,
    ) -> Self {
        Self {
            experiment_id,
            scope: scope.into(),
            design: design.into(),
            assignment,
            status: ExperimentStatus::Pending,
            measures: None,
            failure: None,
            reserved_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Create a builder for a record in any state (archive reads).
    #[must_use]
    pub fn builder(
        experiment_id: ExperimentId,
        scope: impl Into<String>,
        design: impl Into<String>,
        assignment: Assignment,
    ) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(experiment_id, scope, design, assignment)
    }

    /// Get the experiment ID.
    #[must_use]
    pub const fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    /// Get the scope name.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Get the design name.
    #[must_use]
    pub fn design(&self) -> &str {
        &self.design
    }

    /// Get the parameter assignment.
    #[must_use]
    pub const fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// Get one parameter value.
    #[must_use]
    pub fn value(&self, parameter: &str) -> Option<&Value> {
        self.assignment.get(parameter)
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Whether the experiment still awaits a result.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, ExperimentStatus::Pending)
    }

    /// Get the measures, if complete.
    #[must_use]
    pub const fn measures(&self) -> Option<&Measures> {
        self.measures.as_ref()
    }

    /// Get one measure value, if complete and reported.
    #[must_use]
    pub fn measure(&self, name: &str) -> Option<f64> {
        self.measures.as_ref().and_then(|m| m.get(name).copied())
    }

    /// Get the failure cause, if failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Get the reservation timestamp.
    #[must_use]
    pub const fn reserved_at(&self) -> DateTime<Utc> {
        self.reserved_at
    }

    /// Get the completion/failure timestamp.
    #[must_use]
    pub const fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// `NotPending` unless the record is still pending.
    pub(crate) fn ensure_pending(&self) -> Result<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(Error::NotPending {
                experiment_id: self.experiment_id,
                status: self.status.to_string(),
            })
        }
    }

    /// Pending -> complete.
    pub(crate) fn complete(&mut self, measures: Measures, at: DateTime<Utc>) -> Result<()> {
        self.ensure_pending()?;
        self.status = ExperimentStatus::Complete;
        self.measures = Some(measures);
        self.finished_at = Some(at);
        Ok(())
    }

    /// Pending -> failed.
    pub(crate) fn fail(&mut self, cause: String, at: DateTime<Utc>) -> Result<()> {
        self.ensure_pending()?;
        self.status = ExperimentStatus::Failed;
        self.failure = Some(cause);
        self.finished_at = Some(at);
        Ok(())
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    record: ExperimentRecord,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields; status starts pending.
    #[must_use]
    pub fn new(
        experiment_id: ExperimentId,
        scope: impl Into<String>,
        design: impl Into<String>,
        assignment: Assignment,
    ) -> Self {
        Self {
            record: ExperimentRecord::new(experiment_id, scope, design, assignment),
        }
    }

    /// Set the reservation timestamp.
    #[must_use]
    pub const fn reserved_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.reserved_at = at;
        self
    }

    /// Mark complete with measures.
    #[must_use]
    pub fn completed(mut self, measures: Measures, at: Option<DateTime<Utc>>) -> Self {
        self.record.status = ExperimentStatus::Complete;
        self.record.measures = Some(measures);
        self.record.failure = None;
        self.record.finished_at = at;
        self
    }

    /// Mark failed with a cause.
    #[must_use]
    pub fn failed(mut self, cause: impl Into<String>, at: Option<DateTime<Utc>>) -> Self {
        self.record.status = ExperimentStatus::Failed;
        self.record.failure = Some(cause.into());
        self.record.measures = None;
        self.record.finished_at = at;
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{assignment, measures};

    fn pending() -> ExperimentRecord {
        ExperimentRecord::new(
            ExperimentId::new(1),
            "road_test",
            "d1",
            assignment([("x", 3.0.into())]),
        )
    }

    #[test]
    fn test_new_record_is_pending() {
        let r = pending();
        assert!(r.is_pending());
        assert!(r.measures().is_none());
        assert!(r.finished_at().is_none());
        assert_eq!(r.value("x"), Some(&Value::Float(3.0)));
    }

    #[test]
    fn test_complete_then_fail_is_rejected() {
        let mut r = pending();
        r.complete(measures([("m", 5.0)]), Utc::now()).unwrap();
        assert_eq!(r.status(), ExperimentStatus::Complete);
        assert_eq!(r.measure("m"), Some(5.0));

        let err = r.fail("boom".into(), Utc::now()).unwrap_err();
        match err {
            Error::NotPending {
                experiment_id,
                status,
            } => {
                assert_eq!(experiment_id, ExperimentId::new(1));
                assert_eq!(status, "complete");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(r.failure().is_none());
    }

    #[test]
    fn test_fail_then_complete_is_rejected() {
        let mut r = pending();
        r.fail("timeout".into(), Utc::now()).unwrap();
        assert!(r.complete(measures([("m", 1.0)]), Utc::now()).is_err());
        assert_eq!(r.failure(), Some("timeout"));
        assert!(r.status().is_terminal());
    }

    #[test]
    fn test_builder_sets_terminal_state() {
        let r = ExperimentRecord::builder(ExperimentId::new(4), "s", "d", Assignment::new())
            .failed("bad input", None)
            .build();
        assert_eq!(r.status(), ExperimentStatus::Failed);
        assert_eq!(r.experiment_id().get(), 4);
    }

    #[test]
    fn test_json_roundtrip_with_nan_measure() {
        let mut r = pending();
        r.complete(measures([("m", f64::NAN)]), Utc::now()).unwrap();
        let json = serde_json::to_string(&r).unwrap();
        let back: ExperimentRecord = serde_json::from_str(&json).unwrap();
        assert!(back.measure("m").unwrap().is_nan());
        assert_eq!(back.assignment(), r.assignment());
    }
}
