//! Parquet archive of retired experiments
//!
//! ## Schema
//!
//! | column | type |
//! |--------|------|
//! | `experiment_id` | UInt64 |
//! | `scope`, `design`, `status` | Utf8 |
//! | `param:<name>` | by domain kind: Float64, Int64, Utf8, Boolean; JSON text when unrestricted |
//! | `measure:<name>` | Float64 |
//! | `failure` | Utf8 |
//! | `reserved_at_ms`, `finished_at_ms` | Int64 (Unix milliseconds) |
//!
//! Parameter and measure columns are nullable so records written under an
//! earlier scope version still fit. Utf8 parameter columns carry an
//! `encoding` field metadata entry (`label` or `json`), so files decode the
//! same whichever scope version reads them.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::store::select_completed;
use super::{ExperimentId, ExperimentRecord};
use crate::bounds::BoundsKind;
use crate::boxes::ParameterBox;
use crate::scope::Scope;
use crate::storage::StorageEngine;
use crate::value::{Assignment, Measures, Value};
use crate::{Error, Result};

const PARAM_PREFIX: &str = "param:";
const MEASURE_PREFIX: &str = "measure:";
const ENCODING_KEY: &str = "encoding";

/// Archived experiments of one scope, loaded from Parquet.
#[derive(Debug, Clone)]
pub struct Archive {
    scope: String,
    files: Vec<PathBuf>,
    records: Vec<ExperimentRecord>,
}

impl Archive {
    /// Load archived experiments of `scope`.
    ///
    /// `path` is either one archive file or the directory given to
    /// [`ExperimentStore::archive`](super::ExperimentStore::archive); in the
    /// latter case every archive file of the scope is read.
    ///
    /// # Errors
    ///
    /// `MissingArchivePath` if `path` does not exist, `StorageError` for
    /// unreadable files or unexpected columns.
    pub fn load<P: AsRef<Path>>(path: P, scope: &Scope) -> Result<Self> {
        let path = path.as_ref();
        let files = if path.is_dir() {
            let prefix = format!("{}.archive.", file_stem(scope.name()));
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".parquet"))
                })
                .collect();
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(Error::MissingArchivePath {
                path: path.to_path_buf(),
                reason: "no such file or directory".to_string(),
            });
        };

        let mut records = Vec::new();
        for file in &files {
            let storage = StorageEngine::load_parquet(file)?;
            for batch in storage.batches() {
                records.extend(
                    decode(scope, batch)?
                        .into_iter()
                        .filter(|r| r.scope() == scope.name()),
                );
            }
        }
        records.sort_by_key(ExperimentRecord::experiment_id);
        debug!(
            scope = scope.name(),
            files = files.len(),
            records = records.len(),
            "loaded experiment archive"
        );
        Ok(Self {
            scope: scope.name().to_string(),
            files,
            records,
        })
    }

    /// Completed archived experiments, optionally filtered by box membership.
    ///
    /// # Errors
    ///
    /// `Scope` if `scope` is not the archive's scope or the box does not fit it.
    pub fn query(&self, scope: &Scope, bx: Option<&ParameterBox>) -> Result<Vec<ExperimentRecord>> {
        if scope.name() != self.scope {
            return Err(Error::scope(format!(
                "archive holds scope '{}', not '{}'",
                self.scope,
                scope.name()
            )));
        }
        select_completed(self.records.iter(), scope, bx)
    }

    /// Every archived record (complete and failed), ordered by id.
    #[must_use]
    pub fn records(&self) -> &[ExperimentRecord] {
        &self.records
    }

    /// Files the archive was read from.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of archived records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing was archived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Scope name made safe for a file name.
pub(crate) fn file_stem(scope: &str) -> String {
    scope
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `{scope}.archive.{first}-{last}.{nonce}.parquet`
///
/// Ids only order files written by one store; the nonce keeps files from
/// different stores sharing a directory apart.
pub(crate) fn file_name(scope: &str, first: ExperimentId, last: ExperimentId, nonce: u64) -> String {
    format!(
        "{}.archive.{:020}-{:020}.{nonce:016x}.parquet",
        file_stem(scope),
        first.get(),
        last.get()
    )
}

/// Column layout for a set of records: scope parameters first, then any
/// extra assignment keys, then measures.
fn layout(scope: &Scope, records: &[ExperimentRecord]) -> (Vec<(String, DataType)>, Vec<String>) {
    let mut params: Vec<(String, DataType)> = scope
        .parameters()
        .iter()
        .map(|p| (p.name().to_string(), data_type(p.kind())))
        .collect();
    let extra: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.assignment().keys())
        .map(String::as_str)
        .filter(|k| scope.parameter(k).is_none())
        .collect();
    params.extend(extra.into_iter().map(|k| (k.to_string(), DataType::Utf8)));

    let mut measures: Vec<String> = scope.measures().iter().map(|m| m.name().to_string()).collect();
    let extra: BTreeSet<&str> = records
        .iter()
        .filter_map(ExperimentRecord::measures)
        .flat_map(Measures::keys)
        .map(String::as_str)
        .filter(|k| scope.measure(k).is_none())
        .collect();
    measures.extend(extra.into_iter().map(str::to_string));
    (params, measures)
}

const fn data_type(kind: BoundsKind) -> DataType {
    match kind {
        BoundsKind::Continuous => DataType::Float64,
        BoundsKind::Discrete => DataType::Int64,
        BoundsKind::Boolean => DataType::Boolean,
        BoundsKind::Categorical | BoundsKind::Unrestricted => DataType::Utf8,
    }
}

/// Encode records as one record batch.
pub(crate) fn encode(scope: &Scope, records: &[ExperimentRecord]) -> Result<RecordBatch> {
    let (params, measures) = layout(scope, records);
    let mut fields = vec![
        Field::new("experiment_id", DataType::UInt64, false),
        Field::new("scope", DataType::Utf8, false),
        Field::new("design", DataType::Utf8, false),
        Field::new("status", DataType::Utf8, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from_iter_values(
            records.iter().map(|r| r.experiment_id().get()),
        )),
        Arc::new(StringArray::from_iter_values(records.iter().map(ExperimentRecord::scope))),
        Arc::new(StringArray::from_iter_values(records.iter().map(ExperimentRecord::design))),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.status().to_string()),
        )),
    ];

    for (name, dtype) in &params {
        let mut field = Field::new(format!("{PARAM_PREFIX}{name}"), dtype.clone(), true);
        let values = records.iter().map(|r| r.value(name));
        let column: ArrayRef = match dtype {
            DataType::Float64 => Arc::new(values.map(|v| v.and_then(Value::as_f64)).collect::<Float64Array>()),
            DataType::Int64 => Arc::new(values.map(|v| v.and_then(Value::as_i64)).collect::<Int64Array>()),
            DataType::Boolean => Arc::new(values.map(|v| v.and_then(Value::as_bool)).collect::<BooleanArray>()),
            _ if is_categorical(scope, name) => {
                field = with_encoding(field, TextEncoding::Label);
                Arc::new(
                    values
                        .map(|v| v.and_then(Value::as_str).map(str::to_string))
                        .collect::<StringArray>(),
                )
            }
            _ => {
                field = with_encoding(field, TextEncoding::Json);
                Arc::new(
                    values
                        .map(|v| v.map(serde_json::to_string).transpose())
                        .collect::<std::result::Result<StringArray, _>>()?,
                )
            }
        };
        fields.push(field);
        columns.push(column);
    }

    for name in &measures {
        fields.push(Field::new(format!("{MEASURE_PREFIX}{name}"), DataType::Float64, true));
        columns.push(Arc::new(
            records.iter().map(|r| r.measure(name)).collect::<Float64Array>(),
        ));
    }

    fields.push(Field::new("failure", DataType::Utf8, true));
    columns.push(Arc::new(
        records.iter().map(ExperimentRecord::failure).collect::<StringArray>(),
    ));
    fields.push(Field::new("reserved_at_ms", DataType::Int64, false));
    columns.push(Arc::new(Int64Array::from_iter_values(
        records.iter().map(|r| r.reserved_at().timestamp_millis()),
    )));
    fields.push(Field::new("finished_at_ms", DataType::Int64, true));
    columns.push(Arc::new(
        records
            .iter()
            .map(|r| r.finished_at().map(|t| t.timestamp_millis()))
            .collect::<Int64Array>(),
    ));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// How a Utf8 parameter column stores its values, kept in the field
/// metadata under [`ENCODING_KEY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    /// Category labels as plain text
    Label,
    /// Values as JSON text
    Json,
}

impl TextEncoding {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Json => "json",
        }
    }

    fn of(field: &Field) -> Option<Self> {
        match field.metadata().get(ENCODING_KEY).map(String::as_str) {
            Some("label") => Some(Self::Label),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }
}

fn with_encoding(field: Field, encoding: TextEncoding) -> Field {
    field.with_metadata(HashMap::from([(
        ENCODING_KEY.to_string(),
        encoding.as_str().to_string(),
    )]))
}

fn is_categorical(scope: &Scope, name: &str) -> bool {
    scope
        .parameter(name)
        .is_some_and(|p| p.kind() == BoundsKind::Categorical)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| {
            Error::StorageError(format!("Archive column '{name}' is missing or mistyped"))
        })
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::StorageError(format!("Archive timestamp {ms} is out of range")))
}

/// Decode one record batch.
pub(crate) fn decode(scope: &Scope, batch: &RecordBatch) -> Result<Vec<ExperimentRecord>> {
    let ids = column::<UInt64Array>(batch, "experiment_id")?;
    let scopes = column::<StringArray>(batch, "scope")?;
    let designs = column::<StringArray>(batch, "design")?;
    let statuses = column::<StringArray>(batch, "status")?;
    let failures = column::<StringArray>(batch, "failure")?;
    let reserved = column::<Int64Array>(batch, "reserved_at_ms")?;
    let finished = column::<Int64Array>(batch, "finished_at_ms")?;

    let schema = batch.schema();
    let params: Vec<(&str, Option<TextEncoding>, &ArrayRef)> = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .filter_map(|(f, c)| {
            f.name()
                .strip_prefix(PARAM_PREFIX)
                .map(|n| (n, TextEncoding::of(f), c))
        })
        .collect();
    let measures: Vec<(&str, &Float64Array)> = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .filter_map(|(f, c)| f.name().strip_prefix(MEASURE_PREFIX).map(|n| (n, c)))
        .map(|(n, c)| {
            c.as_any()
                .downcast_ref::<Float64Array>()
                .map(|a| (n, a))
                .ok_or_else(|| {
                    Error::StorageError(format!("Archive measure column '{n}' is not Float64"))
                })
        })
        .collect::<Result<_>>()?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut assignment = Assignment::new();
        for (name, encoding, array) in &params {
            let encoding = encoding.unwrap_or_else(|| {
                if is_categorical(scope, name) {
                    TextEncoding::Label
                } else {
                    TextEncoding::Json
                }
            });
            if let Some(value) = param_value(name, encoding, array.as_ref(), row)? {
                assignment.insert((*name).to_string(), value);
            }
        }

        let builder = ExperimentRecord::builder(
            ExperimentId::new(ids.value(row)),
            scopes.value(row),
            designs.value(row),
            assignment,
        )
        .reserved_at(timestamp(reserved.value(row))?);
        let finished_at = if finished.is_null(row) {
            None
        } else {
            Some(timestamp(finished.value(row))?)
        };

        let record = match statuses.value(row) {
            "complete" => {
                let values: Measures = measures
                    .iter()
                    .filter(|(_, a)| !a.is_null(row))
                    .map(|(n, a)| ((*n).to_string(), a.value(row)))
                    .collect();
                builder.completed(values, finished_at).build()
            }
            "failed" => {
                let cause = if failures.is_null(row) { "" } else { failures.value(row) };
                builder.failed(cause, finished_at).build()
            }
            "pending" => builder.build(),
            other => {
                return Err(Error::StorageError(format!(
                    "Archive row {row} has unknown status '{other}'"
                )))
            }
        };
        records.push(record);
    }
    Ok(records)
}

fn param_value(
    name: &str,
    encoding: TextEncoding,
    array: &dyn Array,
    row: usize,
) -> Result<Option<Value>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let any = array.as_any();
    if let Some(a) = any.downcast_ref::<Float64Array>() {
        return Ok(Some(Value::Float(a.value(row))));
    }
    if let Some(a) = any.downcast_ref::<Int64Array>() {
        return Ok(Some(Value::Int(a.value(row))));
    }
    if let Some(a) = any.downcast_ref::<BooleanArray>() {
        return Ok(Some(Value::Bool(a.value(row))));
    }
    if let Some(a) = any.downcast_ref::<StringArray>() {
        let text = a.value(row);
        return match encoding {
            TextEncoding::Label => Ok(Some(Value::Str(text.to_string()))),
            TextEncoding::Json => Ok(Some(serde_json::from_str(text).map_err(|e| {
                Error::StorageError(format!("Archive parameter '{name}' row {row}: {e}"))
            })?)),
        };
    }
    Err(Error::StorageError(format!(
        "Archive parameter column '{name}' has unsupported type {}",
        array.data_type()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use crate::experiment::ExperimentStatus;
    use crate::scope::{Measure, Parameter};
    use crate::value::{assignment, measures};

    fn scope() -> Scope {
        Scope::new("road test")
            .with(Parameter::uncertainty("x", Bounds::continuous("x", 0.0, 10.0).unwrap(), 5.0))
            .unwrap()
            .with(Parameter::lever("y", Bounds::categorical("y", ["lo", "hi"]).unwrap(), "lo"))
            .unwrap()
            .with(Parameter::uncertainty("n", Bounds::discrete("n", 1, 4).unwrap(), 1))
            .unwrap()
            .with(Parameter::lever("flag", Bounds::boolean("flag", [false, true]).unwrap(), false))
            .unwrap()
            .with(Parameter::uncertainty("u", Bounds::unrestricted("u"), "free"))
            .unwrap()
            .with(Measure::new("cost"))
            .unwrap()
    }

    fn records() -> Vec<ExperimentRecord> {
        let point = assignment([
            ("x", 3.0.into()),
            ("y", "lo".into()),
            ("n", 2.into()),
            ("flag", true.into()),
            ("u", 7.into()),
        ]);
        vec![
            ExperimentRecord::builder(ExperimentId::new(1), "road test", "d1", point.clone())
                .completed(measures([("cost", 5.0)]), Some(Utc::now()))
                .build(),
            ExperimentRecord::builder(ExperimentId::new(2), "road test", "d2", point)
                .failed("diverged", Some(Utc::now()))
                .build(),
        ]
    }

    #[test]
    fn test_encode_decode_preserves_records() {
        let scope = scope();
        let original = records();
        let batch = encode(&scope, &original).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert!(batch.column_by_name("param:flag").is_some());
        assert!(batch.column_by_name("measure:cost").is_some());

        let decoded = decode(&scope, &batch).unwrap();
        assert_eq!(decoded[0].assignment(), original[0].assignment());
        assert_eq!(decoded[0].measure("cost"), Some(5.0));
        assert_eq!(decoded[1].status(), ExperimentStatus::Failed);
        assert_eq!(decoded[1].failure(), Some("diverged"));
        assert_eq!(
            decoded[0].reserved_at().timestamp_millis(),
            original[0].reserved_at().timestamp_millis()
        );
    }

    #[test]
    fn test_file_name_is_sanitized_and_sortable() {
        let name = file_name("road test/v2", ExperimentId::new(3), ExperimentId::new(12), 0xbeef);
        assert!(name.starts_with("road_test_v2.archive."));
        assert!(name.ends_with(".000000000000beef.parquet"));
        assert!(!name.contains('/'));
        assert!(
            file_name("s", ExperimentId::new(9), ExperimentId::new(9), u64::MAX)
                < file_name("s", ExperimentId::new(10), ExperimentId::new(10), 0)
        );
        assert_ne!(
            file_name("s", ExperimentId::new(1), ExperimentId::new(1), 1),
            file_name("s", ExperimentId::new(1), ExperimentId::new(1), 2)
        );
    }

    #[test]
    fn test_load_missing_path() {
        let err = Archive::load("/nonexistent/archive-dir", &scope()).unwrap_err();
        assert!(matches!(err, Error::MissingArchivePath { .. }));
    }
}
