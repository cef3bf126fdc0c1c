//! Tests for error types

use std::path::PathBuf;

use trueno_ema::experiment::ExperimentId;
use trueno_ema::Error;

#[test]
fn test_scope_error() {
    let error = Error::Scope("'q' is not a parameter of scope 'road_test'".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Scope error"));
    assert!(error_str.contains("'q'"));
    assert!(error.is_scope_error());
    assert!(!error.is_pending_experiments());
}

#[test]
fn test_scope_format_error() {
    let error = Error::ScopeFormat("empty range".to_string());
    assert!(format!("{error}").contains("Scope format error"));
    assert!(error.is_scope_error());
}

#[test]
fn test_duplicate_reservation_error() {
    let error = Error::DuplicateReservation {
        design: "lhs_1".to_string(),
        existing: ExperimentId::new(17),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("lhs_1"));
    assert!(error_str.contains("experiment 17"));
    assert!(error.is_pending_experiments());
    assert!(!error.is_scope_error());
}

#[test]
fn test_pending_experiments_error() {
    let error = Error::PendingExperiments("3 pending".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("3 pending"));
    assert!(error_str.contains("Drain or fail"));
    assert!(error.is_pending_experiments());
}

#[test]
fn test_not_pending_error() {
    let error = Error::NotPending {
        experiment_id: ExperimentId::new(4),
        status: "complete".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Experiment 4"));
    assert!(error_str.contains("complete"));
}

#[test]
fn test_unknown_experiment_error() {
    let error = Error::UnknownExperiment(ExperimentId::new(99));
    assert!(format!("{error}").contains("99"));
}

#[test]
fn test_missing_archive_path_error() {
    let error = Error::MissingArchivePath {
        path: PathBuf::from("/archive/missing"),
        reason: "not an existing directory".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("/archive/missing"));
    assert!(error_str.contains("not an existing directory"));
}

#[test]
fn test_asymmetric_correlation_error() {
    let error = Error::AsymmetricCorrelation {
        first: "a".to_string(),
        second: "b".to_string(),
        existing: 0.3,
        requested: 0.5,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("'a'"));
    assert!(error_str.contains("0.3"));
    assert!(error_str.contains("0.5"));
}

#[test]
fn test_distribution_errors() {
    let type_error = Error::DistributionType {
        parameter: "y".to_string(),
        message: "triangle needs a real range".to_string(),
    };
    assert!(format!("{type_error}").contains("Distribution type error for 'y'"));

    let freeze_error = Error::DistributionFreeze {
        parameter: "x".to_string(),
        message: "peak outside range".to_string(),
    };
    assert!(format!("{freeze_error}").contains("peak outside range"));
}

#[test]
fn test_model_error() {
    let error = Error::Model("road: solver diverged".to_string());
    assert!(format!("{error}").contains("Model error: road: solver diverged"));
}

#[test]
fn test_storage_error() {
    let error = Error::StorageError("file not found".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_serialization_error_conversion() {
    let json_error = serde_json::from_str::<u32>("not json").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("Serialization error"));
}

#[test]
fn test_other_error() {
    let error = Error::Other("custom error message".to_string());
    assert_eq!(format!("{error}"), "custom error message");
}

#[test]
fn test_error_debug_format() {
    let error = Error::UnknownExperiment(ExperimentId::new(1));
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("UnknownExperiment"));
}
