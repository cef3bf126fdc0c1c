//! External-process model adapter
//!
//! Protocol: the program is spawned once per experiment, receives the
//! assignment as one JSON object on stdin and must print one JSON object of
//! measures on stdout (`null` reads as `NaN`). A non-zero exit status fails
//! the experiment with the trimmed stderr as its cause.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Deserialize;
use tracing::debug;

use super::CoreModel;
use crate::value::{measures_json, Assignment, Measures};
use crate::{Error, Result};

#[derive(Deserialize)]
struct Output(#[serde(with = "measures_json")] Measures);

/// Model evaluated by an external program.
#[derive(Debug, Clone)]
pub struct ProcessModel {
    name: String,
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
}

impl ProcessModel {
    /// Model that runs `program` with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, program: impl Into<OsString>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the program.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run the program in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    fn fail(&self, message: impl std::fmt::Display) -> Error {
        Error::Model(format!("{}: {message}", self.name))
    }
}

impl CoreModel for ProcessModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, assignment: &Assignment) -> Result<Measures> {
        let input = serde_json::to_vec(assignment)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            self.fail(format!(
                "cannot start {}: {e}",
                self.program.to_string_lossy()
            ))
        })?;
        // stdin is fed from its own thread while stdout and stderr drain,
        // so a program that writes before reading cannot fill a pipe and stall
        let stdin = child.stdin.take();
        let output = std::thread::scope(|s| {
            if let Some(mut stdin) = stdin {
                let input = &input;
                let name = &self.name;
                s.spawn(move || {
                    // a program that ignores its input may exit before reading it
                    if let Err(e) = stdin.write_all(input) {
                        debug!(model = %name, error = %e, "model closed stdin early");
                    }
                });
            }
            child.wait_with_output()
        })
        .map_err(|e| self.fail(format!("waiting for process: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.fail(format!("exited with {}: {}", output.status, stderr.trim())));
        }
        let Output(measures) = serde_json::from_slice(&output.stdout).map_err(|e| {
            self.fail(format!(
                "stdout is not a JSON object of measures ({e}): {}",
                String::from_utf8_lossy(&output.stdout).trim()
            ))
        })?;
        Ok(measures)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::value::{assignment, Value};

    fn sh(name: &str, script: &str) -> ProcessModel {
        ProcessModel::new(name, "sh").args(["-c", script])
    }

    #[test]
    fn test_process_model_reads_stdout_measures() {
        let model = sh("echo", r#"cat > /dev/null; echo '{"cost": 2.5, "risk": null}'"#);
        let out = model.run(&assignment([("x", 1.0.into())])).unwrap();
        assert_eq!(out["cost"], 2.5);
        assert!(out["risk"].is_nan());
    }

    #[test]
    fn test_process_model_receives_assignment_on_stdin() {
        // echo the x value back as a measure
        let model = sh(
            "relay",
            r#"read line; x=$(echo "$line" | sed 's/.*"x":\([0-9.]*\).*/\1/'); echo "{\"x\": $x}""#,
        );
        let out = model.run(&assignment([("x", 4.5.into())])).unwrap();
        assert_eq!(out["x"], 4.5);
    }

    #[test]
    fn test_large_output_before_reading_stdin() {
        // both pipes exceed their buffers: stderr fills before stdin is read
        let model = sh(
            "chatty",
            r#"head -c 300000 /dev/zero | tr '\0' '.' >&2; cat > /dev/null; echo '{"ok": 1}'"#,
        );
        let blob = Value::Str("x".repeat(300_000));
        let out = model.run(&assignment([("blob", blob)])).unwrap();
        assert_eq!(out["ok"], 1.0);
    }

    #[test]
    fn test_nonzero_exit_is_a_model_error() {
        let model = sh("broken", "echo 'solver diverged' >&2; exit 3");
        let err = model.run(&Assignment::new()).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::Model(_)));
        assert!(msg.contains("broken"), "{msg}");
        assert!(msg.contains("solver diverged"), "{msg}");
    }

    #[test]
    fn test_garbage_stdout_is_a_model_error() {
        let model = sh("noisy", "echo 'not json'");
        assert!(matches!(model.run(&Assignment::new()), Err(Error::Model(_))));
    }

    #[test]
    fn test_env_is_passed() {
        let model = sh("env", r#"echo "{\"k\": $K}""#).env("K", "7");
        assert_eq!(model.run(&Assignment::new()).unwrap()["k"], 7.0);
    }

    #[test]
    fn test_missing_program() {
        let model = ProcessModel::new("ghost", "/nonexistent/model-binary");
        let err = model.run(&Assignment::new()).unwrap_err();
        assert!(err.to_string().contains("cannot start"));
    }
}
