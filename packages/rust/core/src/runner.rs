//! External process execution.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracedeck_shared::{StepLog, TraceDeckError};
use tracing::debug;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ProcessOutput {
    pub fn log(&self) -> StepLog {
        StepLog {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", describe_code(*.code))]
    Exited {
        command: String,
        code: Option<i32>,
        output: ProcessOutput,
    },
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl ProcessError {
    /// Streams captured before the failure, if the process ran at all.
    pub fn output(&self) -> Option<&ProcessOutput> {
        match self {
            Self::Spawn { .. } => None,
            Self::Exited { output, .. } => Some(output),
        }
    }
}

impl From<ProcessError> for TraceDeckError {
    fn from(e: ProcessError) -> Self {
        TraceDeckError::Process(e.to_string())
    }
}

/// Runs external tools to completion, capturing both streams.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command args...` in `working_dir`. A non-zero exit is reported
    /// as [`ProcessError::Exited`] with the captured output attached.
    async fn run(
        &self,
        working_dir: &Path,
        command: &str,
        args: &[String],
    ) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        working_dir: &Path,
        command: &str,
        args: &[String],
    ) -> Result<ProcessOutput, ProcessError> {
        debug!(command, ?args, dir = %working_dir.display(), "running");

        let output = Command::new(command)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            // An aborted job must not leave its tool running.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let result = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        };

        if output.status.success() {
            Ok(result)
        } else {
            Err(ProcessError::Exited {
                command: command.to_string(),
                code: result.code,
                output: result,
            })
        }
    }
}
