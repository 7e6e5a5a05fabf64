//! Core domain types shared by the store, the pipelines, and the CLI.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// A registered application: where its source lives and how to build and
/// trace it. Parent of every capture job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    /// Unique key, derived from the requested name.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Repository URL handed to the source fetcher.
    pub url: String,
    /// Branch to check out. Empty means the remote's default branch.
    #[serde(default)]
    pub branch: String,
    /// SSH user for private repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Path to the SSH private key for private repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    /// Script run with the shell from the checkout root.
    pub build_script: String,
    /// Executable (relative to the checkout root) to trace.
    pub executable: String,
    /// Tracer binary override; falls back to `[tools] apitrace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_trace: Option<String>,
    /// Retracer binary override; falls back to `[tools] glretrace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrace: Option<String>,
    /// Wall-clock cap on the trace step, in seconds.
    pub timeout_secs: u64,
    /// Whether retraces also extract rendered images.
    #[serde(default)]
    pub dump_images: bool,
    /// Capture job ids, oldest first. Filled in from the store's keys on
    /// lookup; never read back from the stored record.
    #[serde(default, skip_deserializing)]
    pub traces: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// The editable portion of an [`App`], as supplied by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    pub build_script: String,
    pub executable: String,
    #[serde(default)]
    pub api_trace: Option<String>,
    #[serde(default)]
    pub retrace: Option<String>,
    /// Trace timeout in seconds; `None` uses the configured default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub dump_images: bool,
}

impl AppSpec {
    /// Reject specs that cannot possibly produce a capture.
    pub fn validate(&self) -> crate::Result<()> {
        let required = [
            ("name", &self.name),
            ("url", &self.url),
            ("buildScript", &self.build_script),
            ("executable", &self.executable),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(crate::TraceDeckError::validation(format!(
                    "app field `{field}` must not be empty"
                )));
            }
        }
        if self.timeout_secs == Some(0) {
            return Err(crate::TraceDeckError::validation(
                "app field `timeoutSecs` must be positive",
            ));
        }
        Ok(())
    }
}

/// A compact listing entry for an app.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub branch: String,
    /// Number of capture jobs recorded for the app.
    pub traces: usize,
    /// Whether a capture is currently in flight.
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Job lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of a capture or retrace job.
///
/// Jobs are persisted `Pending` on creation and rewritten exactly once by
/// their owning task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Complete,
    Failed { reason: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Complete => f.write_str("complete"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Captured output streams of one external step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLog {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Proposed key for a new capture job of `app_id`; the store appends a
/// numeric suffix when it is taken.
pub fn capture_key(app_id: &str) -> String {
    format!("{app_id}-trace")
}

/// Key of one persisted frame of a capture job.
pub fn frame_key(job_id: &str, index: usize) -> String {
    format!("{job_id}-{index}")
}

/// Key of the retrace of `call_id` within capture `trace_id`.
pub fn retrace_key(trace_id: &str, call_id: &str) -> String {
    format!("{trace_id}-{call_id}")
}
