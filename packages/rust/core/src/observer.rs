//! Progress callbacks for running jobs.

use std::fmt;

use tracedeck_shared::JobStatus;

/// One external step of a capture or retrace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Fetch,
    Build,
    Trace,
    Dump,
    Retrace,
    DumpImages,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Build => "build",
            Self::Trace => "trace",
            Self::Dump => "dump",
            Self::Retrace => "retrace",
            Self::DumpImages => "dump-images",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress callback for reporting job status.
pub trait JobObserver: Send + Sync {
    /// Called before a step's process starts.
    fn step_started(&self, job_id: &str, step: Step);
    /// Called once the step's process has exited.
    fn step_finished(&self, job_id: &str, step: Step, ok: bool);
    /// Called after the final status has been persisted.
    fn job_finished(&self, job_id: &str, status: &JobStatus);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl JobObserver for SilentObserver {
    fn step_started(&self, _job_id: &str, _step: Step) {}
    fn step_finished(&self, _job_id: &str, _step: Step, _ok: bool) {}
    fn job_finished(&self, _job_id: &str, _status: &JobStatus) {}
}
