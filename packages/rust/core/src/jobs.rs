//! Persisted job records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracedeck_parsers::{ImageSet, RetraceData};
use tracedeck_shared::{JobStatus, StepLog};

/// A fetch, build, trace and dump run for one app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureJob {
    pub id: String,
    pub app_id: String,
    /// App name at the time of the capture.
    pub name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub fetch: StepLog,
    #[serde(default)]
    pub build: StepLog,
    #[serde(default)]
    pub trace: StepLog,
    /// Dump stderr only; stdout is persisted as frames.
    #[serde(default)]
    pub dump: StepLog,
    /// Checkout directory; the tools run from here.
    pub target_directory: PathBuf,
    /// Trace file as reported by the tracer, relative to the checkout.
    #[serde(default)]
    pub trace_file: Option<String>,
    #[serde(default)]
    pub number_of_frames: usize,
    /// Retrace job ids by call number. Filled in from the store's keys on
    /// lookup; never read back from the stored record.
    #[serde(default, skip_deserializing)]
    pub retraces: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl CaptureJob {
    pub fn pending(id: String, app_id: &str, name: &str, target_directory: PathBuf) -> Self {
        Self {
            id,
            app_id: app_id.to_string(),
            name: name.to_string(),
            status: JobStatus::Pending,
            fetch: StepLog::default(),
            build: StepLog::default(),
            trace: StepLog::default(),
            dump: StepLog::default(),
            target_directory,
            trace_file: None,
            number_of_frames: 0,
            retraces: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// A retrace of one call of a finished capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetraceJob {
    pub id: String,
    pub app_id: String,
    pub trace_id: String,
    pub call_id: String,
    pub status: JobStatus,
    /// Retracer stderr; stdout is decoded into `retrace_data`.
    #[serde(default)]
    pub retrace: StepLog,
    /// Present when the app dumps images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dump: Option<StepLog>,
    #[serde(default)]
    pub retrace_data: RetraceData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_set: Option<ImageSet>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RetraceJob {
    pub fn pending(id: String, app_id: &str, trace_id: &str, call_id: &str) -> Self {
        Self {
            id,
            app_id: app_id.to_string(),
            trace_id: trace_id.to_string(),
            call_id: call_id.to_string(),
            status: JobStatus::Pending,
            retrace: StepLog::default(),
            image_dump: None,
            retrace_data: RetraceData::default(),
            image_set: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// A job that has been persisted and handed to its task.
#[derive(Debug)]
pub struct Started<J> {
    /// The job as first persisted (`Pending`).
    pub job: J,
    /// Resolves once the final status is persisted.
    pub task: JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_job_json_shape() {
        let job = CaptureJob::pending(
            "demo-trace".into(),
            "demo",
            "Demo",
            PathBuf::from("/tmp/tracedeck/demo-1"),
        );
        let value = serde_json::to_value(&job).expect("serialize");
        assert_eq!(value["id"], "demo-trace");
        assert_eq!(value["appId"], "demo");
        assert_eq!(value["status"]["state"], "pending");
        assert_eq!(value["targetDirectory"], "/tmp/tracedeck/demo-1");
        assert_eq!(value["numberOfFrames"], 0);

        let back: CaptureJob = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, job);
    }

    #[test]
    fn stored_retrace_links_are_not_read_back() {
        let mut job = CaptureJob::pending("demo-trace".into(), "demo", "Demo", "/tmp/w".into());
        job.retraces = vec!["demo-trace-1".into()];
        let value = serde_json::to_value(&job).expect("serialize");
        assert_eq!(value["retraces"][0], "demo-trace-1");

        let back: CaptureJob = serde_json::from_value(value).expect("deserialize");
        assert!(back.retraces.is_empty());
    }

    #[test]
    fn retrace_job_omits_absent_images() {
        let job = RetraceJob::pending("demo-trace-42".into(), "demo", "demo-trace", "42");
        let value = serde_json::to_value(&job).expect("serialize");
        assert!(value.get("imageSet").is_none());
        assert!(value.get("imageDump").is_none());
        assert_eq!(value["callId"], "42");
        assert!(value["retraceData"]["framebuffer"].as_object().is_some());
    }
}
