//! App registration and lookups over stored apps, captures, frames and
//! retraces.

use std::path::PathBuf;

use chrono::Utc;
use tracedeck_parsers::Frame;
use tracedeck_shared::{
    App, AppSpec, AppSummary, JobStatus, Result, TraceDeckError, capture_key, frame_key,
    retrace_key,
};
use tracedeck_storage::{Bucket, Store, load, save};
use tracing::{info, instrument, warn};

use crate::jobs::{CaptureJob, RetraceJob};

/// Turn an app name into a key: lowercase ASCII alphanumerics separated by
/// single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "app".to_string()
    } else {
        slug.to_string()
    }
}

fn apply_spec(app: &mut App, spec: AppSpec, default_timeout_secs: u64) {
    app.name = spec.name;
    app.description = spec.description;
    app.url = spec.url;
    app.branch = spec.branch;
    app.user = spec.user;
    app.private_key = spec.private_key;
    app.build_script = spec.build_script;
    app.executable = spec.executable;
    app.api_trace = spec.api_trace;
    app.retrace = spec.retrace;
    app.timeout_secs = spec.timeout_secs.unwrap_or(default_timeout_secs);
    app.dump_images = spec.dump_images;
}

/// Register a new app under a unique key derived from its name.
#[instrument(skip_all, fields(name = %spec.name))]
pub async fn add_app(store: &dyn Store, spec: AppSpec, default_timeout_secs: u64) -> Result<App> {
    spec.validate()?;
    let id = store
        .reserve_unique_key(Bucket::Apps, &slugify(&spec.name))
        .await?;

    let mut app = App {
        id,
        name: String::new(),
        description: String::new(),
        url: String::new(),
        branch: String::new(),
        user: None,
        private_key: None,
        build_script: String::new(),
        executable: String::new(),
        api_trace: None,
        retrace: None,
        timeout_secs: default_timeout_secs,
        dump_images: false,
        traces: Vec::new(),
        created_at: Utc::now(),
    };
    apply_spec(&mut app, spec, default_timeout_secs);
    save(store, Bucket::Apps, &app.id, &app).await?;
    info!(id = %app.id, "registered app");
    Ok(app)
}

/// Replace the editable fields of an app. Its id, captures and creation
/// time are kept.
#[instrument(skip_all, fields(id = %id))]
pub async fn update_app(
    store: &dyn Store,
    id: &str,
    spec: AppSpec,
    default_timeout_secs: u64,
) -> Result<App> {
    spec.validate()?;
    let mut app = get_app(store, id).await?;
    apply_spec(&mut app, spec, default_timeout_secs);
    save(store, Bucket::Apps, &app.id, &app).await?;
    info!(id, "updated app");
    Ok(app)
}

pub async fn get_app(store: &dyn Store, id: &str) -> Result<App> {
    let mut app: App = load(store, Bucket::Apps, id)
        .await?
        .ok_or_else(|| TraceDeckError::not_found("app", id))?;
    app.traces = app_captures(store, &app.id).await?;
    Ok(app)
}

/// Numeric suffix of `key` after `prefix`, if the rest is all digits.
fn numbered(key: &str, prefix: &str) -> Option<u64> {
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Capture ids of an app, oldest first.
///
/// Captures are keyed `<app>-trace`, `<app>-trace-1`, ... so the list is
/// read off the key space instead of being kept on the app record.
async fn app_captures(store: &dyn Store, app_id: &str) -> Result<Vec<String>> {
    let base = capture_key(app_id);
    let dashed = format!("{base}-");
    let mut ids = Vec::new();
    for key in store.list_keys(Bucket::Traces).await? {
        let order = if key == base {
            0
        } else {
            match numbered(&key, &dashed) {
                Some(n) => n,
                None => continue,
            }
        };
        // Reserved keys whose job is not written yet.
        if store.get(Bucket::Traces, &key).await?.is_some() {
            ids.push((order, key));
        }
    }
    ids.sort();
    Ok(ids.into_iter().map(|(_, key)| key).collect())
}

/// Retrace ids of a capture, by call number.
async fn capture_retraces(store: &dyn Store, trace_id: &str) -> Result<Vec<String>> {
    let prefix = format!("{trace_id}-");
    let mut ids: Vec<_> = store
        .list_keys(Bucket::Retraces)
        .await?
        .into_iter()
        .filter_map(|key| Some((numbered(&key, &prefix)?, key)))
        .collect();
    ids.sort();
    Ok(ids.into_iter().map(|(_, key)| key).collect())
}

/// Summaries of every registered app, by id.
pub async fn list_apps(store: &dyn Store) -> Result<Vec<AppSummary>> {
    let mut summaries = Vec::new();
    for id in store.list_keys(Bucket::Apps).await? {
        // Reserved keys whose app is not written yet.
        let Some(app) = load::<App>(store, Bucket::Apps, &id).await? else {
            continue;
        };
        summaries.push(AppSummary {
            active: store.is_active(&app.id).await?,
            traces: app_captures(store, &app.id).await?.len(),
            id: app.id,
            name: app.name,
            description: app.description,
            branch: app.branch,
        });
    }
    Ok(summaries)
}

/// Every capture job, by id.
pub async fn list_captures(store: &dyn Store) -> Result<Vec<CaptureJob>> {
    let mut jobs = Vec::new();
    for id in store.list_keys(Bucket::Traces).await? {
        if let Some(mut job) = load::<CaptureJob>(store, Bucket::Traces, &id).await? {
            job.retraces = capture_retraces(store, &job.id).await?;
            jobs.push(job);
        }
    }
    Ok(jobs)
}

pub async fn get_capture(store: &dyn Store, id: &str) -> Result<CaptureJob> {
    let mut job: CaptureJob = load(store, Bucket::Traces, id)
        .await?
        .ok_or_else(|| TraceDeckError::not_found("capture", id))?;
    job.retraces = capture_retraces(store, &job.id).await?;
    Ok(job)
}

/// One persisted frame of a capture.
pub async fn get_frame(store: &dyn Store, capture_id: &str, index: usize) -> Result<Frame> {
    let key = frame_key(capture_id, index);
    load(store, Bucket::Frames, &key)
        .await?
        .ok_or_else(|| TraceDeckError::not_found("frame", key))
}

pub async fn get_retrace(store: &dyn Store, trace_id: &str, call_id: &str) -> Result<RetraceJob> {
    let key = retrace_key(trace_id, call_id);
    load(store, Bucket::Retraces, &key)
        .await?
        .ok_or_else(|| TraceDeckError::not_found("retrace", key))
}

/// Location of an image written by an image dump of capture `trace_id`.
pub async fn image_path(store: &dyn Store, trace_id: &str, file_name: &str) -> Result<PathBuf> {
    if file_name.is_empty()
        || file_name.contains(['/', '\\'])
        || file_name == "."
        || file_name == ".."
    {
        return Err(TraceDeckError::validation(format!(
            "invalid image name: {file_name:?}"
        )));
    }
    let capture = get_capture(store, trace_id).await?;
    let path = capture.target_directory.join(file_name);
    if !path.is_file() {
        return Err(TraceDeckError::not_found(
            "image",
            path.display().to_string(),
        ));
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// Reason recorded on jobs whose process went away before they finished.
pub const INTERRUPTED: &str = "interrupted";

/// Fail a capture that is still `Pending` and release its app's gate.
///
/// Used when the task running the capture is gone. A capture that already
/// finished is returned unchanged and the gate is left alone.
#[instrument(skip_all, fields(id = %id))]
pub async fn interrupt_capture(store: &dyn Store, id: &str, reason: &str) -> Result<CaptureJob> {
    let mut job = get_capture(store, id).await?;
    if job.status != JobStatus::Pending {
        return Ok(job);
    }
    job.status = JobStatus::Failed {
        reason: reason.to_string(),
    };
    job.finished_at = Some(Utc::now());
    save(store, Bucket::Traces, &job.id, &job).await?;
    store.clear_active(&job.app_id).await?;
    warn!(app_id = %job.app_id, reason, "capture interrupted");
    Ok(job)
}

/// Fail a retrace that is still `Pending`.
#[instrument(skip_all, fields(trace_id = %trace_id, call_id = %call_id))]
pub async fn interrupt_retrace(
    store: &dyn Store,
    trace_id: &str,
    call_id: &str,
    reason: &str,
) -> Result<RetraceJob> {
    let mut job = get_retrace(store, trace_id, call_id).await?;
    if job.status != JobStatus::Pending {
        return Ok(job);
    }
    job.status = JobStatus::Failed {
        reason: reason.to_string(),
    };
    job.finished_at = Some(Utc::now());
    save(store, Bucket::Retraces, &job.id, &job).await?;
    warn!(reason, "retrace interrupted");
    Ok(job)
}

/// Fail every `Pending` capture of an app and release its gate.
///
/// Only safe when no process is running a capture of the app. Returns the
/// ids of the captures that were failed.
#[instrument(skip_all, fields(app_id = %app_id))]
pub async fn unlock_app(store: &dyn Store, app_id: &str, reason: &str) -> Result<Vec<String>> {
    let app = get_app(store, app_id).await?;
    let mut failed = Vec::new();
    for id in &app.traces {
        let job = get_capture(store, id).await?;
        if job.status == JobStatus::Pending {
            interrupt_capture(store, id, reason).await?;
            failed.push(job.id);
        }
    }
    store.clear_active(&app.id).await?;
    info!(failed = failed.len(), "app unlocked");
    Ok(failed)
}
