//! Capture flow: fetch, build, trace, dump.

use chrono::Utc;
use tracedeck_parsers::{find_trace_file, parse_dump};
use tracedeck_shared::{App, JobStatus, Result, TraceDeckError, capture_key, frame_key};
use tracedeck_storage::{Bucket, save};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::fetch::SshAuth;
use crate::jobs::{CaptureJob, Started};
use crate::observer::Step;
use crate::pipeline::Orchestrator;
use crate::registry::get_app;
use crate::tools::{TIMEOUT_EXPIRED, Toolbox};

impl Orchestrator {
    /// Start a capture of `app_id`.
    ///
    /// Fails with `Conflict` while another capture of the app is running; in
    /// that case nothing is persisted and no task is spawned.
    #[instrument(skip_all, fields(app_id = %app_id))]
    pub async fn start_capture(&self, app_id: &str) -> Result<Started<CaptureJob>> {
        let app = get_app(self.store(), app_id).await?;

        if !self.store.try_set_active(&app.id).await? {
            return Err(TraceDeckError::conflict(format!(
                "a capture of app {} is already running",
                app.id
            )));
        }

        let (job, app) = match self.create_capture(app).await {
            Ok(created) => created,
            Err(e) => {
                if let Err(clear) = self.store.clear_active(app_id).await {
                    error!(error = %clear, "could not release capture gate");
                }
                return Err(e);
            }
        };
        info!(job_id = %job.id, dir = %job.target_directory.display(), "capture started");

        let this = self.clone();
        let task = tokio::spawn(this.run_capture(job.clone(), app));
        Ok(Started { job, task })
    }

    async fn create_capture(&self, app: App) -> Result<(CaptureJob, App)> {
        let id = self
            .store
            .reserve_unique_key(Bucket::Traces, &capture_key(&app.id))
            .await?;
        let target = self
            .settings
            .work_root
            .join(format!("{}-{}", app.id, Uuid::now_v7()));

        let job = CaptureJob::pending(id, &app.id, &app.name, target);
        save(self.store(), Bucket::Traces, &job.id, &job).await?;
        Ok((job, app))
    }

    #[instrument(skip_all, fields(job_id = %job.id))]
    async fn run_capture(self, mut job: CaptureJob, app: App) {
        job.status = match self.capture_steps(&mut job, &app).await {
            Ok(()) => {
                info!(frames = job.number_of_frames, "capture complete");
                JobStatus::Complete
            }
            Err(e) => {
                error!(error = %e, "capture failed");
                JobStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };
        job.finished_at = Some(Utc::now());

        if let Err(e) = save(self.store(), Bucket::Traces, &job.id, &job).await {
            error!(error = %e, "could not persist capture result");
        }
        if let Err(e) = self.store.clear_active(&job.app_id).await {
            error!(error = %e, "could not release capture gate");
        }
        self.observer.job_finished(&job.id, &job.status);
    }

    async fn capture_steps(&self, job: &mut CaptureJob, app: &App) -> Result<()> {
        let work_root = &self.settings.work_root;
        std::fs::create_dir_all(work_root).map_err(|e| TraceDeckError::io(work_root, e))?;

        // fetch
        let auth = match (&app.user, &app.private_key) {
            (Some(user), Some(key)) => Some(SshAuth {
                user: user.clone(),
                private_key: key.clone(),
            }),
            _ => None,
        };
        self.observer.step_started(&job.id, Step::Fetch);
        let fetched = self
            .fetcher
            .fetch(auth.as_ref(), &app.url, &job.target_directory, &app.branch)
            .await;
        self.observer.step_finished(&job.id, Step::Fetch, fetched.is_ok());
        job.fetch = match fetched {
            Ok(log) => log,
            Err(e) => {
                job.fetch = e.log();
                return Err(e.into());
            }
        };

        let tools = Toolbox::new(&self.settings.tools, app);
        let dir = job.target_directory.clone();

        // build
        self.run_step(&job.id, Step::Build, &dir, &tools.build(), &mut job.build, &[])
            .await?;

        // trace; the timer expiring is the normal way out
        let traced = self
            .run_step(
                &job.id,
                Step::Trace,
                &dir,
                &tools.trace(),
                &mut job.trace,
                &[TIMEOUT_EXPIRED],
            )
            .await?;
        let trace_file = find_trace_file(&traced.stderr).ok_or_else(|| {
            TraceDeckError::Process("tracer did not report a trace file".into())
        })?;
        job.trace_file = Some(trace_file.clone());

        // dump
        let dumped = self
            .run_step(
                &job.id,
                Step::Dump,
                &dir,
                &tools.dump(&trace_file),
                &mut job.dump,
                &[],
            )
            .await?;
        job.dump.stdout.clear();

        let mut dump = parse_dump(&dumped.stdout);
        // The trace was cut off by the timer, so its last frame may be partial.
        if let Some(last) = dump.frames.pop() {
            warn!(frame = last.id, calls = last.calls.len(), "dropping trailing frame");
        }
        for frame in &dump.frames {
            save(
                self.store(),
                Bucket::Frames,
                &frame_key(&job.id, frame.id),
                frame,
            )
            .await?;
        }
        job.number_of_frames = dump.frames.len();
        Ok(())
    }
}
