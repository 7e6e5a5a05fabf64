//! Retrace flow: replay a capture up to one call, optionally dumping images.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracedeck_parsers::{decode_retrace, parse_image_manifest};
use tracedeck_shared::{App, JobStatus, Result, StepLog, TraceDeckError, retrace_key};
use tracedeck_storage::{Bucket, save};
use tracing::{error, info, instrument};

use crate::jobs::{RetraceJob, Started};
use crate::observer::Step;
use crate::pipeline::Orchestrator;
use crate::registry::{get_app, get_capture};
use crate::tools::Toolbox;

impl Orchestrator {
    /// Start a retrace of `call_id` in capture `trace_id`.
    ///
    /// The capture must have completed. Each call can be retraced once; a
    /// second request for the same call fails with `Conflict`.
    #[instrument(skip_all, fields(trace_id = %trace_id, call_id = %call_id))]
    pub async fn start_retrace(
        &self,
        trace_id: &str,
        call_id: &str,
    ) -> Result<Started<RetraceJob>> {
        if call_id.is_empty() || !call_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(TraceDeckError::validation(format!(
                "call id must be a call number, got {call_id:?}"
            )));
        }

        let capture = get_capture(self.store(), trace_id).await?;
        if capture.status != JobStatus::Complete {
            return Err(TraceDeckError::conflict(format!(
                "capture {trace_id} is {}, not complete",
                capture.status
            )));
        }
        let trace_file = capture.trace_file.clone().ok_or_else(|| {
            TraceDeckError::conflict(format!("capture {trace_id} has no trace file"))
        })?;
        let app = get_app(self.store(), &capture.app_id).await?;

        let job = RetraceJob::pending(retrace_key(trace_id, call_id), &app.id, trace_id, call_id);
        let json = serde_json::to_string(&job)?;
        if !self.store.insert_new(Bucket::Retraces, &job.id, &json).await? {
            return Err(TraceDeckError::conflict(format!(
                "call {call_id} of {trace_id} has already been retraced"
            )));
        }
        info!(job_id = %job.id, "retrace started");

        let this = self.clone();
        let task = tokio::spawn(this.run_retrace(
            job.clone(),
            app,
            capture.target_directory,
            trace_file,
        ));
        Ok(Started { job, task })
    }

    #[instrument(skip_all, fields(job_id = %job.id))]
    async fn run_retrace(self, mut job: RetraceJob, app: App, dir: PathBuf, trace_file: String) {
        job.status = match self.retrace_steps(&mut job, &app, &dir, &trace_file).await {
            Ok(()) => {
                info!(images = job.image_set.is_some(), "retrace complete");
                JobStatus::Complete
            }
            Err(e) => {
                error!(error = %e, "retrace failed");
                JobStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };
        job.finished_at = Some(Utc::now());

        if let Err(e) = save(self.store(), Bucket::Retraces, &job.id, &job).await {
            error!(error = %e, "could not persist retrace result");
        }
        self.observer.job_finished(&job.id, &job.status);
    }

    async fn retrace_steps(
        &self,
        job: &mut RetraceJob,
        app: &App,
        dir: &Path,
        trace_file: &str,
    ) -> Result<()> {
        let tools = Toolbox::new(&self.settings.tools, app);

        let retraced = self
            .run_step(
                &job.id,
                Step::Retrace,
                dir,
                &tools.retrace(trace_file, &job.call_id),
                &mut job.retrace,
                &[],
            )
            .await?;
        job.retrace.stdout.clear();
        job.retrace_data = decode_retrace(&retraced.stdout);

        if app.dump_images {
            let mut log = StepLog::default();
            let dumped = self
                .run_step(
                    &job.id,
                    Step::DumpImages,
                    dir,
                    &tools.dump_images(trace_file, &job.call_id),
                    &mut log,
                    &[],
                )
                .await;
            job.image_dump = Some(log);
            job.image_set = Some(parse_image_manifest(&dumped?.stdout));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::get_retrace;
    use crate::testing::{Harness, Script, exited, ok_output};
    use tracedeck_parsers::AttrValue;

    #[tokio::test]
    async fn undecodable_output_still_completes() {
        let h = Harness::new(false).await;
        let trace_id = h.completed_capture().await;
        h.runner
            .script(Script::Retrace, ok_output("not json at all", "retrace: 42 calls"));

        let started = h.orchestrator.start_retrace(&trace_id, "42").await.unwrap();
        assert_eq!(started.job.id, "demo-trace-42");
        started.task.await.unwrap();

        let job = get_retrace(h.store(), &trace_id, "42").await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.retrace_data.is_empty());
        assert_eq!(job.retrace.stderr, "retrace: 42 calls");
        assert!(job.image_set.is_none());
        assert!(
            !h.runner
                .commands()
                .iter()
                .any(|c| c.contains("dump-images"))
        );
    }

    #[tokio::test]
    async fn decodes_state_and_records_the_retrace() {
        let h = Harness::new(false).await;
        let trace_id = h.completed_capture().await;
        h.runner.script(
            Script::Retrace,
            ok_output(r#"{"parameters": {"GL_BLEND": true}}"#, ""),
        );

        let started = h.orchestrator.start_retrace(&trace_id, "3").await.unwrap();
        started.task.await.unwrap();

        let job = get_retrace(h.store(), &trace_id, "3").await.unwrap();
        assert_eq!(
            job.retrace_data.parameters.get("GL_BLEND"),
            Some(&AttrValue::Bool(true))
        );
        let capture = get_capture(h.store(), &trace_id).await.unwrap();
        assert_eq!(capture.retraces, vec!["demo-trace-3"]);
        assert!(
            h.runner
                .commands()
                .last()
                .is_some_and(|c| c == "glretrace -v --sb --D=3 --dump-format=json /work/demo/triangle.trace")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_retraces_are_all_linked() {
        let h = Harness::new(false).await;
        let trace_id = h.completed_capture().await;

        let starts: Vec<_> = (1..=8)
            .map(|call| {
                let orchestrator = h.orchestrator.clone();
                let trace_id = trace_id.clone();
                tokio::spawn(async move {
                    orchestrator
                        .start_retrace(&trace_id, &call.to_string())
                        .await
                })
            })
            .collect();
        for start in starts {
            let started = start.await.unwrap().unwrap();
            started.task.await.unwrap();
        }

        let capture = get_capture(h.store(), &trace_id).await.unwrap();
        let expected: Vec<String> = (1..=8).map(|call| format!("{trace_id}-{call}")).collect();
        assert_eq!(capture.retraces, expected);
        assert_eq!(capture.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn image_dump_attaches_the_image_set() {
        let h = Harness::new(true).await;
        let trace_id = h.completed_capture().await;
        h.runner.script(
            Script::DumpImages,
            ok_output("Wrote 7-mrt0.png\nWrote 7-z.png\nWrote 7-s.png\n", ""),
        );

        let started = h.orchestrator.start_retrace(&trace_id, "7").await.unwrap();
        started.task.await.unwrap();

        let job = get_retrace(h.store(), &trace_id, "7").await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        let images = job.image_set.expect("image set");
        assert_eq!(images.call_id, "7");
        assert_eq!(images.mrt, vec!["mrt0"]);
        assert_eq!(images.depth.as_deref(), Some("z"));
        assert_eq!(images.stencil.as_deref(), Some("s"));
        assert!(job.image_dump.is_some());
    }

    #[tokio::test]
    async fn failed_image_dump_fails_the_retrace() {
        let h = Harness::new(true).await;
        let trace_id = h.completed_capture().await;
        h.runner
            .script(Script::DumpImages, exited(1, "", "error: no framebuffer"));

        let started = h.orchestrator.start_retrace(&trace_id, "7").await.unwrap();
        started.task.await.unwrap();

        let job = get_retrace(h.store(), &trace_id, "7").await.unwrap();
        assert!(matches!(job.status, JobStatus::Failed { .. }));
        assert_eq!(
            job.image_dump.map(|log| log.stderr).as_deref(),
            Some("error: no framebuffer")
        );
    }

    #[tokio::test]
    async fn duplicate_retrace_conflicts() {
        let h = Harness::new(false).await;
        let trace_id = h.completed_capture().await;

        let first = h.orchestrator.start_retrace(&trace_id, "42").await.unwrap();
        first.task.await.unwrap();
        let calls = h.runner.commands().len();

        let err = h.orchestrator.start_retrace(&trace_id, "42").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(h.runner.commands().len(), calls);
    }

    #[tokio::test]
    async fn incomplete_capture_conflicts() {
        let h = Harness::new(false).await;
        h.runner.script(Script::Build, exited(1, "", "boom"));
        let started = h.orchestrator.start_capture("demo").await.unwrap();
        started.task.await.unwrap();

        let err = h
            .orchestrator
            .start_retrace(&started.job.id, "1")
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = h.orchestrator.start_retrace("nope", "1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn call_ids_must_be_numbers() {
        let h = Harness::new(false).await;
        let err = h
            .orchestrator
            .start_retrace("demo-trace", "../x")
            .await
            .unwrap_err();
        assert!(matches!(err, TraceDeckError::Validation { .. }));
    }
}
