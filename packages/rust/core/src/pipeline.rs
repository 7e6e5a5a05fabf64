//! Job orchestration shared by the capture and retrace flows.
//!
//! A job is created and persisted `Pending` on the caller's path, then
//! handed to one spawned task that runs its steps strictly in order and
//! writes the final status exactly once.

use std::path::Path;
use std::sync::Arc;

use tracedeck_shared::{PipelineSettings, StepLog};
use tracedeck_storage::Store;
use tracing::{debug, warn};

use crate::fetch::SourceFetcher;
use crate::observer::{JobObserver, SilentObserver, Step};
use crate::runner::{ProcessError, ProcessOutput, ProcessRunner};
use crate::tools::Invocation;

/// Starts capture and retrace jobs and owns their collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    pub(crate) fetcher: Arc<dyn SourceFetcher>,
    pub(crate) settings: Arc<PipelineSettings>,
    pub(crate) observer: Arc<dyn JobObserver>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<dyn ProcessRunner>,
        fetcher: Arc<dyn SourceFetcher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            runner,
            fetcher,
            settings: Arc::new(settings),
            observer: Arc::new(SilentObserver),
        }
    }

    /// Report step progress to `observer` instead of discarding it.
    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one external step, recording its streams into `log` whether it
    /// succeeds or not. Exit codes in `accepted` count as success.
    pub(crate) async fn run_step(
        &self,
        job_id: &str,
        step: Step,
        dir: &Path,
        invocation: &Invocation,
        log: &mut StepLog,
        accepted: &[i32],
    ) -> Result<ProcessOutput, ProcessError> {
        self.observer.step_started(job_id, step);
        debug!(job_id, %step, command = %invocation, "starting step");

        let result = match self
            .runner
            .run(dir, &invocation.command, &invocation.args)
            .await
        {
            Err(ProcessError::Exited {
                code: Some(code),
                output,
                ..
            }) if accepted.contains(&code) => {
                debug!(job_id, %step, code, "accepted exit status");
                Ok(output)
            }
            other => other,
        };

        match &result {
            Ok(output) => *log = output.log(),
            Err(e) => {
                if let Some(output) = e.output() {
                    *log = output.log();
                }
                warn!(job_id, %step, error = %e, "step failed");
            }
        }
        self.observer.step_finished(job_id, step, result.is_ok());
        result
    }
}
