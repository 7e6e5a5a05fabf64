//! Fake collaborators for pipeline tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracedeck_shared::{AppSpec, JobStatus, PipelineSettings, StepLog, ToolsConfig};
use tracedeck_storage::{Storage, Store};
use uuid::Uuid;

use crate::fetch::{FetchError, SourceFetcher, SshAuth};
use crate::pipeline::Orchestrator;
use crate::registry::{add_app, get_capture};
use crate::runner::{ProcessError, ProcessOutput, ProcessRunner};

pub(crate) const TRACE_STDERR: &str = "\
apitrace: loaded into /work/demo/triangle
apitrace: tracing to /work/demo/triangle.trace
apitrace: unloaded from /work/demo/triangle
";

pub(crate) const THREE_FRAME_DUMP: &str = "\
0 glClear(mask = GL_COLOR_BUFFER_BIT)
1 glXSwapBuffers(dpy = 0x1b2c010, drawable = 79691778)

2 glClear(mask = GL_COLOR_BUFFER_BIT)
3 glXSwapBuffers(dpy = 0x1b2c010, drawable = 79691778)

4 glClear(mask = GL_COLOR_BUFFER_BIT)

";

pub(crate) async fn test_storage() -> Arc<Storage> {
    let tmp = std::env::temp_dir().join(format!("td_core_{}.db", Uuid::now_v7()));
    Arc::new(Storage::open(&tmp).await.expect("open test db"))
}

pub(crate) fn app_spec(name: &str) -> AppSpec {
    AppSpec {
        name: name.into(),
        url: "https://example.com/demo.git".into(),
        build_script: "build.sh".into(),
        executable: "triangle".into(),
        ..AppSpec::default()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Which tool invocation a scripted response answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Script {
    Build,
    Trace,
    Dump,
    Retrace,
    DumpImages,
}

impl Script {
    fn matches(self, command_line: &str) -> bool {
        match self {
            Self::Build => command_line.starts_with("/bin/sh "),
            Self::Trace => command_line.contains(" trace ./"),
            Self::Dump => command_line.contains(" dump -v "),
            Self::Retrace => command_line.contains("--dump-format=json"),
            Self::DumpImages => command_line.contains(" dump-images "),
        }
    }
}

/// `Err` carries the output of a process that exited unsuccessfully.
pub(crate) type Response = Result<ProcessOutput, ProcessOutput>;

pub(crate) fn ok_output(stdout: &str, stderr: &str) -> Response {
    Ok(ProcessOutput {
        stdout: stdout.into(),
        stderr: stderr.into(),
        code: Some(0),
    })
}

pub(crate) fn exited(code: i32, stdout: &str, stderr: &str) -> Response {
    Err(ProcessOutput {
        stdout: stdout.into(),
        stderr: stderr.into(),
        code: Some(code),
    })
}

#[derive(Default)]
struct FakeRunnerState {
    scripts: HashMap<Script, Response>,
    commands: Vec<String>,
}

/// Runner that answers from scripted responses and records command lines.
/// Unscripted invocations succeed with empty output.
#[derive(Clone, Default)]
pub(crate) struct FakeRunner {
    inner: Arc<Mutex<FakeRunnerState>>,
}

impl FakeRunner {
    pub(crate) fn script(&self, script: Script, response: Response) {
        self.inner.lock().unwrap().scripts.insert(script, response);
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.inner.lock().unwrap().commands.clone()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(
        &self,
        _working_dir: &Path,
        command: &str,
        args: &[String],
    ) -> Result<ProcessOutput, ProcessError> {
        let line = std::iter::once(command)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let mut state = self.inner.lock().unwrap();
        state.commands.push(line.clone());

        let response = state
            .scripts
            .iter()
            .find(|(script, _)| script.matches(&line))
            .map(|(_, response)| response.clone());
        match response {
            Some(Ok(output)) => Ok(output),
            Some(Err(output)) => Err(ProcessError::Exited {
                command: command.to_string(),
                code: output.code,
                output,
            }),
            None => Ok(ProcessOutput {
                code: Some(0),
                ..ProcessOutput::default()
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeFetcherState {
    calls: Vec<String>,
    failure: Option<String>,
}

/// Fetcher that creates an empty checkout directory, or fails on request.
#[derive(Clone, Default)]
pub(crate) struct FakeFetcher {
    inner: Arc<Mutex<FakeFetcherState>>,
}

impl FakeFetcher {
    pub(crate) fn fail_with(&self, stderr: &str) {
        self.inner.lock().unwrap().failure = Some(stderr.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(
        &self,
        _auth: Option<&SshAuth>,
        url: &str,
        target_dir: &Path,
        _branch: &str,
    ) -> Result<StepLog, FetchError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(url.to_string());
        if let Some(stderr) = &state.failure {
            let output = ProcessOutput {
                stdout: String::new(),
                stderr: stderr.clone(),
                code: Some(128),
            };
            return Err(FetchError::Clone {
                url: url.to_string(),
                source: ProcessError::Exited {
                    command: "git".into(),
                    code: output.code,
                    output,
                },
            });
        }
        std::fs::create_dir_all(target_dir).unwrap();
        Ok(StepLog {
            stdout: String::new(),
            stderr: format!("Cloning into '{}'...\n", target_dir.display()),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// An orchestrator over fakes and a fresh database holding app `demo`.
pub(crate) struct Harness {
    pub store: Arc<Storage>,
    pub runner: FakeRunner,
    pub fetcher: FakeFetcher,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub(crate) async fn new(dump_images: bool) -> Self {
        let store = test_storage().await;
        let mut spec = app_spec("demo");
        spec.dump_images = dump_images;
        add_app(store.as_ref(), spec, 10).await.unwrap();

        let runner = FakeRunner::default();
        let fetcher = FakeFetcher::default();
        let settings = PipelineSettings {
            work_root: std::env::temp_dir().join(format!("td_work_{}", Uuid::now_v7())),
            default_timeout_secs: 10,
            tools: ToolsConfig::default(),
        };
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(runner.clone()),
            Arc::new(fetcher.clone()),
            settings,
        );
        Self {
            store,
            runner,
            fetcher,
            orchestrator,
        }
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Run a successful three-frame capture of `demo` and return its id.
    pub(crate) async fn completed_capture(&self) -> String {
        self.runner
            .script(Script::Trace, exited(124, "", TRACE_STDERR));
        self.runner
            .script(Script::Dump, ok_output(THREE_FRAME_DUMP, ""));
        let started = self.orchestrator.start_capture("demo").await.unwrap();
        started.task.await.unwrap();
        let job = get_capture(self.store(), &started.job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        job.id
    }
}
