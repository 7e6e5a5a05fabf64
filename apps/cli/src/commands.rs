//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracedeck_core::{
    GitFetcher, JobObserver, Orchestrator, Step, TokioProcessRunner, registry,
};
use tracedeck_shared::{
    AppConfig, AppSpec, JobStatus, PipelineSettings, init_config, load_config, load_config_from,
};
use tracedeck_storage::{Storage, Store};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// tracedeck: capture and inspect apitrace GL traces.
#[derive(Parser)]
#[command(
    name = "tracedeck",
    version,
    about = "Capture GL traces of an app's build and inspect them call by call.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.tracedeck/tracedeck.toml).
    #[arg(long, global = true, env = "TRACEDECK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Manage registered apps.
    App {
        #[command(subcommand)]
        action: AppAction,
    },

    /// Fetch, build and trace an app, then store its dump. Waits for the
    /// capture to finish.
    Capture {
        /// App id.
        app: String,
    },

    /// Inspect capture jobs.
    Trace {
        #[command(subcommand)]
        action: TraceAction,
    },

    /// Print one stored frame of a capture.
    Frame {
        /// Capture id.
        trace: String,
        /// Frame index, from 0.
        index: usize,
    },

    /// Retrace a call of a finished capture.
    Retrace {
        #[command(subcommand)]
        action: RetraceAction,
    },

    /// Print the path of an image written by a retrace.
    Image {
        /// Capture id.
        trace: String,
        /// Image file name, e.g. `42-mrt0.png`.
        file: String,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum AppAction {
    /// Register a new app.
    Add(AppArgs),
    /// Replace an app's settings.
    Update {
        /// App id.
        id: String,
        #[command(flatten)]
        args: AppArgs,
    },
    /// Show one app.
    Show { id: String },
    /// List all apps.
    List,
    /// Fail the app's unfinished captures and release its capture gate.
    /// Only use this when no capture of the app is running.
    Unlock { id: String },
}

/// Editable app settings.
#[derive(Args)]
pub(crate) struct AppArgs {
    /// Display name; the id is derived from it.
    #[arg(long)]
    pub name: String,
    /// Repository URL.
    #[arg(long)]
    pub url: String,
    /// Build script, run with the configured shell from the checkout root.
    #[arg(long)]
    pub build_script: String,
    /// Executable to trace, relative to the checkout root.
    #[arg(long)]
    pub executable: String,
    #[arg(long, default_value = "")]
    pub description: String,
    /// Branch to check out (default: the remote's default branch).
    #[arg(long, default_value = "")]
    pub branch: String,
    /// SSH user for private repositories.
    #[arg(long, requires = "private_key")]
    pub user: Option<String>,
    /// SSH private key for private repositories.
    #[arg(long, requires = "user")]
    pub private_key: Option<PathBuf>,
    /// apitrace binary for this app.
    #[arg(long)]
    pub api_trace: Option<String>,
    /// glretrace binary for this app.
    #[arg(long)]
    pub retrace: Option<String>,
    /// Trace timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Dump rendered images on retrace.
    #[arg(long)]
    pub dump_images: bool,
}

impl From<AppArgs> for AppSpec {
    fn from(args: AppArgs) -> Self {
        Self {
            name: args.name,
            description: args.description,
            url: args.url,
            branch: args.branch,
            user: args.user,
            private_key: args.private_key,
            build_script: args.build_script,
            executable: args.executable,
            api_trace: args.api_trace,
            retrace: args.retrace,
            timeout_secs: args.timeout,
            dump_images: args.dump_images,
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum TraceAction {
    /// List all captures.
    List,
    /// Show one capture.
    Show { id: String },
}

#[derive(Subcommand)]
pub(crate) enum RetraceAction {
    /// Retrace a call and wait for the result.
    Run { trace: String, call: String },
    /// Show a stored retrace.
    Show { trace: String, call: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "tracedeck=info",
        1 => "tracedeck=debug",
        _ => "tracedeck=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout carries the JSON documents; logs go to stderr.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::App { action } => match action {
            AppAction::Add(args) => cmd_app_add(&config, args.into()).await,
            AppAction::Update { id, args } => cmd_app_update(&config, &id, args.into()).await,
            AppAction::Show { id } => cmd_app_show(&config, &id).await,
            AppAction::List => cmd_app_list(&config).await,
            AppAction::Unlock { id } => cmd_app_unlock(&config, &id).await,
        },
        Command::Capture { app } => cmd_capture(&config, &app).await,
        Command::Trace { action } => match action {
            TraceAction::List => cmd_trace_list(&config).await,
            TraceAction::Show { id } => cmd_trace_show(&config, &id).await,
        },
        Command::Frame { trace, index } => cmd_frame(&config, &trace, index).await,
        Command::Retrace { action } => match action {
            RetraceAction::Run { trace, call } => cmd_retrace_run(&config, &trace, &call).await,
            RetraceAction::Show { trace, call } => {
                cmd_retrace_show(&config, &trace, &call).await
            }
        },
        Command::Image { trace, file } => cmd_image(&config, &trace, &file).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_store(config: &AppConfig) -> Result<Arc<Storage>> {
    Ok(Arc::new(Storage::open(&config.database_path()).await?))
}

async fn open_store_readonly(config: &AppConfig) -> Result<Storage> {
    Ok(Storage::open_readonly(&config.database_path()).await?)
}

fn orchestrator(config: &AppConfig, store: Arc<Storage>) -> Orchestrator {
    let settings = PipelineSettings::from(config);
    let runner = Arc::new(TokioProcessRunner);
    let fetcher = Arc::new(GitFetcher::new(settings.tools.git.clone(), runner.clone()));
    Orchestrator::new(store, runner, fetcher, settings).with_observer(Arc::new(CliProgress::new()))
}

fn ensure_finished(kind: &str, id: &str, status: &JobStatus) -> Result<()> {
    match status {
        JobStatus::Failed { reason } => Err(eyre!("{kind} {id} failed: {reason}")),
        JobStatus::Pending => Err(eyre!("{kind} {id} did not finish")),
        JobStatus::Complete => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// App commands
// ---------------------------------------------------------------------------

async fn cmd_app_add(config: &AppConfig, spec: AppSpec) -> Result<()> {
    let store = open_store(config).await?;
    let app = registry::add_app(store.as_ref(), spec, config.defaults.trace_timeout_secs).await?;
    print_json(&app)
}

async fn cmd_app_update(config: &AppConfig, id: &str, spec: AppSpec) -> Result<()> {
    let store = open_store(config).await?;
    let app =
        registry::update_app(store.as_ref(), id, spec, config.defaults.trace_timeout_secs).await?;
    print_json(&app)
}

async fn cmd_app_show(config: &AppConfig, id: &str) -> Result<()> {
    let store = open_store_readonly(config).await?;
    print_json(&registry::get_app(&store, id).await?)
}

async fn cmd_app_list(config: &AppConfig) -> Result<()> {
    let store = open_store_readonly(config).await?;
    print_json(&registry::list_apps(&store).await?)
}

async fn cmd_app_unlock(config: &AppConfig, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let failed = registry::unlock_app(store.as_ref(), id, registry::INTERRUPTED).await?;
    print_json(&serde_json::json!({ "app": id, "failed": failed }))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// How waiting on a job task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Finished,
    Interrupted,
}

/// Wait for a job task unless `interrupt` resolves first, in which case the
/// task is aborted. Its tool processes are killed when it is dropped.
async fn wait_for_job<F>(mut task: JoinHandle<()>, interrupt: F) -> Result<Wait>
where
    F: Future<Output = ()>,
{
    let interrupted = tokio::select! {
        joined = &mut task => {
            joined?;
            false
        }
        () = interrupt => true,
    };
    if !interrupted {
        return Ok(Wait::Finished);
    }

    task.abort();
    match task.await {
        Ok(()) => Ok(Wait::Finished),
        Err(e) if e.is_cancelled() => Ok(Wait::Interrupted),
        Err(e) => Err(e.into()),
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn cmd_capture(config: &AppConfig, app_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let orchestrator = orchestrator(config, store.clone());

    let started = orchestrator.start_capture(app_id).await?;
    info!(job_id = %started.job.id, "waiting for capture");

    if wait_for_job(started.task, ctrl_c()).await? == Wait::Interrupted {
        let job =
            registry::interrupt_capture(store.as_ref(), &started.job.id, registry::INTERRUPTED)
                .await?;
        // The gate was taken by this process, and its task is gone.
        store.clear_active(&job.app_id).await?;
        print_json(&job)?;
        return Err(eyre!("capture {} interrupted", job.id));
    }

    let job = registry::get_capture(store.as_ref(), &started.job.id).await?;
    print_json(&job)?;
    ensure_finished("capture", &job.id, &job.status)
}

async fn cmd_retrace_run(config: &AppConfig, trace: &str, call: &str) -> Result<()> {
    let store = open_store(config).await?;
    let orchestrator = orchestrator(config, store.clone());

    let started = orchestrator.start_retrace(trace, call).await?;
    info!(job_id = %started.job.id, "waiting for retrace");

    if wait_for_job(started.task, ctrl_c()).await? == Wait::Interrupted {
        let job =
            registry::interrupt_retrace(store.as_ref(), trace, call, registry::INTERRUPTED).await?;
        print_json(&job)?;
        return Err(eyre!("retrace {} interrupted", job.id));
    }

    let job = registry::get_retrace(store.as_ref(), trace, call).await?;
    print_json(&job)?;
    ensure_finished("retrace", &job.id, &job.status)
}

async fn cmd_trace_list(config: &AppConfig) -> Result<()> {
    let store = open_store_readonly(config).await?;
    print_json(&registry::list_captures(&store).await?)
}

async fn cmd_trace_show(config: &AppConfig, id: &str) -> Result<()> {
    let store = open_store_readonly(config).await?;
    print_json(&registry::get_capture(&store, id).await?)
}

async fn cmd_frame(config: &AppConfig, trace: &str, index: usize) -> Result<()> {
    let store = open_store_readonly(config).await?;
    print_json(&registry::get_frame(&store, trace, index).await?)
}

async fn cmd_retrace_show(config: &AppConfig, trace: &str, call: &str) -> Result<()> {
    let store = open_store_readonly(config).await?;
    print_json(&registry::get_retrace(&store, trace, call).await?)
}

async fn cmd_image(config: &AppConfig, trace: &str, file: &str) -> Result<()> {
    let store = open_store_readonly(config).await?;
    let path = registry::image_path(&store, trace, file).await?;
    println!("{}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Job observer driving an indicatif spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl JobObserver for CliProgress {
    fn step_started(&self, job_id: &str, step: Step) {
        self.spinner.set_message(format!("{job_id}: {step}"));
    }

    fn step_finished(&self, job_id: &str, step: Step, ok: bool) {
        let mark = if ok { "✓" } else { "✗" };
        self.spinner.println(format!("{mark} {job_id}: {step}"));
    }

    fn job_finished(&self, _job_id: &str, _status: &JobStatus) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
