//! Application configuration for tracedeck.
//!
//! User config lives at `~/.tracedeck/tracedeck.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceDeckError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tracedeck.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tracedeck";

// ---------------------------------------------------------------------------
// Config structs (matching tracedeck.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// External tool locations.
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Database file. A leading `~/` expands to the home directory.
    #[serde(default = "default_database")]
    pub database: String,

    /// Directory under which each capture gets its own checkout.
    #[serde(default = "default_work_root")]
    pub work_root: String,

    /// Trace timeout applied to apps that do not set their own.
    #[serde(default = "default_trace_timeout")]
    pub trace_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            work_root: default_work_root(),
            trace_timeout_secs: default_trace_timeout(),
        }
    }
}

fn default_database() -> String {
    "~/.tracedeck/tracedeck.db".into()
}
fn default_work_root() -> String {
    "/tmp/tracedeck".into()
}
fn default_trace_timeout() -> u64 {
    10
}

/// `[tools]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// apitrace binary (trace, dump, dump-images).
    #[serde(default = "default_apitrace")]
    pub apitrace: String,

    /// Retrace binary emitting JSON state dumps.
    #[serde(default = "default_glretrace")]
    pub glretrace: String,

    /// git binary used for checkouts.
    #[serde(default = "default_git")]
    pub git: String,

    /// Shell used to run build scripts.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Utility bounding the trace step's wall-clock time.
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            apitrace: default_apitrace(),
            glretrace: default_glretrace(),
            git: default_git(),
            shell: default_shell(),
            timeout: default_timeout(),
        }
    }
}

fn default_apitrace() -> String {
    "apitrace".into()
}
fn default_glretrace() -> String {
    "glretrace".into()
}
fn default_git() -> String {
    "git".into()
}
fn default_shell() -> String {
    "/bin/sh".into()
}
fn default_timeout() -> String {
    "timeout".into()
}

// ---------------------------------------------------------------------------
// Pipeline settings (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime settings for the job pipelines.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Root directory for per-capture checkouts.
    pub work_root: PathBuf,
    /// Trace timeout for apps that do not set one.
    pub default_timeout_secs: u64,
    /// Tool binaries.
    pub tools: ToolsConfig,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            work_root: expand_home(&config.defaults.work_root),
            default_timeout_secs: config.defaults.trace_timeout_secs,
            tools: config.tools.clone(),
        }
    }
}

impl AppConfig {
    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.defaults.database)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tracedeck/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TraceDeckError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tracedeck/tracedeck.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TraceDeckError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TraceDeckError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TraceDeckError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TraceDeckError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TraceDeckError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
