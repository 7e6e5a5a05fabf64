//! Shared types, error model, and configuration for tracedeck.
//!
//! This crate is the foundation depended on by all other tracedeck crates.
//! It provides:
//! - [`TraceDeckError`]: the unified error type
//! - Domain types ([`App`], [`AppSpec`], [`JobStatus`], [`StepLog`]) and key helpers
//! - Configuration ([`AppConfig`], [`PipelineSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, PipelineSettings, ToolsConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{Result, TraceDeckError};
pub use types::{
    App, AppSpec, AppSummary, JobStatus, StepLog, capture_key, frame_key, retrace_key,
};
