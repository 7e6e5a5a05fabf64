//! Core job pipelines and domain logic for tracedeck.
//!
//! This crate ties the parsers, the store and the external tools together:
//! the [`Orchestrator`] runs capture jobs (fetch, build, trace, dump) and
//! retrace jobs (retrace, optional image dump), and [`registry`] manages
//! apps and looks up stored results.

mod capture;
pub mod fetch;
pub mod jobs;
pub mod observer;
pub mod pipeline;
pub mod registry;
mod retrace;
pub mod runner;
pub mod tools;

#[cfg(test)]
mod testing;

pub use fetch::{FetchError, GitFetcher, SourceFetcher, SshAuth};
pub use jobs::{CaptureJob, RetraceJob, Started};
pub use observer::{JobObserver, SilentObserver, Step};
pub use pipeline::Orchestrator;
pub use runner::{ProcessError, ProcessOutput, ProcessRunner, TokioProcessRunner};
