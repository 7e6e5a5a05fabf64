//! tracedeck CLI: register apps, capture their GL traces and retrace calls.
//!
//! Wraps the apitrace tool chain in durable capture and retrace jobs whose
//! results are stored locally and printed as JSON.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
