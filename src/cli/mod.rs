//! Command line interface for loopcast
//!
//! This module provides the CLI argument parsing and command execution
//! for the loopcast renderer-keeping daemon.

mod args;
mod commands;

pub use args::{Cli, List, Serve};
pub use commands::Commands;

use crate::error::Result;
use clap::Parser;

/// Run the CLI application
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.command.run(&cli).await
}
