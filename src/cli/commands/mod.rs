//! CLI command implementations for loopcast
//!
//! This module contains the implementation of CLI commands including
//! list and serve functionality.

mod list;
mod serve;

pub use list::ListCommand;
pub use serve::ServeCommand;

use crate::error::Result;
use clap::Subcommand;
use simple_logger::SimpleLogger;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan and list renderers in the network capable of playing media
    List(super::List),

    /// Keep every discovered renderer playing the given videos
    Serve(super::Serve),
}

impl Commands {
    /// Execute the command
    pub async fn run(&self, cli: &super::Cli) -> Result<()> {
        let config = match self {
            Self::List(_) => cli.build_config(None),
            Self::Serve(serve) => cli.build_config(Some(serve)),
        };
        SimpleLogger::new()
            .with_level(config.log_level)
            .init()
            .unwrap_or_else(|_| eprintln!("Warning: Logger already initialized"));

        match self {
            Self::List(list) => ListCommand::new(list).run().await?,
            Self::Serve(serve) => ServeCommand::new(serve).run(config).await?,
        }
        Ok(())
    }
}
