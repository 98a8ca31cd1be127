//! CLI argument parsing for loopcast
//!
//! This module contains the CLI argument definitions and parsing logic
//! using the clap crate.

use crate::config::{
    Config, DEFAULT_MEDIA_PORT_HIGH, DEFAULT_MEDIA_PORT_LOW, DEFAULT_SEARCH_INTERVAL_SECS,
    DEFAULT_SUPERVISOR_TICK_SECS,
};
use clap::{Args, Parser};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

/// Keeps UPnP/DLNA media renderers playing their assigned videos
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level
    #[arg(long, value_name = "LEVEL", global = true, default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,

    /// The command to execute
    #[command(subcommand)]
    pub command: super::Commands,
}

impl Cli {
    /// Build a Config from CLI arguments
    pub fn build_config(&self, serve_cmd: Option<&Serve>) -> Config {
        let mut config = Config::new().with_log_level(self.log_level);

        if let Some(serve) = serve_cmd {
            config = config
                .with_media_port_range(serve.port_low, serve.port_high)
                .with_search_interval(Duration::from_secs(serve.search_interval))
                .with_supervisor_tick(Duration::from_secs(serve.tick));
            if let Some(host) = &serve.host {
                config = config.with_media_host(host.clone());
            }
        }

        config
    }
}

/// List command arguments
#[derive(Args)]
pub struct List {
    /// Time in seconds to search and discover renderers
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
}

/// Serve command arguments
#[derive(Args)]
pub struct Serve {
    /// The hostname or IP to serve the files on (if not provided we derive it from the local network address)
    #[arg(short = 'H', long = "host")]
    pub host: Option<String>,

    /// First port tried for the media server
    #[arg(long, default_value_t = DEFAULT_MEDIA_PORT_LOW)]
    pub port_low: u16,

    /// Last port tried for the media server
    #[arg(long, default_value_t = DEFAULT_MEDIA_PORT_HIGH)]
    pub port_high: u16,

    /// Seconds between discovery sweeps
    #[arg(long, default_value_t = DEFAULT_SEARCH_INTERVAL_SECS)]
    pub search_interval: u64,

    /// Seconds between supervisor ticks
    #[arg(long, default_value_t = DEFAULT_SUPERVISOR_TICK_SECS)]
    pub tick: u64,

    /// Play each video once instead of looping it
    #[arg(long)]
    pub no_loop: bool,

    /// The video file or directory of videos to keep renderers playing
    #[arg(long)]
    pub path: PathBuf,
}
