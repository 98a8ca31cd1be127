//! Serve command implementation for loopcast
//!
//! Runs the full control plane: discovery, assignment and supervision, with
//! an in-memory catalog built from the videos on the command line. Every
//! renderer that appears is assigned a video round-robin and kept playing it
//! until interrupted.

use crate::{
    catalog::{CoreEvent, EventSink, MemoryCatalog, VideoSnapshot},
    config::Config,
    control::Controller,
    devices::SsdpDiscovery,
    error::{Error, Result},
    utils::{is_supported_video_file, sanitize_filename_for_url},
};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Serve command implementation
pub struct ServeCommand<'a> {
    args: &'a super::super::Serve,
}

/// Forwards core events into the serve loop while logging them.
struct ForwardingSink {
    tx: mpsc::UnboundedSender<CoreEvent>,
}

impl EventSink for ForwardingSink {
    fn publish(&self, event: CoreEvent) {
        info!("event: {event:?}");
        let _ = self.tx.send(event);
    }
}

impl<'a> ServeCommand<'a> {
    /// Create a new serve command
    pub fn new(args: &'a super::super::Serve) -> Self {
        Self { args }
    }

    /// Execute the serve command
    pub async fn run(&self, config: Config) -> Result<()> {
        let catalog = Arc::new(MemoryCatalog::new());
        let video_ids = collect_videos(&self.args.path, &catalog)?;
        info!("Serving {} video(s)", video_ids.len());

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let controller = Controller::new(
            config.clone(),
            catalog.clone(),
            Arc::new(ForwardingSink { tx: event_tx }),
        )
        .await?;
        info!("Media server at {}", controller.media_base_url());

        let (discovery, discovery_events) = SsdpDiscovery::start(&config);
        let event_loop = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run(discovery_events).await })
        };

        // Hand each newly discovered renderer the next video, round-robin
        let looped = !self.args.no_loop;
        let assigner = {
            let controller = controller.clone();
            let cursor = AtomicUsize::new(0);
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    let CoreEvent::Discovered { renderer_id, .. } = event else {
                        continue;
                    };
                    let index = cursor.fetch_add(1, Ordering::Relaxed) % video_ids.len();
                    let video_id = &video_ids[index];
                    if let Err(e) = controller.assign(&renderer_id, video_id, 50, looped).await {
                        warn!("Could not assign '{video_id}' to '{renderer_id}': {e}");
                    }
                }
            })
        };

        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| warn!("Could not listen for ctrl-c: {e}"));
        info!("Shutting down");

        discovery.stop().await;
        controller.shutdown().await;
        event_loop.abort();
        assigner.abort();
        Ok(())
    }
}

/// Loads the video file (or every supported video in the directory) into the
/// catalog and returns the video ids.
fn collect_videos(path: &Path, catalog: &MemoryCatalog) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    if path.is_dir() {
        let entries = std::fs::read_dir(path).map_err(|_| Error::FileMissing {
            path: path.display().to_string(),
        })?;
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if is_supported_video_file(&entry_path) {
                paths.push(entry_path);
            }
        }
        paths.sort();
    } else {
        paths.push(path.to_path_buf());
    }

    if paths.is_empty() {
        return Err(Error::FileMissing {
            path: path.display().to_string(),
        });
    }

    let mut video_ids = Vec::new();
    for video_path in paths {
        let id = video_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(sanitize_filename_for_url)
            .unwrap_or_else(|| format!("video-{}", video_ids.len()));
        let video = VideoSnapshot::from_path(id.as_str(), &video_path)?;
        catalog.add_video(video);
        video_ids.push(id);
    }
    Ok(video_ids)
}
