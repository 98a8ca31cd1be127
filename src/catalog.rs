//! Collaborator interfaces of the loopcast core.
//!
//! The core does not own the video catalog or the event pipeline; it talks to
//! them through [`Catalog`] and [`EventSink`]. [`MemoryCatalog`] and
//! [`LogSink`] are the in-process implementations used by the CLI and by
//! tests.

use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::devices::RendererStatus;
use crate::error::{Error, Result};
use crate::utils::{dlna_profile_for_mime, infer_subtitle_from_video, mime_type_for_path};

/// An immutable snapshot of a catalog video, held by the core for the
/// duration of an assignment.
#[derive(Debug, Clone)]
pub struct VideoSnapshot {
    /// Catalog id of the video
    pub id: String,
    /// Absolute path of the local file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Duration in seconds when the catalog knows it
    pub duration_secs: Option<f64>,
    /// Container MIME type
    pub mime: String,
    /// DLNA profile string, e.g. `AVC_MP4_HP_HD_AAC`
    pub dlna_profile: Option<String>,
    /// Sidecar subtitle file, when present
    pub subtitle: Option<PathBuf>,
}

impl VideoSnapshot {
    /// Builds a snapshot from a local file, inferring MIME, DLNA profile and
    /// subtitle sidecar from the path.
    pub fn from_path(id: impl Into<String>, path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|_| Error::FileMissing {
            path: path.display().to_string(),
        })?;
        let mime = mime_type_for_path(path);
        let dlna_profile = dlna_profile_for_mime(&mime).map(str::to_string);

        Ok(Self {
            id: id.into(),
            path: path.to_path_buf(),
            size: metadata.len(),
            duration_secs: None,
            mime,
            dlna_profile,
            subtitle: infer_subtitle_from_video(path),
        })
    }
}

/// An assignment the catalog wants restored at startup or on renderer
/// reappearance.
#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    /// Target renderer
    pub renderer_id: String,
    /// Video to play
    pub video_id: String,
    /// Assignment priority
    pub priority: i32,
    /// Whether playback loops indefinitely
    pub looped: bool,
}

/// The catalog collaborator. Calls are expected to be fast and local; the
/// core is allowed to block on them.
pub trait Catalog: Send + Sync {
    /// Fetches an immutable snapshot of a video.
    fn video(&self, id: &str) -> Result<VideoSnapshot>;

    /// Assignments to restore when the core starts.
    fn startup_assignments(&self) -> Vec<AssignmentRequest>;

    /// Records observed renderer status back into the catalog.
    fn record_status(&self, renderer_id: &str, status: RendererStatus, last_seen: SystemTime);
}

/// Why a supervisor restarted playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The renderer reported STOPPED and the assignment loops
    Stopped,
    /// Playback position froze while the transport claimed PLAYING
    Stalled,
    /// Position approached end-of-media on a renderer that never stops
    NearEnd,
    /// The transport reported NO_MEDIA_PRESENT
    MediaLost,
}

/// Structured events fanned out to the [`EventSink`].
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A renderer appeared on the network for the first time
    Discovered {
        renderer_id: String,
        friendly_name: String,
    },
    /// A renderer is reachable again (or freshly registered)
    Connected { renderer_id: String },
    /// A renderer vanished from the network
    Disconnected { renderer_id: String },
    /// An assignment reached PLAYING
    PlaybackStarted {
        renderer_id: String,
        video_id: String,
    },
    /// A supervisor restarted playback
    PlaybackRestarted {
        renderer_id: String,
        video_id: String,
        reason: RestartReason,
    },
    /// An assignment exhausted its retries
    PlaybackFailed {
        renderer_id: String,
        video_id: String,
        attempts: u32,
    },
    /// An assignment lost its renderer to a higher priority one
    AssignmentSuperseded {
        renderer_id: String,
        video_id: String,
        by_priority: i32,
    },
}

/// Receives core events. Delivery is best-effort; implementations must not
/// block.
pub trait EventSink: Send + Sync {
    /// Publishes one event.
    fn publish(&self, event: CoreEvent);
}

/// A [`Catalog`] backed by an in-memory map, used by the CLI and tests.
#[derive(Default)]
pub struct MemoryCatalog {
    videos: Mutex<HashMap<String, VideoSnapshot>>,
    startup: Mutex<Vec<AssignmentRequest>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a video snapshot.
    pub fn add_video(&self, video: VideoSnapshot) {
        self.videos
            .lock()
            .expect("catalog lock poisoned")
            .insert(video.id.clone(), video);
    }

    /// Queues an assignment for startup restoration.
    pub fn add_startup_assignment(&self, request: AssignmentRequest) {
        self.startup
            .lock()
            .expect("catalog lock poisoned")
            .push(request);
    }
}

impl Catalog for MemoryCatalog {
    fn video(&self, id: &str) -> Result<VideoSnapshot> {
        self.videos
            .lock()
            .expect("catalog lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownVideo {
                video_id: id.to_string(),
            })
    }

    fn startup_assignments(&self) -> Vec<AssignmentRequest> {
        self.startup.lock().expect("catalog lock poisoned").clone()
    }

    fn record_status(&self, _renderer_id: &str, _status: RendererStatus, _last_seen: SystemTime) {}
}

/// An [`EventSink`] that forwards events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: CoreEvent) {
        info!("event: {event:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_catalog_lookup() {
        let catalog = MemoryCatalog::new();
        let mut file = tempfile::NamedTempFile::with_suffix(".mp4").unwrap();
        file.write_all(b"not really a video").unwrap();

        let video = VideoSnapshot::from_path("v1", file.path()).unwrap();
        assert_eq!(video.mime, "video/mp4");
        assert_eq!(video.size, 18);
        catalog.add_video(video);

        assert!(catalog.video("v1").is_ok());
        assert!(matches!(
            catalog.video("missing"),
            Err(Error::UnknownVideo { .. })
        ));
    }

    #[test]
    fn test_snapshot_from_missing_path() {
        let result = VideoSnapshot::from_path("v1", Path::new("/does/not/exist.mp4"));
        assert!(matches!(result, Err(Error::FileMissing { .. })));
    }
}
