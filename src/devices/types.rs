//! Renderer-related types for loopcast
//!
//! The authoritative in-memory record of a renderer, the wire-level
//! descriptor it is built from, and the transport snapshot the supervisor
//! refreshes on every tick.

use std::time::{Duration, Instant, SystemTime};

use super::render::Render;

/// Lifecycle status of a renderer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererStatus {
    /// Seen on the network, description not yet acted upon
    Discovered,
    /// Reachable and idle
    Connected,
    /// Transport reported PLAYING or TRANSITIONING recently
    Playing,
    /// Transport reported PAUSED_PLAYBACK
    Paused,
    /// Transport reported STOPPED
    Stopped,
    /// Missed too many discovery sweeps or said byebye
    Disconnected,
}

/// AVTransport state as reported by GetTransportInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Playing,
    PausedPlayback,
    Stopped,
    Transitioning,
    NoMediaPresent,
    /// A state string outside the AVTransport:1 vocabulary
    Other(String),
}

impl TransportState {
    /// Parses the CurrentTransportState value of a GetTransportInfo response.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "PLAYING" => TransportState::Playing,
            "PAUSED_PLAYBACK" => TransportState::PausedPlayback,
            "STOPPED" => TransportState::Stopped,
            "TRANSITIONING" => TransportState::Transitioning,
            "NO_MEDIA_PRESENT" => TransportState::NoMediaPresent,
            other => TransportState::Other(other.to_string()),
        }
    }

    /// Whether this state counts as actively rendering for status purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, TransportState::Playing | TransportState::Transitioning)
    }
}

/// A renderer's last observed AVTransport state.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSnapshot {
    /// Transport state at capture time
    pub state: TransportState,
    /// URI the transport was rendering, empty when none
    pub uri: String,
    /// Playback position in seconds, when the renderer reported one
    pub position_secs: Option<f64>,
    /// Track duration in seconds, when the renderer reported one
    pub duration_secs: Option<f64>,
    /// When the snapshot was taken
    pub taken_at: Instant,
}

/// Capability flags for a renderer.
///
/// These are best-effort: actions outside Play/Pause/Stop are attempted and
/// the flags flip off when the renderer faults with an unsupported-action
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererCapabilities {
    /// Whether the renderer accepts Seek with Unit=REL_TIME
    pub seek: bool,
    /// Whether the renderer accepts SetNextAVTransportURI
    pub set_next_uri: bool,
}

impl Default for RendererCapabilities {
    fn default() -> Self {
        Self {
            seek: true,
            set_next_uri: true,
        }
    }
}

/// A renderer as seen on the wire, before the device description is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererDescriptor {
    /// Unique Service Name from the SSDP header
    pub usn: String,
    /// LOCATION URL of the device description
    pub location: String,
    /// SERVER header, when sent
    pub server: Option<String>,
    /// CACHE-CONTROL max-age the advertisement is valid for
    pub max_age: Duration,
}

/// A renderer descriptor enriched by the device description fetch.
#[derive(Debug, Clone)]
pub struct RendererDescription {
    /// Stable id derived from the USN / device UDN
    pub renderer_id: String,
    /// Friendly name from the device description
    pub friendly_name: String,
    /// LOCATION URL of the device description
    pub location: String,
    /// Host (without port) the renderer answers on
    pub host: String,
    /// SERVER header, when sent
    pub server: Option<String>,
    /// Advertisement validity
    pub max_age: Duration,
    /// Best-effort capability flags
    pub capabilities: RendererCapabilities,
    /// Live control handle for the AVTransport service
    pub render: Render,
}

/// The authoritative in-memory record of one renderer.
///
/// Created on first discovery, mutated only under the controller's
/// device-state lock, destroyed only by explicit unregister. Disappearance
/// from the network flips the status to [`RendererStatus::Disconnected`]
/// without destroying the record.
#[derive(Debug, Clone)]
pub struct Renderer {
    /// Stable renderer id
    pub id: String,
    /// Friendly name
    pub friendly_name: String,
    /// Device description URL
    pub location: String,
    /// Renderer host
    pub host: String,
    /// SERVER header used for profile overrides
    pub server: Option<String>,
    /// Best-effort capability flags
    pub capabilities: RendererCapabilities,
    /// Lifecycle status
    pub status: RendererStatus,
    /// When the renderer was last seen by discovery
    pub last_seen: SystemTime,
    /// Consecutive sweeps the renderer was absent from
    pub missed_sweeps: u32,
    /// Last observed transport state
    pub transport: Option<TransportSnapshot>,
    /// Bumped every time the transport snapshot is replaced
    pub transport_epoch: u64,
    /// Control handle
    pub render: Render,
}

impl Renderer {
    /// Creates a fresh record from a description.
    pub fn from_description(description: &RendererDescription) -> Self {
        Self {
            id: description.renderer_id.clone(),
            friendly_name: description.friendly_name.clone(),
            location: description.location.clone(),
            host: description.host.clone(),
            server: description.server.clone(),
            capabilities: description.capabilities,
            status: RendererStatus::Discovered,
            last_seen: SystemTime::now(),
            missed_sweeps: 0,
            transport: None,
            transport_epoch: 0,
            render: description.render.clone(),
        }
    }

    /// Refreshes the mutable fields in place from a newer description.
    ///
    /// Identity, status, transport history and anything owned by the
    /// assignment layer stay untouched so a re-registration never provokes a
    /// redundant Play.
    pub fn update_from(&mut self, description: &RendererDescription) {
        debug_assert_eq!(self.id, description.renderer_id);
        self.friendly_name = description.friendly_name.clone();
        self.location = description.location.clone();
        self.host = description.host.clone();
        self.server = description.server.clone();
        self.render = description.render.clone();
        self.last_seen = SystemTime::now();
        self.missed_sweeps = 0;
    }

    /// Records a new transport snapshot and derives the status from it.
    pub fn observe_transport(&mut self, snapshot: TransportSnapshot) {
        self.status = match snapshot.state {
            TransportState::Playing | TransportState::Transitioning => RendererStatus::Playing,
            TransportState::PausedPlayback => RendererStatus::Paused,
            TransportState::Stopped => RendererStatus::Stopped,
            TransportState::NoMediaPresent | TransportState::Other(_) => self.status,
        };
        self.transport = Some(snapshot);
        self.transport_epoch += 1;
    }

    /// Produces a read-only view for callers outside the core.
    pub fn view(&self) -> RendererView {
        RendererView {
            id: self.id.clone(),
            friendly_name: self.friendly_name.clone(),
            host: self.host.clone(),
            server: self.server.clone(),
            status: self.status,
            last_seen: self.last_seen,
            transport: self.transport.clone(),
        }
    }
}

/// Read-only snapshot of a renderer handed to the admin layer.
#[derive(Debug, Clone)]
pub struct RendererView {
    pub id: String,
    pub friendly_name: String,
    pub host: String,
    pub server: Option<String>,
    pub status: RendererStatus,
    pub last_seen: SystemTime,
    pub transport: Option<TransportSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_state_parse() {
        assert_eq!(TransportState::parse("PLAYING"), TransportState::Playing);
        assert_eq!(
            TransportState::parse("PAUSED_PLAYBACK"),
            TransportState::PausedPlayback
        );
        assert_eq!(TransportState::parse("STOPPED"), TransportState::Stopped);
        assert_eq!(
            TransportState::parse("NO_MEDIA_PRESENT"),
            TransportState::NoMediaPresent
        );
        assert_eq!(
            TransportState::parse("CUSTOM"),
            TransportState::Other("CUSTOM".to_string())
        );
    }

    #[test]
    fn test_transport_state_activity() {
        assert!(TransportState::Playing.is_active());
        assert!(TransportState::Transitioning.is_active());
        assert!(!TransportState::Stopped.is_active());
        assert!(!TransportState::NoMediaPresent.is_active());
    }
}
