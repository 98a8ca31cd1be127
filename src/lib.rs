//! loopcast - keep UPnP/DLNA renderers playing their assigned videos
//!
//! loopcast discovers MediaRenderers on the LAN over SSDP, serves local
//! video files to them from an embedded HTTP server with DLNA-conformant
//! headers, drives them through AVTransport SOAP actions, and supervises
//! each renderer so that its assigned video keeps playing through stops,
//! stalls and transient disconnects.
//!
//! The crate is a library with a thin CLI on top:
//!
//! - [`devices`] - SSDP discovery and the per-renderer record
//! - [`dlna`] - the AVTransport SOAP client and DIDL-Lite metadata
//! - [`media`] - the embedded media server and streaming sessions
//! - [`control`] - controller, assignment engine and playback supervisors
//! - [`catalog`] - the collaborator interfaces the core talks to

pub mod catalog;
pub mod cli;
pub mod config;
pub mod control;
pub mod devices;
pub mod dlna;
pub mod error;
pub mod media;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{AssignmentRequest, Catalog, CoreEvent, EventSink, VideoSnapshot};
pub use config::Config;
pub use control::{Controller, RendererOverview, Statistics};
pub use devices::{Renderer, RendererStatus, RendererView, SsdpDiscovery};
pub use error::{Error, Result};
pub use media::MediaStreamingServer;
