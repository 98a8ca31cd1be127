//! Renderer discovery and per-renderer state for loopcast
//!
//! This module finds UPnP MediaRenderers on the network and holds the
//! authoritative per-renderer record the controller and supervisor mutate.

pub mod discovery;
pub mod render;
pub mod types;

pub use discovery::{DiscoveryEvent, SsdpDiscovery};
pub use render::{Render, renderer_id_from_usn};
pub use types::{
    Renderer, RendererCapabilities, RendererDescription, RendererDescriptor, RendererStatus,
    RendererView, TransportSnapshot, TransportState,
};
