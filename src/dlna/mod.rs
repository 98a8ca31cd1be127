//! DLNA control-plane protocol for loopcast
//!
//! This module provides the SOAP side of driving a renderer:
//! - AVTransport action client (set URI, play, pause, stop, seek, getters)
//! - DIDL-Lite metadata generation with DLNA protocolInfo

pub mod client;
pub mod metadata;

pub use client::{AvTransportClient, PositionInfo, TransportInfo};
pub use metadata::{MediaMetadata, build_didl_metadata, build_protocol_info};
