//! Utility functions and helpers for loopcast
//!
//! This module provides various utility functions organized by functionality:
//! - Time parsing and formatting for DLNA transport positions
//! - Media file MIME and DLNA profile handling
//! - Network operations and retry arithmetic

pub mod media;
pub mod network;
pub mod time;

pub use media::{
    dlna_profile_for_mime, infer_subtitle_from_video, is_supported_video_file, mime_type_for_path,
    sanitize_filename_for_url,
};
pub use network::{backoff_delay, get_local_ip};
pub use time::{format_hhmmss, time_str_to_seconds};
