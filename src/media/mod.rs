//! Media serving for loopcast
//!
//! This module provides the embedded HTTP server renderers stream from:
//! - Publication table mapping opaque tokens to local files
//! - Range and HEAD handling with DLNA-conformant headers
//! - Per-delivery streaming session tracking

pub mod server;
pub mod sessions;

pub use server::{MediaStreamingServer, Publication};
pub use sessions::{SessionRegistry, SessionState, StreamingSession};
