//! Configuration for loopcast
//!
//! The core reads a fully built [`Config`] object; no files or environment
//! variables are consulted here. The CLI (or an embedding application)
//! constructs the object and hands it in.

mod constants;
mod types;

pub use constants::*;
pub use types::{Config, RendererProfile};
