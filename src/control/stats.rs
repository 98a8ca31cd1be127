//! Aggregate counters for the loopcast core.
//!
//! Kept behind their own reader-heavy lock so frequent snapshot reads never
//! contend with the device-state or assignment locks.

/// Counters accumulated over the life of one core.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Renderers registered for the first time
    pub renderers_discovered: u64,
    /// Transitions into the disconnected state
    pub renderers_disconnected: u64,
    /// Assignments that reached PLAYING
    pub playbacks_started: u64,
    /// Supervisor-driven restarts (loop, stall, media-lost)
    pub playback_restarts: u64,
    /// Assignments that exhausted their retries
    pub playback_failures: u64,
    /// Assignments pushed aside by a higher priority one
    pub assignments_superseded: u64,
    /// Supervisor ticks executed
    pub supervisor_ticks: u64,
    /// SOAP calls that returned an error
    pub soap_failures: u64,
}
