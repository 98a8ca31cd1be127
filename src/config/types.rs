//! Configuration structures for the loopcast core.

use log::LevelFilter;
use std::collections::HashMap;
use std::time::Duration;

use super::constants::*;

/// DLNA serving overrides keyed by a substring of the renderer's SERVER header
#[derive(Debug, Clone)]
pub struct RendererProfile {
    /// DLNA.ORG_PN profile advertised to this renderer family
    pub dlna_profile: String,
    /// DLNA.ORG_FLAGS bitfield literal advertised to this renderer family
    pub flags: String,
}

/// Configuration for the loopcast core
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval between SSDP discovery sweeps
    pub ssdp_search_interval: Duration,
    /// Discovery sweeps a renderer may miss before disconnecting
    pub ssdp_miss_threshold: u32,
    /// Timeout applied to each outbound SOAP call
    pub soap_timeout: Duration,
    /// Interval between supervisor ticks
    pub supervisor_tick: Duration,
    /// Frozen-position ticks before a stall restart
    pub stall_threshold_ticks: u32,
    /// Restart margin before end-of-media for looping assignments
    pub pre_restart_margin: Duration,
    /// Inclusive TCP port range scanned by the media server
    pub media_port_range: (u16, u16),
    /// Host IP advertised in media URLs; autodetected when None
    pub media_host: Option<String>,
    /// Base delay for activation retries
    pub retry_base: Duration,
    /// Ceiling on the activation retry delay
    pub retry_cap: Duration,
    /// Activation attempts before an assignment fails
    pub retry_max_attempts: u32,
    /// How long media server shutdown waits for in-flight responses
    pub drain_timeout: Duration,
    /// Per-renderer-family DLNA profile overrides, keyed by SERVER substring
    pub renderer_profiles: HashMap<String, RendererProfile>,
    /// Log level
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssdp_search_interval: Duration::from_secs(DEFAULT_SEARCH_INTERVAL_SECS),
            ssdp_miss_threshold: DEFAULT_MISS_THRESHOLD,
            soap_timeout: Duration::from_secs(DEFAULT_SOAP_TIMEOUT_SECS),
            supervisor_tick: Duration::from_secs(DEFAULT_SUPERVISOR_TICK_SECS),
            stall_threshold_ticks: DEFAULT_STALL_THRESHOLD_TICKS,
            pre_restart_margin: Duration::from_secs(DEFAULT_PRE_RESTART_MARGIN_SECS),
            media_port_range: (DEFAULT_MEDIA_PORT_LOW, DEFAULT_MEDIA_PORT_HIGH),
            media_host: None,
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            retry_cap: Duration::from_millis(DEFAULT_RETRY_CAP_MS),
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            renderer_profiles: HashMap::new(),
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interval between discovery sweeps
    pub fn with_search_interval(mut self, interval: Duration) -> Self {
        self.ssdp_search_interval = interval;
        self
    }

    /// Sets the number of sweeps a renderer may miss before disconnecting
    pub fn with_miss_threshold(mut self, sweeps: u32) -> Self {
        self.ssdp_miss_threshold = sweeps;
        self
    }

    /// Sets the SOAP call timeout
    pub fn with_soap_timeout(mut self, timeout: Duration) -> Self {
        self.soap_timeout = timeout;
        self
    }

    /// Sets the supervisor tick interval
    pub fn with_supervisor_tick(mut self, tick: Duration) -> Self {
        self.supervisor_tick = tick;
        self
    }

    /// Sets the stall threshold in ticks
    pub fn with_stall_threshold(mut self, ticks: u32) -> Self {
        self.stall_threshold_ticks = ticks;
        self
    }

    /// Sets the pre-emptive restart margin before end-of-media
    pub fn with_pre_restart_margin(mut self, margin: Duration) -> Self {
        self.pre_restart_margin = margin;
        self
    }

    /// Sets the media server port range (inclusive)
    pub fn with_media_port_range(mut self, low: u16, high: u16) -> Self {
        self.media_port_range = (low, high);
        self
    }

    /// Sets the host IP advertised in media URLs
    pub fn with_media_host(mut self, host: impl Into<String>) -> Self {
        self.media_host = Some(host.into());
        self
    }

    /// Sets the activation retry backoff parameters
    pub fn with_retry_policy(mut self, base: Duration, cap: Duration, max_attempts: u32) -> Self {
        self.retry_base = base;
        self.retry_cap = cap;
        self.retry_max_attempts = max_attempts;
        self
    }

    /// Registers a DLNA profile override for renderers whose SERVER header
    /// contains `pattern`.
    pub fn with_renderer_profile(
        mut self,
        pattern: impl Into<String>,
        profile: RendererProfile,
    ) -> Self {
        self.renderer_profiles.insert(pattern.into(), profile);
        self
    }

    /// Sets the log level
    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// Looks up the profile override for a renderer's SERVER header.
    pub fn profile_for(&self, server: Option<&str>) -> Option<&RendererProfile> {
        let server = server?;
        self.renderer_profiles
            .iter()
            .find(|(pattern, _)| server.contains(pattern.as_str()))
            .map(|(_, profile)| profile)
    }
}
