//! Constants used throughout loopcast, organized by functionality.

// =============================================================================
// Network and Streaming Constants
// =============================================================================

/// First port tried for the media streaming server
pub const DEFAULT_MEDIA_PORT_LOW: u16 = 9000;

/// Last port tried for the media streaming server
pub const DEFAULT_MEDIA_PORT_HIGH: u16 = 9100;

/// How long shutdown waits for in-flight media responses, in seconds
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

/// User agent / Server header advertised by the media server
pub const SERVER_HEADER: &str = concat!("UPnP/1.0 DLNA/1.50 loopcast/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// SSDP Discovery Constants
// =============================================================================

/// SSDP multicast group
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// SSDP multicast port
pub const SSDP_PORT: u16 = 1900;

/// Seconds between discovery sweeps
pub const DEFAULT_SEARCH_INTERVAL_SECS: u64 = 10;

/// M-SEARCH sends per sweep
pub const SSDP_SEARCH_ATTEMPTS: usize = 3;

/// MX value advertised in M-SEARCH, in seconds
pub const SSDP_SEARCH_MX_SECS: u64 = 2;

/// TTL for SSDP multicast packets
pub const SSDP_TTL: Option<u32> = Some(2);

/// Sweeps a renderer may miss before it is marked disconnected
pub const DEFAULT_MISS_THRESHOLD: u32 = 3;

/// A device not refreshed within this multiple of its max-age is gone
pub const SSDP_EXPIRY_FACTOR: f64 = 2.5;

/// max-age assumed when a response carries no CACHE-CONTROL header
pub const SSDP_DEFAULT_MAX_AGE_SECS: u64 = 1800;

/// Seconds allowed for fetching a device description from LOCATION
pub const DESCRIPTION_FETCH_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// DLNA Protocol Constants
// =============================================================================

/// DLNA instance ID used in payloads
pub const DLNA_INSTANCE_ID: u32 = 0;

/// DLNA default playback speed
pub const DLNA_DEFAULT_SPEED: u32 = 1;

/// Seconds allowed per SOAP call
pub const DEFAULT_SOAP_TIMEOUT_SECS: u64 = 5;

/// Delay before the single transport-level SOAP retry, in milliseconds
pub const SOAP_RETRY_DELAY_MS: u64 = 500;

/// Flags carried in contentFeatures.dlna.org when no profile override applies
pub const DEFAULT_DLNA_FLAGS: &str = "01700000000000000000000000000000";

// =============================================================================
// DLNA Action Names
// =============================================================================

/// DLNA action name for setting AV transport URI
pub const DLNA_ACTION_SET_AV_TRANSPORT_URI: &str = "SetAVTransportURI";

/// DLNA action name for play
pub const DLNA_ACTION_PLAY: &str = "Play";

/// DLNA action name for pause
pub const DLNA_ACTION_PAUSE: &str = "Pause";

/// DLNA action name for stop
pub const DLNA_ACTION_STOP: &str = "Stop";

/// DLNA action name for seek
pub const DLNA_ACTION_SEEK: &str = "Seek";

/// DLNA action name for getting position info
pub const DLNA_ACTION_GET_POSITION_INFO: &str = "GetPositionInfo";

/// DLNA action name for getting transport info
pub const DLNA_ACTION_GET_TRANSPORT_INFO: &str = "GetTransportInfo";

// =============================================================================
// Supervision Constants
// =============================================================================

/// Seconds between supervisor ticks
pub const DEFAULT_SUPERVISOR_TICK_SECS: u64 = 2;

/// Frozen-position ticks before a PLAYING renderer counts as stalled
pub const DEFAULT_STALL_THRESHOLD_TICKS: u32 = 3;

/// Seconds before end-of-media at which a looping renderer is restarted
pub const DEFAULT_PRE_RESTART_MARGIN_SECS: u64 = 3;

/// Position must advance at least this much per tick to count as progress
pub const MIN_POSITION_ADVANCE_SECS: f64 = 0.5;

/// NO_MEDIA_PRESENT ticks before the URI is re-issued
pub const NO_MEDIA_REISSUE_TICKS: u32 = 2;

/// Consecutive transport poll failures before a renderer is abandoned
pub const TRANSPORT_FAILURE_LIMIT: u32 = 3;

// =============================================================================
// Assignment Constants
// =============================================================================

/// Base delay for activation retries, in milliseconds
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;

/// Ceiling on the activation retry delay, in milliseconds
pub const DEFAULT_RETRY_CAP_MS: u64 = 30_000;

/// Attempts before an assignment is marked failed
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Priority used for user-driven play/pause/stop/seek overrides
pub const USER_OVERRIDE_PRIORITY: i32 = 100;

/// Seconds the activation path waits for the transport to reach PLAYING
pub const ACTIVATION_CONFIRM_SECS: u64 = 3;

/// Poll interval while awaiting activation confirmation, in milliseconds
pub const ACTIVATION_POLL_MS: u64 = 250;

// =============================================================================
// Media File Support Constants
// =============================================================================

/// Supported video file extensions
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp", "ogv",
];

// =============================================================================
// DLNA Metadata Constants
// =============================================================================

/// Default title carried in DIDL-Lite metadata
pub const DEFAULT_DLNA_VIDEO_TITLE: &str = "loopcast Video";
