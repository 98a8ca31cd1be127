//! Network utilities for loopcast
//!
//! Local address resolution for published media URLs, and the backoff
//! arithmetic shared by the assignment engine.

use crate::error::{Error, Result};
use local_ip_address::local_ip;
use log::debug;
use std::time::Duration;

/// Identifies the local IP address used in published media URLs.
pub fn get_local_ip() -> Result<String> {
    debug!("Identifying local IP address of host");
    Ok(local_ip()
        .map_err(|err| Error::LocalAddressResolutionFailed { source: err })?
        .to_string())
}

/// Computes the delay before retry number `attempt` (0-based): doubles from
/// `base` and saturates at `cap`.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_base() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, cap, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, cap, 4), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_saturates_at_cap() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, cap, 10), cap);
        assert_eq!(backoff_delay(base, cap, 63), cap);
        assert_eq!(backoff_delay(base, cap, 200), cap);
    }

    #[test]
    fn test_retry_envelope_is_bounded() {
        // The total pending time of an assignment never exceeds
        // attempts x cap, which is what callers rely on for liveness.
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(30);
        let total: Duration = (0..5).map(|n| backoff_delay(base, cap, n)).sum();
        assert!(total <= cap * 5);
    }
}
