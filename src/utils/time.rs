//! Time parsing utilities for loopcast
//!
//! DLNA transport positions and durations travel as `HH:MM:SS` (optionally
//! with a fractional second part); Seek targets are written back the same
//! way.

use std::time::Duration;

/// Converts a DLNA time string (`HH:MM:SS` or `HH:MM:SS.mmm`) to seconds.
///
/// Returns `None` for the `NOT_IMPLEMENTED` placeholder some renderers send,
/// and for anything else that does not parse.
pub fn time_str_to_seconds(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: u64 = parts[0].parse().ok()?;
    let minutes: u64 = parts[1].parse().ok()?;
    // Seconds may carry a decimal part
    let seconds: f64 = parts[2].parse().ok()?;

    Some((hours as f64) * 3600.0 + (minutes as f64) * 60.0 + seconds)
}

/// Formats a duration as `HH:MM:SS` for Seek targets.
pub fn format_hhmmss(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_str_to_seconds() {
        assert_eq!(time_str_to_seconds("01:30:45"), Some(5445.0));
        assert_eq!(time_str_to_seconds("00:00:30"), Some(30.0));
        assert_eq!(time_str_to_seconds("02:15:30.5"), Some(8130.5));
    }

    #[test]
    fn test_time_str_to_seconds_invalid() {
        assert_eq!(time_str_to_seconds("NOT_IMPLEMENTED"), None);
        assert_eq!(time_str_to_seconds("1:2"), None);
        assert_eq!(time_str_to_seconds(""), None);
    }

    #[test]
    fn test_format_hhmmss() {
        assert_eq!(format_hhmmss(Duration::from_secs(5445)), "01:30:45");
        assert_eq!(format_hhmmss(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hhmmss(Duration::from_secs(59)), "00:00:59");
    }

    #[test]
    fn test_round_trip() {
        let duration = Duration::from_secs(3725);
        assert_eq!(
            time_str_to_seconds(&format_hhmmss(duration)),
            Some(3725.0)
        );
    }
}
