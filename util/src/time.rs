//! General time utility functions

use chrono;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Format a number of seconds as a lap time, `m:ss.sss`.
pub fn format_lap_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return format!("{}", seconds);
    }

    let minutes = (seconds / 60.0).floor();
    let rem = seconds - minutes * 60.0;

    format!("{}:{:06.3}", minutes as u64, rem)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        let d = chrono::Duration::milliseconds(1500);
        assert_eq!(duration_to_seconds(d), Some(1.5));
    }

    #[test]
    fn test_format_lap_time() {
        assert_eq!(format_lap_time(81.25), "1:21.250");
        assert_eq!(format_lap_time(9.5), "0:09.500");
    }
}
