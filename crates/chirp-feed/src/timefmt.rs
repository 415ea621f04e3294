//! Relative timestamp rendering for feed entries.

use chrono::{DateTime, Datelike, Utc};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Render a tweet timestamp relative to `now_ms`.
///
/// Under an hour old renders as minutes ("5m"), under a day as hours
/// ("3h"), anything older as a calendar date ("Jun 3"). Timestamps in
/// the future (clock skew between writer and reader) clamp to "0m".
pub fn format_timestamp(created_at_ms: i64, now_ms: i64) -> String {
    let elapsed = (now_ms - created_at_ms).max(0);
    if elapsed < HOUR_MS {
        format!("{}m", elapsed / MINUTE_MS)
    } else if elapsed < DAY_MS {
        format!("{}h", elapsed / HOUR_MS)
    } else {
        let when = DateTime::<Utc>::from_timestamp_millis(created_at_ms)
            .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH);
        format!("{} {}", when.format("%b"), when.day())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_minutes_under_an_hour() {
        assert_eq!(format_timestamp(NOW - 30_000, NOW), "0m");
        assert_eq!(format_timestamp(NOW - 5 * MINUTE_MS, NOW), "5m");
        assert_eq!(format_timestamp(NOW - 59 * MINUTE_MS, NOW), "59m");
    }

    #[test]
    fn test_hours_under_a_day() {
        assert_eq!(format_timestamp(NOW - HOUR_MS, NOW), "1h");
        assert_eq!(format_timestamp(NOW - 23 * HOUR_MS - 59 * MINUTE_MS, NOW), "23h");
    }

    #[test]
    fn test_calendar_date_beyond_a_day() {
        // 2023-11-13T22:13:20Z minus two days
        assert_eq!(format_timestamp(NOW - 2 * DAY_MS, NOW), "Nov 12");
    }

    #[test]
    fn test_future_timestamp_clamps_to_zero() {
        assert_eq!(format_timestamp(NOW + HOUR_MS, NOW), "0m");
    }
}
