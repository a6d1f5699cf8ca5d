use std::time::Duration;

use chrono::Utc;

use crate::error::{Result, TracefinError};

/// Span timestamps and durations are reported in microseconds; completion
/// time events are published in milliseconds.
pub fn us_to_ms(us: i64) -> i64 {
    us / 1_000
}

pub fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| TracefinError::Parse(format!("invalid duration {input}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_us_to_ms() {
        assert_eq!(us_to_ms(1_500), 1);
        assert_eq!(us_to_ms(2_000), 2);
        assert_eq!(us_to_ms(999), 0);
    }

    #[test]
    fn parses_duration() {
        assert_eq!(parse_duration_str("5s").unwrap(), Duration::from_secs(5));
        assert!(parse_duration_str("nope").is_err());
    }

    #[test]
    fn now_is_positive() {
        assert!(now_us() > 0);
    }
}
