//! Human-readable durations for operator output.

use std::time::Duration;

/// Formats a timeout as `30s`, `2m 30s` or `5m`.
///
/// Sub-second precision is dropped.
pub fn format_timeout(timeout: Duration) -> String {
    let seconds = timeout.as_secs();
    if seconds < 60 {
        return format!("{}s", seconds);
    }

    let minutes = seconds / 60;
    match seconds % 60 {
        0 => format!("{}m", minutes),
        rest => format!("{}m {}s", minutes, rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_format_timeout_examples() {
        assert_eq!(format_timeout(Duration::from_secs(30)), "30s");
        assert_eq!(format_timeout(Duration::from_secs(150)), "2m 30s");
        assert_eq!(format_timeout(Duration::from_secs(300)), "5m");
        assert_eq!(format_timeout(Duration::from_secs(60)), "1m");
        assert_eq!(format_timeout(Duration::ZERO), "0s");
        assert_eq!(format_timeout(Duration::from_millis(10_900)), "10s");
    }

    proptest! {
        #[test]
        fn prop_format_timeout_preserves_seconds(seconds in 0u64..100_000) {
            let text = format_timeout(Duration::from_secs(seconds));
            let mut total = 0;
            for part in text.split(' ') {
                if let Some(m) = part.strip_suffix('m') {
                    total += m.parse::<u64>().unwrap() * 60;
                } else {
                    let s = part.strip_suffix('s').unwrap().parse::<u64>().unwrap();
                    prop_assert!(seconds < 60 || s < 60);
                    total += s;
                }
            }
            prop_assert_eq!(total, seconds);
        }
    }
}
