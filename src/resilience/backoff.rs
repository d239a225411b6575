//! Exponential backoff.

use std::time::Duration;

/// Delay to wait after failed attempt number `attempt` (1-based).
///
/// `delay = clamp(min * multiplier^(attempt-1), min, max)`
pub fn calculate_backoff(attempt: u32, min: Duration, max: Duration, multiplier: f64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let ceiling = max.max(min);
    let raw_nanos = min.as_nanos() as f64 * multiplier.powi(exponent);

    if !raw_nanos.is_finite() || raw_nanos >= ceiling.as_nanos() as f64 {
        return ceiling;
    }

    Duration::from_nanos(raw_nanos as u64).max(min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(1000);

        assert_eq!(calculate_backoff(1, min, max, 2.0), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, min, max, 2.0), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, min, max, 2.0), Duration::from_millis(400));
        assert_eq!(calculate_backoff(10, min, max, 2.0), max);
    }

    #[test]
    fn test_backoff_never_overflows() {
        let max = Duration::from_secs(3);
        assert_eq!(calculate_backoff(u32::MAX, Duration::from_secs(1), max, 10.0), max);
    }

    #[test]
    fn test_flat_multiplier_stays_at_min() {
        let min = Duration::from_millis(250);
        assert_eq!(calculate_backoff(5, min, Duration::from_secs(2), 1.0), min);
    }
}
