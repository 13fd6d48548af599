pub(crate) mod registry;
pub(crate) mod timer_queue;

use std::time::{Duration, Instant};

/// Upper bound used when `now + delay` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Converts a lifetime in milliseconds to a `Duration`.
///
/// Zero and negative values both mean "never expires" and map to
/// `Duration::ZERO`.
pub fn lifetime_from_millis(millis: i64) -> Duration {
    u64::try_from(millis)
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
}

/// `now + delay`, saturating to a far-future instant on overflow.
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_millis_never_expire() {
        assert_eq!(lifetime_from_millis(0), Duration::ZERO);
        assert_eq!(lifetime_from_millis(-250), Duration::ZERO);
        assert_eq!(lifetime_from_millis(i64::MIN), Duration::ZERO);
    }

    #[test]
    fn positive_millis_convert() {
        assert_eq!(lifetime_from_millis(75), Duration::from_millis(75));
    }

    #[test]
    fn huge_delay_saturates() {
        let now = Instant::now();
        assert!(deadline_after(now, Duration::MAX) > now);
    }
}
