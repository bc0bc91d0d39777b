use std::time::Duration;

/// Rate gate for non-admin "public" updates, measured in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicCooldown {
    pub period: Duration,
}

impl PublicCooldown {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Time left before another public update may run; `None` when allowed.
    pub fn remaining(&self, last_update_ms: Option<i64>, now_ms: i64) -> Option<Duration> {
        let last = last_update_ms?;
        let elapsed = u64::try_from(now_ms.saturating_sub(last)).unwrap_or(0);
        let period = u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX);
        (elapsed < period).then(|| Duration::from_millis(period - elapsed))
    }

    pub fn allows(&self, last_update_ms: Option<i64>, now_ms: i64) -> bool {
        self.remaining(last_update_ms, now_ms).is_none()
    }
}

/// Whole minutes, rounded up.
pub fn remaining_minutes(wait: Duration) -> u64 {
    wait.as_millis().div_ceil(60_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    #[test]
    fn zero_period_always_allows() {
        let gate = PublicCooldown::new(Duration::ZERO);
        assert!(gate.allows(Some(1_000), 1_000));
        assert!(gate.allows(None, 0));
    }

    #[test]
    fn waits_out_the_period() {
        let gate = PublicCooldown::new(Duration::from_secs(30 * 60));
        let last = 10 * MIN;
        assert!(gate.allows(None, last));
        assert!(!gate.allows(Some(last), last + 29 * MIN));
        assert!(gate.allows(Some(last), last + 30 * MIN));
        assert_eq!(
            gate.remaining(Some(last), last + 10 * MIN),
            Some(Duration::from_secs(20 * 60))
        );
    }

    #[test]
    fn clock_skew_counts_as_no_time_elapsed() {
        let gate = PublicCooldown::new(Duration::from_secs(60));
        assert_eq!(
            gate.remaining(Some(5 * MIN), 4 * MIN),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn minutes_round_up() {
        assert_eq!(remaining_minutes(Duration::from_secs(1)), 1);
        assert_eq!(remaining_minutes(Duration::from_secs(60)), 1);
        assert_eq!(remaining_minutes(Duration::from_secs(61)), 2);
        assert_eq!(remaining_minutes(Duration::ZERO), 0);
    }
}
