//! Reconnect backoff for the push channel.
//!
//! Formula: `min(initial_delay * 2^(attempt-1), max_delay)` — the first retry
//! waits `initial_delay`, the second twice that, and so on. No jitter: the
//! delay sequence is part of the channel's contract and covered by tests.

use std::time::Duration;

/// Reconnect policy for the push channel.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Maximum number of consecutive reconnect attempts before giving up.
    /// The counter resets to 0 on every successful open.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-indexed).
pub fn reconnect_delay(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    let exp = attempt.saturating_sub(1).min(30);
    let raw = policy
        .initial_delay
        .as_millis()
        .saturating_mul(1u128 << exp);
    Duration::from_millis(raw.min(policy.max_delay.as_millis()) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_sequence_doubles_from_one_second() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| reconnect_delay(n, &policy).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = ReconnectPolicy::default();
        assert_eq!(reconnect_delay(6, &policy), Duration::from_millis(30_000));
        assert_eq!(reconnect_delay(40, &policy), Duration::from_millis(30_000));
    }
}
