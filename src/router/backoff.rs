// Exponential backoff for retrying a failed delivery move (spec §4.3
// "retry with exponential backoff up to a bounded number of attempts").

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_attempts: u32) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry `attempt` (1-indexed), doubled each attempt with
    /// up to 20% jitter so many simultaneously-failing deliveries don't
    /// retry in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u64 << attempt.saturating_sub(1).min(16);
        let base_delay = self.base.saturating_mul(multiplier as u32);
        let jitter_fraction = rand::thread_rng().gen_range(0.0..0.2);
        base_delay.mul_f64(1.0 + jitter_fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt() {
        let backoff = Backoff::new(50, 5);
        assert!(backoff.delay_for(2) >= Duration::from_millis(100));
        assert!(backoff.delay_for(3) >= Duration::from_millis(200));
    }

    #[test]
    fn max_attempts_is_preserved() {
        let backoff = Backoff::new(50, 7);
        assert_eq!(backoff.max_attempts(), 7);
    }
}
