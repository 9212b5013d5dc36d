//! Exponential backoff for broker reconnection.
//!
//! Delays grow by `multiplier` per attempt and are capped at `max_delay`.
//! Without an explicit attempt limit, the limit is the number of steps needed
//! to reach the cap plus one.

use std::time::Duration;

use thiserror::Error;

use crate::config::ReconnectConfig;

#[derive(Debug, Error)]
pub enum BackoffError {
    #[error("Maximum number of attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    max_attempts: Option<u32>,
    calculated_max_attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier,
            attempt: 0,
            max_attempts: None,
            calculated_max_attempts: Self::calculate_max_attempts(initial, max, multiplier),
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        let mut backoff = Self::new(
            Duration::from_secs(config.initial_delay),
            Duration::from_secs(config.max_delay),
            config.multiplier,
        );
        if config.max_attempts > 0 {
            backoff.set_max_attempts(config.max_attempts);
        }
        backoff
    }

    // initial * multiplier^n = max  =>  n = log(max / initial) / log(multiplier)
    fn calculate_max_attempts(initial: Duration, max: Duration, multiplier: f64) -> u32 {
        if initial >= max || multiplier <= 1.0 {
            return 1;
        }
        let n = (max.as_secs_f64() / initial.as_secs_f64()).log(multiplier);
        n.floor() as u32 + 1
    }

    pub fn set_max_attempts(&mut self, max: u32) {
        self.max_attempts = Some(max);
    }

    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the delay to wait before the next attempt.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt += 1;
        let effective_max = self.max_attempts.unwrap_or(self.calculated_max_attempts);
        if self.attempt > effective_max {
            return Err(BackoffError::MaxAttemptLimitError(effective_max));
        }

        let sleep = self.current_delay;
        let next = Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier);
        self.current_delay = next.min(self.max_delay);

        Ok(sleep)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn calculated_max_attempts(&self) -> u32 {
        self.calculated_max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 2.0);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(4));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_backoff_respects_max_delay() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);
        backoff.set_max_attempts(20);
        let mut last = Duration::ZERO;
        for _ in 0..10 {
            last = backoff.next_sleep().unwrap();
        }
        assert_eq!(last, backoff.max_delay());
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::default();
        backoff.next_sleep().unwrap();
        backoff.next_sleep().unwrap();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_max_attempts_from_config() {
        let mut backoff = Backoff::from_config(&ReconnectConfig {
            max_attempts: 2,
            ..Default::default()
        });
        assert!(backoff.next_sleep().is_ok());
        assert!(backoff.next_sleep().is_ok());
        assert!(matches!(
            backoff.next_sleep(),
            Err(BackoffError::MaxAttemptLimitError(2))
        ));
    }

    #[test]
    fn test_backoff_degenerate_range() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(10), 1.5);
        assert_eq!(backoff.calculated_max_attempts(), 1);
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 1.0);
        assert_eq!(backoff.calculated_max_attempts(), 1);
    }
}
