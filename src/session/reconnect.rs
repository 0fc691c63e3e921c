//! Exponential backoff policy for re-establishing a lost session

use std::time::Duration;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt
    pub base_delay: Duration,
    /// Growth factor between attempts
    pub factor: u32,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Wait `delay`, then run handshake number `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

impl ReconnectPolicy {
    /// Backoff before attempt `attempt` (1-based): base * factor^(attempt-1), capped
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.max(1).checked_pow(exponent);
        multiplier
            .and_then(|m| self.base_delay.checked_mul(m))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Decide what to do after `failed_attempts` consecutive failures
    pub fn next_step(&self, failed_attempts: u32, shutdown_requested: bool) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = self.max_attempts {
            if failed_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = failed_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay: self.delay_for_attempt(attempt),
        }
    }

    /// Total backoff spent before giving up; None if retries are unlimited
    pub fn max_total_delay(&self) -> Option<Duration> {
        self.max_attempts
            .map(|max| (1..=max).map(|attempt| self.delay_for_attempt(attempt)).sum())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
        }
        if self.base_delay.is_zero() {
            return Err("base_delay must be greater than 0".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("max_delay must not be smaller than base_delay".to_string());
        }
        if self.factor == 0 {
            return Err("factor must be at least 1".to_string());
        }
        Ok(())
    }
}
