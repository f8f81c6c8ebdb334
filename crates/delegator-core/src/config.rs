//! Typed configuration records for the executor, contingency sweep, and
//! circuit breaker, read from the environment with compiled-in defaults.

use std::env;
use std::time::Duration;

/// Retry/backoff parameters for the Executor (§4.4).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Base delay for the first retry.
    pub backoff_base: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: u32,
    /// Upper bound on the backoff delay.
    pub backoff_cap: Duration,
    /// Maximum number of attempts (including the first) before a Transient
    /// failure is treated as terminal.
    pub max_attempts: u32,
}

impl ExecutorConfig {
    pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 1;
    pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;
    pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 30;
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn from_env() -> Self {
        let backoff_base = env::var("DELEGATOR_BACKOFF_BASE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_BACKOFF_BASE_SECS);
        let backoff_factor = env::var("DELEGATOR_BACKOFF_FACTOR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_BACKOFF_FACTOR);
        let backoff_cap = env::var("DELEGATOR_BACKOFF_CAP_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_BACKOFF_CAP_SECS);
        let max_attempts = env::var("DELEGATOR_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_MAX_ATTEMPTS);

        Self {
            backoff_base: Duration::from_secs(backoff_base),
            backoff_factor,
            backoff_cap: Duration::from_secs(backoff_cap),
            max_attempts,
        }
    }

    /// Compute the backoff delay for a given 0-indexed retry attempt,
    /// without jitter (callers add jitter separately so it stays testable).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.saturating_pow(attempt);
        let scaled = self.backoff_base.saturating_mul(factor);
        scaled.min(self.backoff_cap)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Background maintenance sweep parameters (§4.4's Decision addendum).
#[derive(Debug, Clone)]
pub struct ContingencyConfig {
    /// Age after which a RUNNING task is considered stuck.
    pub max_task_age_hours: f64,
    /// How often the sweep runs.
    pub interval: Duration,
}

impl ContingencyConfig {
    pub const DEFAULT_MAX_TASK_AGE_HOURS: f64 = 1.0;
    pub const DEFAULT_INTERVAL_SECS: u64 = 300;
    /// Orphan grace period is fixed, not independently configurable (see
    /// DESIGN.md's Open Question decision).
    pub const ORPHAN_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);
    pub const BACKUP_RETENTION_COUNT: usize = 10;
    pub const CIRCUIT_BREAKER_STATE_MAX_AGE_DAYS: i64 = 7;

    pub fn from_env() -> Self {
        let max_task_age_hours = env::var("DELEGATOR_MAX_TASK_AGE_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_MAX_TASK_AGE_HOURS);
        let interval_secs = env::var("DELEGATOR_CONTINGENCY_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_INTERVAL_SECS);

        Self {
            max_task_age_hours,
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub fn max_task_age(&self) -> Duration {
        Duration::from_secs_f64(self.max_task_age_hours * 3600.0)
    }
}

impl Default for ContingencyConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Circuit breaker thresholds, mirroring the reference's
/// `TaskReadinessCircuitBreakerConfig::default()` shape (§4.4's Ambient
/// addendum).
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays Open before probing via HalfOpen.
    pub recovery_timeout: Duration,
    /// Consecutive successes required to close the breaker from HalfOpen.
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
    pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: Self::DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: Duration::from_secs(Self::DEFAULT_RECOVERY_TIMEOUT_SECS),
            success_threshold: Self::DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_for_grows_and_caps() {
        let cfg = ExecutorConfig {
            backoff_base: Duration::from_secs(1),
            backoff_factor: 2,
            backoff_cap: Duration::from_secs(30),
            max_attempts: 3,
        };
        assert_eq!(cfg.backoff_for(0), Duration::from_secs(1));
        assert_eq!(cfg.backoff_for(1), Duration::from_secs(2));
        assert_eq!(cfg.backoff_for(2), Duration::from_secs(4));
        assert_eq!(cfg.backoff_for(10), Duration::from_secs(30));
    }

    #[test]
    fn circuit_breaker_default_matches_documented_thresholds() {
        let cfg = CircuitBreakerConfig::default();
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.recovery_timeout, Duration::from_secs(60));
        assert_eq!(cfg.success_threshold, 2);
    }

    #[test]
    fn contingency_default_matches_original_implementation() {
        let cfg = ContingencyConfig {
            max_task_age_hours: ContingencyConfig::DEFAULT_MAX_TASK_AGE_HOURS,
            interval: Duration::from_secs(ContingencyConfig::DEFAULT_INTERVAL_SECS),
        };
        assert_eq!(cfg.max_task_age(), Duration::from_secs(3600));
        assert_eq!(cfg.interval, Duration::from_secs(300));
    }
}
