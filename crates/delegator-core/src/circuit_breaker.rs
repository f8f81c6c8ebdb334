//! Per-adapter circuit breaker, persisted to disk so it survives restarts
//! (§4.4's Ambient addendum).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;

/// The three states a breaker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Persisted breaker state for one adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_probe_in_flight: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            half_open_probe_in_flight: false,
            updated_at: Utc::now(),
        }
    }
}

impl CircuitBreakerState {
    /// Current logical state, derived from the stored counters and
    /// `recovery_timeout`.
    pub fn state(&self, config: &CircuitBreakerConfig) -> CircuitState {
        match self.opened_at {
            None => CircuitState::Closed,
            Some(opened_at) => {
                let elapsed = (Utc::now() - opened_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if elapsed >= config.recovery_timeout {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
        }
    }
}

/// A circuit breaker for one named adapter, backed by a JSON file under
/// `state_dir`.
pub struct CircuitBreaker {
    state_dir: PathBuf,
    adapter_name: String,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(state_dir: impl Into<PathBuf>, adapter_name: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            adapter_name: adapter_name.into(),
            config: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    fn path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.json", self.adapter_name))
    }

    /// Load the persisted state, or a fresh default if no file exists yet.
    pub fn load(&self) -> Result<CircuitBreakerState> {
        let path = self.path();
        if !path.exists() {
            return Ok(CircuitBreakerState::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read circuit breaker state at {path:?}"))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse circuit breaker state at {path:?}"))
    }

    fn save(&self, state: &CircuitBreakerState) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("failed to create {:?}", self.state_dir))?;
        let contents = serde_json::to_string_pretty(state)
            .context("failed to serialize circuit breaker state")?;
        std::fs::write(self.path(), contents)
            .with_context(|| format!("failed to write circuit breaker state to {:?}", self.path()))
    }

    /// Whether a new request should be allowed through right now.
    pub fn allow_request(&self) -> Result<bool> {
        let state = self.load()?;
        Ok(!matches!(state.state(&self.config), CircuitState::Open))
    }

    /// Record a successful adapter invocation.
    pub fn record_success(&self) -> Result<()> {
        let mut state = self.load()?;
        match state.state(&self.config) {
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    state = CircuitBreakerState::default();
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
            }
        }
        state.updated_at = Utc::now();
        self.save(&state)
    }

    /// Record a failed adapter invocation.
    pub fn record_failure(&self) -> Result<()> {
        let mut state = self.load()?;
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        if state.opened_at.is_none() && state.consecutive_failures >= self.config.failure_threshold
        {
            state.opened_at = Some(Utc::now());
        } else if state.state(&self.config) == CircuitState::HalfOpen {
            // Probe failed: reopen.
            state.opened_at = Some(Utc::now());
        }
        state.updated_at = Utc::now();
        self.save(&state)
    }
}

/// Remove persisted breaker files whose `updated_at` is older than
/// `max_age`, run by the contingency sweep.
pub fn prune_stale(state_dir: &Path, max_age: chrono::Duration) -> Result<usize> {
    if !state_dir.exists() {
        return Ok(0);
    }
    let mut pruned = 0;
    for entry in std::fs::read_dir(state_dir)
        .with_context(|| format!("failed to read circuit breaker state dir {state_dir:?}"))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(state) = serde_json::from_str::<CircuitBreakerState>(&contents) else {
            continue;
        };
        if Utc::now() - state.updated_at > max_age {
            let _ = std::fs::remove_file(&path);
            pruned += 1;
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[test]
    fn starts_closed_and_allows_requests() {
        let dir = fresh_dir();
        let breaker = CircuitBreaker::new(dir.path(), "claude");
        assert!(breaker.allow_request().unwrap());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let dir = fresh_dir();
        let breaker = CircuitBreaker::new(dir.path(), "claude")
            .with_config(CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 2,
            });

        for _ in 0..2 {
            breaker.record_failure().unwrap();
        }
        assert!(breaker.allow_request().unwrap(), "not yet at threshold");

        breaker.record_failure().unwrap();
        assert!(!breaker.allow_request().unwrap(), "should be open now");
    }

    #[test]
    fn success_resets_closed_breaker() {
        let dir = fresh_dir();
        let breaker = CircuitBreaker::new(dir.path(), "claude")
            .with_config(CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 2,
            });

        breaker.record_failure().unwrap();
        breaker.record_failure().unwrap();
        breaker.record_success().unwrap();

        let state = breaker.load().unwrap();
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn half_open_recloses_after_success_threshold() {
        let dir = fresh_dir();
        let breaker = CircuitBreaker::new(dir.path(), "claude").with_config(
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(0),
                success_threshold: 2,
            },
        );

        breaker.record_failure().unwrap();
        assert_eq!(breaker.load().unwrap().state(&breaker.config), CircuitState::HalfOpen);

        breaker.record_success().unwrap();
        assert_eq!(breaker.load().unwrap().state(&breaker.config), CircuitState::HalfOpen);

        breaker.record_success().unwrap();
        assert_eq!(breaker.load().unwrap().state(&breaker.config), CircuitState::Closed);
    }

    #[test]
    fn prune_stale_removes_old_files() {
        let dir = fresh_dir();
        let breaker = CircuitBreaker::new(dir.path(), "claude");
        breaker.record_failure().unwrap();

        // Not yet stale at 7 days.
        let pruned = prune_stale(dir.path(), chrono::Duration::days(7)).unwrap();
        assert_eq!(pruned, 0);

        // Everything is stale at a zero-length max age.
        let pruned = prune_stale(dir.path(), chrono::Duration::zero()).unwrap();
        assert_eq!(pruned, 1);
    }
}
