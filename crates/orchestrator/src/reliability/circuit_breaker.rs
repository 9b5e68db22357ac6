//! Circuit Breaker Implementation
//!
//! One breaker per logical dependency key, held in an explicit registry so
//! callers (and tests) decide how widely breaker state is shared. The cooldown
//! is evaluated lazily on the next call; there is no background timer.

use common::AppError;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time after the last failure before a probe call is let through
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// Calls flow through normally
    #[default]
    Closed,
    /// Calls are rejected until the cooldown elapses
    Open,
    /// Cooldown elapsed; calls flow and the first success closes the circuit
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Mutable state of one dependency's breaker.
///
/// Invariant: `Open` implies `consecutive_failures >= failure_threshold`.
#[derive(Debug)]
pub struct CircuitState {
    dependency_key: String,
    state: CircuitBreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    total_calls: u64,
    rejected_calls: u64,
    trip_count: u64,
}

impl CircuitState {
    pub fn new(dependency_key: impl Into<String>) -> Self {
        Self {
            dependency_key: dependency_key.into(),
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            total_calls: 0,
            rejected_calls: 0,
            trip_count: 0,
        }
    }

    pub fn dependency_key(&self) -> &str {
        &self.dependency_key
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitBreakerState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.last_failure_at
    }

    /// Decide whether a call may proceed. On rejection returns the remaining
    /// cooldown.
    pub fn try_acquire(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> Result<(), Duration> {
        self.total_calls += 1;

        if self.state != CircuitBreakerState::Open {
            return Ok(());
        }

        let cooldown = config.cooldown();
        let since_failure = self
            .last_failure_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(cooldown);

        if since_failure < cooldown {
            self.rejected_calls += 1;
            debug!(
                dependency = %self.dependency_key,
                "Circuit breaker open - blocking request"
            );
            return Err(cooldown - since_failure);
        }

        info!(
            dependency = %self.dependency_key,
            "Circuit breaker cooldown elapsed - moving to half-open"
        );
        self.state = CircuitBreakerState::HalfOpen;
        self.consecutive_failures = 0;
        Ok(())
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitBreakerState::Closed => {
                if self.consecutive_failures > 0 {
                    debug!(
                        dependency = %self.dependency_key,
                        failures = self.consecutive_failures,
                        "Circuit breaker resetting failure count"
                    );
                    self.consecutive_failures = 0;
                }
            }
            CircuitBreakerState::HalfOpen => {
                info!(
                    dependency = %self.dependency_key,
                    "Circuit breaker probe succeeded - closing"
                );
                self.state = CircuitBreakerState::Closed;
                self.consecutive_failures = 0;
            }
            CircuitBreakerState::Open => {
                // A call admitted before the circuit tripped finished late.
                debug!(
                    dependency = %self.dependency_key,
                    "Success recorded while circuit is open - ignoring"
                );
            }
        }
    }

    pub fn record_failure(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);

        if self.state != CircuitBreakerState::Open
            && self.consecutive_failures >= config.failure_threshold
        {
            warn!(
                dependency = %self.dependency_key,
                failures = self.consecutive_failures,
                cooldown_ms = config.cooldown_ms,
                "Circuit breaker opening"
            );
            self.state = CircuitBreakerState::Open;
            self.trip_count += 1;
        } else {
            debug!(
                dependency = %self.dependency_key,
                failures = self.consecutive_failures,
                threshold = config.failure_threshold,
                "Circuit breaker recorded failure"
            );
        }
    }

    fn reset(&mut self) {
        self.state = CircuitBreakerState::Closed;
        self.consecutive_failures = 0;
        self.last_failure_at = None;
    }

    fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            dependency_key: self.dependency_key.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            total_calls: self.total_calls,
            rejected_calls: self.rejected_calls,
            trip_count: self.trip_count,
        }
    }
}

/// Statistics for circuit breaker operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub dependency_key: String,
    pub state: CircuitBreakerState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub trip_count: u64,
}

impl CircuitBreakerStats {
    pub fn rejection_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.rejected_calls as f64 / self.total_calls as f64
        }
    }
}

/// Registry of per-dependency breakers.
///
/// Each key has its own lock, so unrelated dependencies never contend. No
/// lock is held while the wrapped operation runs.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, Arc<Mutex<CircuitState>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn circuit(&self, dependency_key: &str) -> Arc<Mutex<CircuitState>> {
        if let Some(existing) = self.circuits.get(dependency_key) {
            return existing.clone();
        }
        self.circuits
            .entry(dependency_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitState::new(dependency_key))))
            .clone()
    }

    /// Run `operation` behind the breaker for `dependency_key` using the
    /// registry's configuration.
    pub async fn call<T, F, Fut>(&self, dependency_key: &str, operation: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let config = self.config;
        self.call_with(dependency_key, &config, operation).await
    }

    /// Run `operation` behind the breaker for `dependency_key` with an
    /// explicit threshold and cooldown.
    ///
    /// An open circuit fails with `SERVICE_UNAVAILABLE` without invoking
    /// `operation`. Failures of the operation itself are returned unchanged.
    pub async fn call_with<T, F, Fut>(
        &self,
        dependency_key: &str,
        config: &CircuitBreakerConfig,
        operation: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let circuit = self.circuit(dependency_key);

        let admission = circuit.lock().try_acquire(config, Instant::now());
        if let Err(remaining) = admission {
            return Err(AppError::service_unavailable(dependency_key, Some(remaining)).into());
        }

        match operation().await {
            Ok(value) => {
                circuit.lock().record_success();
                Ok(value)
            }
            Err(error) => {
                circuit.lock().record_failure(config, Instant::now());
                Err(error)
            }
        }
    }

    /// Current state; unknown keys report `Closed`.
    pub fn state(&self, dependency_key: &str) -> CircuitBreakerState {
        self.circuits
            .get(dependency_key)
            .map(|c| c.lock().state())
            .unwrap_or_default()
    }

    pub fn stats(&self, dependency_key: &str) -> Option<CircuitBreakerStats> {
        self.circuits
            .get(dependency_key)
            .map(|c| c.lock().stats())
    }

    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self
            .circuits
            .iter()
            .map(|entry| entry.value().lock().stats())
            .collect();
        stats.sort_by(|a, b| a.dependency_key.cmp(&b.dependency_key));
        stats
    }

    /// Force a breaker back to closed.
    pub fn reset(&self, dependency_key: &str) {
        if let Some(circuit) = self.circuits.get(dependency_key) {
            info!(dependency = %dependency_key, "Forcing circuit breaker to closed state");
            circuit.lock().reset();
        }
    }
}
