//! Per-name circuit breakers protecting failing scan targets
//!
//! A breaker stops the workers from hammering a downstream that keeps
//! failing and periodically probes for recovery:
//!
//! - CLOSED -> OPEN when the failure threshold is reached
//! - OPEN -> HALF_OPEN once the recovery window elapses
//! - HALF_OPEN -> CLOSED after enough successes
//! - HALF_OPEN -> OPEN on a single failure
//!
//! HALF_OPEN admits requests freely; protection comes from the small
//! success threshold and the immediate re-open on failure. All state lives
//! behind one exclusive lock so transitions are totally ordered and no
//! caller observes an intermediate state.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests admitted.
    Closed,
    /// Failing, requests rejected.
    Open,
    /// Testing recovery, requests admitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Failures in CLOSED before the circuit opens.
    pub failure_threshold: u32,
    /// Successes in HALF_OPEN before the circuit closes.
    pub success_threshold: u32,
    /// How long an open circuit waits before admitting a probe request.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    /// Failures in CLOSED before the circuit opens.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Successes in HALF_OPEN before the circuit closes.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Recovery window an open circuit waits before probing.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of a breaker's state returned by [`CircuitBreaker::stats`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures observed in CLOSED.
    pub failure_count: u32,
    /// Successes observed in HALF_OPEN.
    pub success_count: u32,
    /// Configured failure threshold.
    pub failure_threshold: u32,
    /// Configured success threshold.
    pub success_threshold: u32,
    /// Configured recovery window.
    pub recovery_timeout: Duration,
}

/// State record guarded by the breaker's exclusive lock.
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    // Only meaningful while the state is not CLOSED.
    last_failure_time: Option<Instant>,
}

impl BreakerInner {
    fn transition_to(&mut self, name: &str, next: CircuitState) {
        let prev = self.state;
        self.state = next;

        match next {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
                self.last_failure_time = None;
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                self.success_count = 0;
            }
        }

        info!("circuit '{}' transitioned: {} -> {}", name, prev, next);
    }
}

/// Named three-state circuit breaker.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: Arc<C>,
}

impl CircuitBreaker<SystemClock> {
    /// Create a closed breaker using the system clock.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a closed breaker with a custom clock (useful for testing).
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::with_shared_clock(name.into(), config, Arc::new(clock)))
    }

    /// Create a breaker from an already-validated configuration.
    pub(crate) fn with_shared_clock(
        name: String,
        config: CircuitBreakerConfig,
        clock: Arc<C>,
    ) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
            clock,
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether execution is admitted, performing the
    /// OPEN -> HALF_OPEN transition when the recovery window has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| self.clock.now().duration_since(t))
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    inner.transition_to(&self.name, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful execution.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.transition_to(&self.name, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                warn!("circuit '{}' received success while open", self.name);
            }
        }
    }

    /// Record a failed execution.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(self.clock.now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        "circuit '{}' opening after {} failures",
                        self.name, inner.failure_count
                    );
                    inner.transition_to(&self.name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // A single failure while probing re-opens immediately.
                warn!("circuit '{}' re-opening on half-open failure", self.name);
                inner.transition_to(&self.name, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Execute `operation` with circuit breaker protection.
    ///
    /// Fails with [`ResilienceError::CircuitOpen`] without invoking the
    /// operation when admission is denied; otherwise runs it, records the
    /// outcome, and passes downstream failures through as
    /// [`ResilienceError::OperationFailed`]. No lock is held while the
    /// operation runs.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.can_execute() {
            debug!("circuit '{}' rejecting call", self.name);
            return Err(ResilienceError::CircuitOpen { name: self.name.clone() });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Force the breaker back to CLOSED with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.transition_to(&self.name, CircuitState::Closed);
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether the circuit is admitting requests normally.
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Whether the circuit is rejecting requests.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Whether the circuit is probing for recovery.
    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Internally consistent snapshot of the breaker.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            recovery_timeout: self.config.recovery_timeout,
        }
    }
}

/// Registry of named circuit breakers, created lazily.
///
/// A breaker keeps the parameters supplied on first request for the
/// registry's lifetime; later `get` calls with different parameters return
/// the existing breaker unchanged. There is no removal API.
pub struct CircuitBreakerRegistry<C: Clock = SystemClock> {
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    clock: Arc<C>,
}

impl CircuitBreakerRegistry<SystemClock> {
    /// Create an empty registry using the system clock.
    pub fn new() -> Self {
        Self { breakers: DashMap::new(), clock: Arc::new(SystemClock) }
    }
}

impl Default for CircuitBreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> CircuitBreakerRegistry<C> {
    /// Create an empty registry with a custom clock (useful for testing).
    pub fn with_clock(clock: C) -> Self {
        Self { breakers: DashMap::new(), clock: Arc::new(clock) }
    }

    /// Return the breaker registered under `name`, creating it with
    /// `config` when absent.
    pub fn get(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Arc<CircuitBreaker<C>>> {
        config.validate()?;
        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_shared_clock(
                    name.to_string(),
                    config,
                    Arc::clone(&self.clock),
                ))
            })
            .clone();
        Ok(breaker)
    }

    /// Snapshot of every registered breaker.
    pub fn get_all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }
}
