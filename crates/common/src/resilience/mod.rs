//! Resilience patterns gating every outbound probe
//!
//! This module provides the admission-control primitives the scan workers
//! are built on:
//! - **Token bucket / rate limiter**: keyed leaky-bucket accounting with
//!   monotonic refill ([`rate_limiter`])
//! - **Circuit breaker**: a per-name CLOSED/OPEN/HALF_OPEN recovery state
//!   machine with a lazy registry ([`circuit_breaker`])
//! - **Timeout controller**: default and per-key deadlines with bounded
//!   execution ([`timeout`])
//!
//! All deadline and refill arithmetic runs against the [`Clock`]
//! abstraction so state transitions can be tested deterministically with
//! [`MockClock`]; only audit timestamps elsewhere in the engine read the
//! wall clock.

use thiserror::Error;

pub mod circuit_breaker;
pub mod clock;
pub mod rate_limiter;
pub mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use rate_limiter::{
    BucketStats, RateLimitConfig, RateLimitConfigBuilder, RateLimiter, RateLimiterStats,
    TokenBucket,
};
pub use timeout::{TimeoutConfig, TimeoutController, TimeoutControllerStats, TimeoutElapsed};

/// Simple configuration error for validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value failed validation.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// What was invalid.
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type using simple config errors.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced by gated execution.
///
/// Generic over the wrapped operation's error type `E` so a denied
/// admission is always distinguishable from a downstream failure: callers
/// must not count [`ResilienceError::CircuitOpen`] as further evidence of
/// downstream ill-health.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The circuit breaker denied admission without running the operation.
    #[error("Circuit '{name}' is open, rejecting calls")]
    CircuitOpen {
        /// Name of the breaker that rejected the call.
        name: String,
    },

    /// The wrapped operation ran and failed.
    #[error("Operation failed")]
    OperationFailed {
        /// The downstream failure.
        #[source]
        source: E,
    },
}

/// Result type for gated execution.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
