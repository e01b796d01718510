//! Common error types shared across the engine
//!
//! Module-specific errors should **compose** with [`CommonError`] rather
//! than re-declaring the standard patterns (timeouts, rate limiting,
//! serialization, persistence). Every error type in the workspace also
//! implements [`ErrorClassification`] so callers can make uniform retry
//! and alerting decisions without matching on concrete variants.

use std::time::Duration;

use thiserror::Error;

/// Standard result type using [`CommonError`].
pub type CommonResult<T> = Result<T, CommonError>;

/// Severity levels used for monitoring and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, expected conditions (missing resources, empty results).
    Info,
    /// Degraded but operational (throttling, transient failures).
    Warning,
    /// Failure requiring attention.
    Error,
    /// System integrity at risk.
    Critical,
}

/// Classification interface implemented by every error type in the engine.
pub trait ErrorClassification {
    /// Whether retrying the failed operation can reasonably succeed.
    fn is_retryable(&self) -> bool;

    /// Severity for monitoring and alerting.
    fn severity(&self) -> ErrorSeverity;

    /// Whether this error requires immediate attention.
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Suggested delay before retrying, when one is known.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Common error variants that appear across multiple modules.
#[derive(Debug, Clone, Error)]
pub enum CommonError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },

    /// A named circuit breaker denied admission.
    #[error("Circuit breaker open for '{service}'")]
    CircuitBreakerOpen {
        /// Breaker name.
        service: String,
        /// Remaining recovery window, when known.
        retry_after: Option<Duration>,
    },

    /// A rate limiter denied admission.
    #[error("Rate limit exceeded for '{key}'")]
    RateLimitExceeded {
        /// The limiter key that ran out of tokens.
        key: String,
    },

    /// An operation exceeded its deadline.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// Human-readable operation label.
        operation: String,
        /// The deadline that elapsed.
        duration: Duration,
    },

    /// Serialization or deserialization errors.
    #[error("Serialization error ({format}): {message}")]
    Serialization {
        /// Wire format involved (JSON, TOML, ...).
        format: String,
        /// Underlying parser/encoder message.
        message: String,
    },

    /// Data persistence errors (file I/O and friends).
    #[error("Persistence error during '{operation}': {message}")]
    Persistence {
        /// The operation that failed.
        operation: String,
        /// Underlying I/O message.
        message: String,
    },

    /// Input validation errors.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// Offending field.
        field: String,
        /// Why validation failed.
        message: String,
    },

    /// Resource not found.
    #[error("{resource_type} not found: {identifier}")]
    NotFound {
        /// Kind of resource (plugin, tool, bucket, ...).
        resource_type: String,
        /// Identifier that failed to resolve.
        identifier: String,
    },

    /// Internal errors that shouldn't normally occur.
    #[error("Internal error: {message}")]
    Internal {
        /// Invariant that was violated.
        message: String,
    },

    /// An async task was cancelled before completion.
    #[error("Task '{task}' cancelled")]
    TaskCancelled {
        /// The cancelled task.
        task: String,
    },
}

impl CommonError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Shorthand for a persistence error.
    pub fn persistence(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence { operation: operation.into(), message: message.into() }
    }

    /// Shorthand for a serialization error.
    pub fn serialization(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization { format: format.into(), message: message.into() }
    }
}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitBreakerOpen { .. }
                | Self::RateLimitExceeded { .. }
                | Self::Timeout { .. }
                | Self::Persistence { .. }
        )
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } => ErrorSeverity::Info,
            Self::CircuitBreakerOpen { .. }
            | Self::RateLimitExceeded { .. }
            | Self::Timeout { .. }
            | Self::TaskCancelled { .. } => ErrorSeverity::Warning,
            Self::Config { .. }
            | Self::Serialization { .. }
            | Self::Persistence { .. }
            | Self::Validation { .. } => ErrorSeverity::Error,
            Self::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitBreakerOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Display strings carry the identifying detail for each variant.
    #[test]
    fn test_common_error_display() {
        let err = CommonError::CircuitBreakerOpen { service: "dns".to_string(), retry_after: None };
        assert!(err.to_string().contains("dns"));

        let err = CommonError::Timeout {
            operation: "probe".to_string(),
            duration: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("probe"));

        let err = CommonError::NotFound {
            resource_type: "plugin".to_string(),
            identifier: "sqli_basic".to_string(),
        };
        assert!(err.to_string().contains("sqli_basic"));
    }

    /// Admission denials are retryable; structural failures are not.
    #[test]
    fn test_classification_retryability() {
        let open = CommonError::CircuitBreakerOpen {
            service: "http".to_string(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert!(open.is_retryable());
        assert_eq!(open.retry_after(), Some(Duration::from_secs(30)));

        let config = CommonError::config("bad value");
        assert!(!config.is_retryable());
        assert_eq!(config.retry_after(), None);
    }

    /// Severity ordering follows Info < Warning < Error < Critical.
    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
    }

    /// Internal errors are the only critical variant in the common set.
    #[test]
    fn test_critical_classification() {
        let internal = CommonError::Internal { message: "invariant broken".to_string() };
        assert!(internal.is_critical());
        assert_eq!(internal.severity(), ErrorSeverity::Critical);

        let limited = CommonError::RateLimitExceeded { key: "10.0.0.1".to_string() };
        assert!(!limited.is_critical());
        assert_eq!(limited.severity(), ErrorSeverity::Warning);
    }
}
