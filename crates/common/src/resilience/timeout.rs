//! Deadline management for probe execution
//!
//! The controller owns a default [`TimeoutConfig`] plus per-key overrides
//! (e.g. a slow target that needs a longer window). Only the `total`
//! duration bounds execution here; `connect` and `read` are exported for
//! HTTP clients that can honor them separately.

use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tracing::warn;

/// A set of related timeouts for one operation class.
///
/// `total >= max(connect, read)` is recommended but not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Connection establishment timeout.
    pub connect: Duration,
    /// Read timeout (also used for writes by HTTP consumers).
    pub read: Duration,
    /// Total operation deadline.
    pub total: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(30),
            total: Duration::from_secs(60),
        }
    }
}

/// Error returned when a bounded operation exceeds its deadline.
///
/// Cancellation of the wrapped work is best-effort: the future is dropped
/// when the deadline fires, so the work is no longer observable as running
/// from the caller's perspective.
#[derive(Debug, Clone, Error)]
#[error("operation timed out after {timeout:?}")]
pub struct TimeoutElapsed {
    /// The deadline that elapsed.
    pub timeout: Duration,
    /// The override key in effect, when one was used.
    pub key: Option<String>,
}

/// Snapshot returned by [`TimeoutController::stats`].
#[derive(Debug, Clone)]
pub struct TimeoutControllerStats {
    /// The default configuration.
    pub default_config: TimeoutConfig,
    /// Number of per-key overrides.
    pub override_count: usize,
}

/// Timeout controller with a default config and per-key overrides.
#[derive(Debug, Default)]
pub struct TimeoutController {
    default_config: TimeoutConfig,
    overrides: DashMap<String, TimeoutConfig>,
}

impl TimeoutController {
    /// Create a controller with the given default configuration.
    pub fn new(default_config: TimeoutConfig) -> Self {
        Self { default_config, overrides: DashMap::new() }
    }

    /// Set a custom timeout configuration for `key`.
    pub fn set_timeout(&self, key: impl Into<String>, config: TimeoutConfig) {
        self.overrides.insert(key.into(), config);
    }

    /// Get the effective configuration for `key`, falling back to the
    /// default when no override exists (or no key is given).
    pub fn get_timeout(&self, key: Option<&str>) -> TimeoutConfig {
        key.and_then(|k| self.overrides.get(k).map(|entry| *entry.value()))
            .unwrap_or(self.default_config)
    }

    /// Remove the override for `key`, if any.
    pub fn clear_timeout(&self, key: &str) {
        self.overrides.remove(key);
    }

    /// Run `work` under a deadline.
    ///
    /// The deadline is `timeout` when supplied, otherwise the `total`
    /// duration of the effective configuration for `key`. When the
    /// deadline fires the work is dropped and [`TimeoutElapsed`] is
    /// returned.
    pub async fn execute_with_timeout<F, T>(
        &self,
        work: F,
        timeout: Option<Duration>,
        key: Option<&str>,
    ) -> Result<T, TimeoutElapsed>
    where
        F: std::future::Future<Output = T>,
    {
        let limit = timeout.unwrap_or_else(|| self.get_timeout(key).total);

        match tokio::time::timeout(limit, work).await {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!("operation timed out after {:?} (key: {:?})", limit, key);
                Err(TimeoutElapsed { timeout: limit, key: key.map(str::to_string) })
            }
        }
    }

    /// Snapshot of the controller.
    pub fn stats(&self) -> TimeoutControllerStats {
        TimeoutControllerStats {
            default_config: self.default_config,
            override_count: self.overrides.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TimeoutConfig::default();
        assert_eq!(config.connect, Duration::from_secs(10));
        assert_eq!(config.read, Duration::from_secs(30));
        assert_eq!(config.total, Duration::from_secs(60));
    }

    #[test]
    fn test_override_lifecycle() {
        let controller = TimeoutController::default();
        let custom = TimeoutConfig {
            connect: Duration::from_secs(1),
            read: Duration::from_secs(2),
            total: Duration::from_secs(3),
        };

        assert_eq!(controller.get_timeout(Some("slow-host")), TimeoutConfig::default());

        controller.set_timeout("slow-host", custom);
        assert_eq!(controller.get_timeout(Some("slow-host")), custom);
        assert_eq!(controller.get_timeout(Some("other")), TimeoutConfig::default());
        assert_eq!(controller.get_timeout(None), TimeoutConfig::default());
        assert_eq!(controller.stats().override_count, 1);

        controller.clear_timeout("slow-host");
        assert_eq!(controller.get_timeout(Some("slow-host")), TimeoutConfig::default());
        assert_eq!(controller.stats().override_count, 0);
    }

    #[tokio::test]
    async fn test_execute_completes_within_deadline() {
        let controller = TimeoutController::default();

        let result = controller
            .execute_with_timeout(async { 7 }, Some(Duration::from_secs(1)), None)
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let controller = TimeoutController::default();

        let result = controller
            .execute_with_timeout(
                tokio::time::sleep(Duration::from_secs(60)),
                Some(Duration::from_millis(10)),
                Some("probe"),
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.timeout, Duration::from_millis(10));
        assert_eq!(err.key.as_deref(), Some("probe"));
    }

    /// Without an explicit deadline the per-key override's `total` applies.
    #[tokio::test]
    async fn test_execute_uses_key_override() {
        let controller = TimeoutController::default();
        controller.set_timeout(
            "fast",
            TimeoutConfig {
                connect: Duration::from_millis(5),
                read: Duration::from_millis(5),
                total: Duration::from_millis(20),
            },
        );

        let result = controller
            .execute_with_timeout(
                tokio::time::sleep(Duration::from_secs(60)),
                None,
                Some("fast"),
            )
            .await;

        assert_eq!(result.unwrap_err().timeout, Duration::from_millis(20));
    }

    /// A timed-out future is dropped; its partial effects stop at the last
    /// completed await point.
    #[tokio::test]
    async fn test_timeout_drops_work() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let controller = TimeoutController::default();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let result = controller
            .execute_with_timeout(
                async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    flag.store(true, Ordering::SeqCst);
                },
                Some(Duration::from_millis(10)),
                None,
            )
            .await;

        assert!(result.is_err());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
