//! Keyed token-bucket rate limiting for probe admission
//!
//! Each caller identity (worker, target, tenant) gets its own
//! [`TokenBucket`] holding real-valued tokens that accrue at a fixed rate
//! up to a capacity. Admission consumes tokens; an empty bucket means the
//! caller is throttled. Refill uses the monotonic [`Clock`] so wall-clock
//! jumps never grant or revoke tokens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::{ConfigError, ConfigResult};

/// Key-derivation function applied before bucket lookup.
type KeyFn = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Configuration for a rate limiter and the buckets it creates.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum tokens a bucket can hold.
    pub capacity: f64,
    /// Tokens refilled per second.
    pub rate: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { capacity: 100.0, rate: 10.0 }
    }
}

impl RateLimitConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(ConfigError::invalid("capacity must be a positive number"));
        }
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(ConfigError::invalid("rate must be a positive number"));
        }
        Ok(())
    }
}

/// Builder for [`RateLimitConfig`].
#[derive(Debug)]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl Default for RateLimitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self { config: RateLimitConfig::default() }
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(mut self, capacity: f64) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Tokens refilled per second.
    pub fn rate(mut self, rate: f64) -> Self {
        self.config.rate = rate;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> ConfigResult<RateLimitConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Accounting state guarded by the bucket's exclusive lock.
struct BucketState {
    tokens: f64,
    last_update: Instant,
}

/// Token bucket with monotonic refill.
///
/// Invariant: `0 <= tokens <= capacity` after every observable operation.
/// Buckets start full. Requests for more tokens than `capacity` can never
/// succeed; callers must guard `n <= capacity` before using [`wait`].
///
/// [`wait`]: TokenBucket::wait
pub struct TokenBucket<C: Clock = SystemClock> {
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
    // Unsynchronized mirror of `tokens` for lock-free stats reads.
    estimate: AtomicU64,
    clock: Arc<C>,
}

impl TokenBucket<SystemClock> {
    /// Create a full bucket using the system clock.
    pub fn new(capacity: f64, rate: f64) -> ConfigResult<Self> {
        Self::with_clock(capacity, rate, SystemClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a full bucket with a custom clock (useful for testing).
    pub fn with_clock(capacity: f64, rate: f64, clock: C) -> ConfigResult<Self> {
        let config = RateLimitConfig { capacity, rate };
        config.validate()?;
        Ok(Self::with_shared_clock(&config, Arc::new(clock)))
    }

    /// Create a full bucket from an already-validated configuration.
    pub(crate) fn with_shared_clock(config: &RateLimitConfig, clock: Arc<C>) -> Self {
        Self {
            capacity: config.capacity,
            rate: config.rate,
            state: Mutex::new(BucketState { tokens: config.capacity, last_update: clock.now() }),
            estimate: AtomicU64::new(config.capacity.to_bits()),
            clock,
        }
    }

    /// Try to consume `tokens` from the bucket. Never blocks on refill.
    ///
    /// Returns `true` and decrements when enough tokens are available after
    /// a refill, `false` without decrementing otherwise.
    pub async fn consume(&self, tokens: f64) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        let admitted = if state.tokens >= tokens {
            state.tokens -= tokens;
            true
        } else {
            debug!("rate limit: insufficient tokens ({:.2} < {:.2})", state.tokens, tokens);
            false
        };

        self.estimate.store(state.tokens.to_bits(), Ordering::Relaxed);
        admitted
    }

    /// Wait until `tokens` can be consumed.
    ///
    /// Sleeps for the projected refill time outside the lock and retries;
    /// coalesced or early wakeups simply re-enter the loop. Dropping the
    /// future during the sleep cancels the wait without touching the
    /// bucket. Never completes when `tokens > capacity`.
    pub async fn wait(&self, tokens: f64) {
        loop {
            if self.consume(tokens).await {
                return;
            }

            let sleep_for = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                let needed = tokens - state.tokens;
                if needed <= 0.0 {
                    continue;
                }
                Duration::from_secs_f64(needed / self.rate)
            };

            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Refill from elapsed monotonic time. O(1) regardless of the gap.
    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.duration_since(state.last_update);
        state.last_update = now;
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
    }

    /// Current available tokens.
    ///
    /// Read without taking the bucket lock; the value is an estimate that
    /// does not include refill accrued since the last operation.
    pub fn available_tokens(&self) -> f64 {
        f64::from_bits(self.estimate.load(Ordering::Relaxed))
    }

    /// Maximum tokens the bucket can hold.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens refilled per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

/// Per-bucket snapshot returned by [`RateLimiter::stats`].
#[derive(Debug, Clone)]
pub struct BucketStats {
    /// Estimated available tokens (unsynchronized read).
    pub available_tokens: f64,
    /// Bucket capacity.
    pub capacity: f64,
}

/// Snapshot of a rate limiter's buckets.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    /// Number of live buckets.
    pub bucket_count: usize,
    /// Configured per-bucket capacity.
    pub capacity: f64,
    /// Configured refill rate (tokens/second).
    pub rate: f64,
    /// Per-key bucket snapshots.
    pub buckets: HashMap<String, BucketStats>,
}

/// Rate limiter keyed by caller identity.
///
/// Buckets are created lazily and start full. Operations on one key never
/// affect the bucket of another key; for a single key, consumption is
/// totally ordered under the bucket's lock, so concurrent callers succeed
/// exactly once per token.
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimitConfig,
    key_fn: KeyFn,
    buckets: DashMap<String, Arc<TokenBucket<C>>>,
    clock: Arc<C>,
}

impl RateLimiter<SystemClock> {
    /// Create a limiter using the system clock.
    pub fn new(config: RateLimitConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a limiter with the default configuration.
    pub fn with_defaults() -> Self {
        Self {
            config: RateLimitConfig::default(),
            key_fn: Box::new(str::to_string),
            buckets: DashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a limiter with a custom clock (useful for testing).
    pub fn with_clock(config: RateLimitConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            key_fn: Box::new(str::to_string),
            buckets: DashMap::new(),
            clock: Arc::new(clock),
        })
    }

    /// Replace the identity key derivation with a custom function
    /// (e.g. normalizing an IP to its /24).
    pub fn with_key_fn(mut self, key_fn: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.key_fn = Box::new(key_fn);
        self
    }

    fn bucket(&self, key: &str) -> Arc<TokenBucket<C>> {
        let derived = (self.key_fn)(key);
        self.buckets
            .entry(derived)
            .or_insert_with(|| {
                Arc::new(TokenBucket::with_shared_clock(&self.config, Arc::clone(&self.clock)))
            })
            .clone()
    }

    /// Check whether one unit of work is admitted for `key`.
    pub async fn check(&self, key: &str) -> bool {
        self.check_n(key, 1.0).await
    }

    /// Check whether `tokens` units of work are admitted for `key`.
    pub async fn check_n(&self, key: &str, tokens: f64) -> bool {
        self.bucket(key).consume(tokens).await
    }

    /// Wait until one unit of work is admitted for `key`.
    pub async fn wait(&self, key: &str) {
        self.wait_n(key, 1.0).await;
    }

    /// Wait until `tokens` units of work are admitted for `key`.
    pub async fn wait_n(&self, key: &str, tokens: f64) {
        self.bucket(key).wait(tokens).await;
    }

    /// Drop the bucket for `key`. The next operation recreates it full.
    pub fn reset(&self, key: &str) {
        let derived = (self.key_fn)(key);
        self.buckets.remove(&derived);
    }

    /// Drop all buckets.
    pub fn reset_all(&self) {
        self.buckets.clear();
    }

    /// Snapshot of the limiter and its buckets.
    ///
    /// Per-bucket token counts are unsynchronized estimates.
    pub fn stats(&self) -> RateLimiterStats {
        let buckets = self
            .buckets
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    BucketStats {
                        available_tokens: entry.value().available_tokens(),
                        capacity: entry.value().capacity(),
                    },
                )
            })
            .collect();

        RateLimiterStats {
            bucket_count: self.buckets.len(),
            capacity: self.config.capacity,
            rate: self.config.rate,
            buckets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::clock::MockClock;
    use super::*;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = TokenBucket::new(10.0, 2.0).unwrap();
        assert_eq!(bucket.available_tokens(), 10.0);
        assert_eq!(bucket.capacity(), 10.0);
        assert_eq!(bucket.rate(), 2.0);

        // A fresh bucket admits immediately.
        assert!(tokio_test::block_on(bucket.consume(1.0)));
    }

    #[tokio::test]
    async fn test_bucket_consume() {
        let clock = MockClock::new();
        let bucket = TokenBucket::with_clock(10.0, 2.0, clock).unwrap();

        assert!(bucket.consume(5.0).await);
        assert_eq!(bucket.available_tokens(), 5.0);

        assert!(bucket.consume(5.0).await);
        assert_eq!(bucket.available_tokens(), 0.0);

        assert!(!bucket.consume(1.0).await);
        assert_eq!(bucket.available_tokens(), 0.0);
    }

    /// Consuming zero tokens always succeeds and changes nothing.
    #[tokio::test]
    async fn test_bucket_consume_zero() {
        let clock = MockClock::new();
        let bucket = TokenBucket::with_clock(10.0, 2.0, clock).unwrap();

        assert!(bucket.consume(0.0).await);
        assert_eq!(bucket.available_tokens(), 10.0);
    }

    /// A full-capacity request drains the bucket; anything above capacity
    /// is always rejected.
    #[tokio::test]
    async fn test_bucket_capacity_boundary() {
        let clock = MockClock::new();
        let bucket = TokenBucket::with_clock(10.0, 2.0, clock.clone()).unwrap();

        assert!(!bucket.consume(10.1).await);
        assert_eq!(bucket.available_tokens(), 10.0);

        assert!(bucket.consume(10.0).await);
        assert_eq!(bucket.available_tokens(), 0.0);

        // Even after arbitrarily long refill, over-capacity never succeeds.
        clock.advance(Duration::from_secs(3600));
        assert!(!bucket.consume(10.1).await);
    }

    #[tokio::test]
    async fn test_bucket_refill_caps_at_capacity() {
        let clock = MockClock::new();
        let bucket = TokenBucket::with_clock(10.0, 5.0, clock.clone()).unwrap();

        assert!(bucket.consume(10.0).await);

        // 1s at 5 tokens/s refills half the bucket.
        clock.advance(Duration::from_secs(1));
        assert!(bucket.consume(5.0).await);
        assert_eq!(bucket.available_tokens(), 0.0);

        // A long gap refills to capacity, not beyond.
        clock.advance(Duration::from_secs(600));
        assert!(bucket.consume(10.0).await);
        assert!(!bucket.consume(0.5).await);
    }

    #[tokio::test]
    async fn test_bucket_wait_returns_after_refill() {
        let bucket = TokenBucket::new(5.0, 200.0).unwrap();

        assert!(bucket.consume(5.0).await);
        // 1 token at 200/s refills in ~5ms.
        bucket.wait(1.0).await;
    }

    /// Dropping a wait mid-sleep leaves the bucket untouched.
    #[tokio::test]
    async fn test_bucket_wait_cancellation() {
        let clock = MockClock::new();
        let bucket = Arc::new(TokenBucket::with_clock(5.0, 0.001, clock).unwrap());
        assert!(bucket.consume(5.0).await);

        let waiter = Arc::clone(&bucket);
        let handle = tokio::spawn(async move { waiter.wait(1.0).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert_eq!(bucket.available_tokens(), 0.0);
    }

    #[test]
    fn test_rate_limit_config_validation() {
        assert!(RateLimitConfig::builder().capacity(0.0).build().is_err());
        assert!(RateLimitConfig::builder().capacity(-1.0).build().is_err());
        assert!(RateLimitConfig::builder().rate(0.0).build().is_err());
        assert!(RateLimitConfig::builder().rate(f64::NAN).build().is_err());
        assert!(RateLimitConfig::builder().capacity(3.0).rate(0.1).build().is_ok());
    }

    #[tokio::test]
    async fn test_limiter_burst_then_reject() {
        let config = RateLimitConfig::builder().capacity(3.0).rate(0.1).build().unwrap();
        let limiter = RateLimiter::with_clock(config, MockClock::new()).unwrap();

        assert!(limiter.check("a").await);
        assert!(limiter.check("a").await);
        assert!(limiter.check("a").await);
        assert!(!limiter.check("a").await);

        limiter.reset("a");
        assert!(limiter.check("a").await);
    }

    /// Operations on one key never alter another key's bucket.
    #[tokio::test]
    async fn test_limiter_key_independence() {
        let config = RateLimitConfig::builder().capacity(2.0).rate(0.1).build().unwrap();
        let limiter = RateLimiter::with_clock(config, MockClock::new()).unwrap();

        assert!(limiter.check_n("a", 2.0).await);
        assert!(!limiter.check("a").await);

        assert!(limiter.check("b").await);
        let stats = limiter.stats();
        assert_eq!(stats.buckets["b"].available_tokens, 1.0);
        assert_eq!(stats.buckets["a"].available_tokens, 0.0);
    }

    #[tokio::test]
    async fn test_limiter_key_derivation() {
        let config = RateLimitConfig::builder().capacity(2.0).rate(0.1).build().unwrap();
        let limiter = RateLimiter::with_clock(config, MockClock::new())
            .unwrap()
            .with_key_fn(|key| key.split(':').next().unwrap_or(key).to_string());

        // Both identifiers collapse onto the same bucket.
        assert!(limiter.check("10.0.0.1:80").await);
        assert!(limiter.check("10.0.0.1:443").await);
        assert!(!limiter.check("10.0.0.1:8080").await);
        assert_eq!(limiter.stats().bucket_count, 1);
    }

    #[tokio::test]
    async fn test_limiter_reset_all() {
        let config = RateLimitConfig::builder().capacity(1.0).rate(0.1).build().unwrap();
        let limiter = RateLimiter::with_clock(config, MockClock::new()).unwrap();

        assert!(limiter.check("a").await);
        assert!(limiter.check("b").await);
        assert_eq!(limiter.stats().bucket_count, 2);

        limiter.reset_all();
        assert_eq!(limiter.stats().bucket_count, 0);
        assert!(limiter.check("a").await);
    }

    /// Concurrent admission for the same key grants exactly one success
    /// per available token.
    #[tokio::test]
    async fn test_limiter_concurrent_exactly_once() {
        let config = RateLimitConfig::builder().capacity(1.0).rate(0.0001).build().unwrap();
        let limiter = Arc::new(RateLimiter::with_clock(config, MockClock::new()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.check("shared").await }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_limiter_stats_snapshot() {
        let config = RateLimitConfig::builder().capacity(5.0).rate(2.5).build().unwrap();
        let limiter = RateLimiter::with_clock(config, MockClock::new()).unwrap();

        assert!(limiter.check_n("worker-1", 3.0).await);
        let stats = limiter.stats();

        assert_eq!(stats.bucket_count, 1);
        assert_eq!(stats.capacity, 5.0);
        assert_eq!(stats.rate, 2.5);
        assert_eq!(stats.buckets["worker-1"].available_tokens, 2.0);
        assert_eq!(stats.buckets["worker-1"].capacity, 5.0);
    }
}
