//! Per-domain adaptive rate limiting.
//!
//! This module decides how fast a given external domain may be hit. Each
//! domain gets an adaptive token bucket: a configurable burst absorbs short
//! spikes, a per-domain interval enforces the sustained rate, and recorded
//! request outcomes nudge that interval up or down over time so that a
//! struggling host is hit more gently and a healthy one more eagerly.
//!
//! # Architecture
//!
//! - [`DomainKey`]: normalized hostname used as the partition key
//! - [`DomainRateLimiter`]: registry of per-domain state; the entry point
//! - [`RateLimitConfig`]: intervals, burst size, overrides, retention
//! - [`DomainMetrics`]: defensive copies of per-domain counters
//!
//! The registry map is sharded ([`DashMap`]), so creating or evicting one
//! domain never serializes callers working on other domains; each domain's
//! counters sit behind their own mutex, which is never held across an await.

mod config;
mod error;
mod key;
mod metrics;
mod state;

pub use config::RateLimitConfig;
pub use error::RateLimitError;
pub use key::DomainKey;
pub use metrics::{DomainMetrics, DomainMetricsMap};

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use state::DomainState;

/// Adaptive per-domain rate limiter shared by all fetch workers.
///
/// One instance is constructed at service startup and passed by reference
/// to every caller; there is no ambient global. Domain state is created
/// lazily on first access and reclaimed only by [`DomainRateLimiter::cleanup`].
///
/// Acquisition gives no FIFO guarantee among concurrent waiters on the
/// same domain: whichever caller re-checks first after a token becomes
/// available wins. Across distinct domains, callers are fully independent.
#[derive(Debug)]
pub struct DomainRateLimiter {
    /// Map of domain to limiter state, created on demand
    domains: DashMap<DomainKey, Arc<Mutex<DomainState>>>,
    /// Validated configuration, fixed for the limiter's lifetime
    config: RateLimitConfig,
}

impl DomainRateLimiter {
    /// Create a new limiter from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] for a zero interval, burst
    /// size, or per-domain override. Validation happens here so that a
    /// misconfigured service fails at startup, never at the first wait.
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        config.validate()?;
        Ok(Self {
            domains: DashMap::new(),
            config,
        })
    }

    /// Block until a request slot for `domain` is available.
    ///
    /// Returns immediately while burst tokens remain; otherwise suspends
    /// until the domain's interval has elapsed. Use
    /// [`DomainRateLimiter::wait_cancellable`] when the caller may need to
    /// give up early.
    ///
    /// # Panics
    ///
    /// Panics if the domain's state mutex is poisoned.
    pub async fn wait<K: Into<DomainKey>>(&self, domain: K) {
        let state = self.state_for(&domain.into());
        loop {
            match self.try_acquire(&state) {
                Ok(()) => return,
                Err(remaining) => tokio::time::sleep(remaining).await,
            }
        }
    }

    /// Like [`DomainRateLimiter::wait`], but gives up when `cancel` fires.
    ///
    /// Cancellation never mutates limiter state: no token is consumed and
    /// no timestamp is stamped for a wait that did not complete.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Canceled`] if the token fires before a
    /// slot was acquired.
    ///
    /// # Panics
    ///
    /// Panics if the domain's state mutex is poisoned.
    pub async fn wait_cancellable<K: Into<DomainKey>>(
        &self,
        cancel: &CancellationToken,
        domain: K,
    ) -> Result<(), RateLimitError> {
        let domain = domain.into();
        if cancel.is_cancelled() {
            return Err(RateLimitError::Canceled { domain });
        }

        let state = self.state_for(&domain);
        loop {
            match self.try_acquire(&state) {
                Ok(()) => return Ok(()),
                Err(remaining) => {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            return Err(RateLimitError::Canceled { domain });
                        }
                        () = tokio::time::sleep(remaining) => {}
                    }
                }
            }
        }
    }

    /// Record a successful request and its response time for `domain`
    ///
    /// # Panics
    ///
    /// Panics if the domain's state mutex is poisoned.
    pub fn record_success<K: Into<DomainKey>>(&self, domain: K, response_time: Duration) {
        self.record(&domain.into(), true, response_time);
    }

    /// Record a failed request and its response time for `domain`
    ///
    /// # Panics
    ///
    /// Panics if the domain's state mutex is poisoned.
    pub fn record_failure<K: Into<DomainKey>>(&self, domain: K, response_time: Duration) {
        self.record(&domain.into(), false, response_time);
    }

    /// Get a copy of the metrics for `domain`, or `None` if the limiter has
    /// never seen it.
    ///
    /// Unlike [`DomainRateLimiter::wait`] and the record methods, this is
    /// read-only and never creates domain state.
    ///
    /// # Panics
    ///
    /// Panics if the domain's state mutex is poisoned.
    #[must_use]
    pub fn metrics<K: Into<DomainKey>>(&self, domain: K) -> Option<DomainMetrics> {
        self.domains
            .get(&domain.into())
            .map(|state| state.lock().unwrap().metrics())
    }

    /// Get metrics for every domain the limiter currently tracks
    ///
    /// # Panics
    ///
    /// Panics if a domain's state mutex is poisoned.
    #[must_use]
    pub fn all_metrics(&self) -> DomainMetricsMap {
        let map: HashMap<String, DomainMetrics> = self
            .domains
            .iter()
            .map(|entry| {
                let domain = entry.key().to_string();
                let metrics = entry.value().lock().unwrap().metrics();
                (domain, metrics)
            })
            .collect();
        map.into()
    }

    /// Evict every domain that has been idle longer than the configured
    /// retention, bounding memory growth across a long-running process.
    /// Returns the number of evicted domains.
    ///
    /// # Panics
    ///
    /// Panics if a domain's state mutex is poisoned.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.idle_retention;
        let mut evicted = 0;

        self.domains.retain(|_, state| {
            let keep = state.lock().unwrap().idle_for(now) < retention;
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            log::debug!("evicted {evicted} idle domain(s) from rate limiter registry");
        }
        evicted
    }

    /// Get the number of domains currently tracked
    #[must_use]
    pub fn active_domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Look up or lazily create the state for a domain.
    ///
    /// Double-checked: the shared-read fast path avoids taking a write
    /// lock on the shard, and the entry API resolves the race where two
    /// callers miss at the same time.
    fn state_for(&self, domain: &DomainKey) -> Arc<Mutex<DomainState>> {
        if let Some(state) = self.domains.get(domain) {
            return Arc::clone(&state);
        }

        match self.domains.entry(domain.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Arc::clone(entry.get()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let base_interval = self.config.interval_for(domain);
                let state = Arc::new(Mutex::new(DomainState::new(
                    base_interval,
                    self.config.burst_size,
                    self.config.enable_adaptive,
                )));
                entry.insert(state).clone()
            }
        }
    }

    /// One acquisition attempt under the domain lock. The lock is released
    /// before the caller sleeps on the returned remaining duration.
    fn try_acquire(&self, state: &Arc<Mutex<DomainState>>) -> Result<(), Duration> {
        state.lock().unwrap().try_acquire(Instant::now())
    }

    fn record(&self, domain: &DomainKey, success: bool, response_time: Duration) {
        let state = self.state_for(domain);
        state.lock().unwrap().record(success, response_time, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limiter(interval: Duration, burst_size: u32) -> DomainRateLimiter {
        DomainRateLimiter::new(RateLimitConfig {
            default_interval: interval,
            burst_size,
            ..RateLimitConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config_fails_at_construction() {
        let config = RateLimitConfig {
            default_interval: Duration::ZERO,
            ..RateLimitConfig::default()
        };
        assert!(DomainRateLimiter::new(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_pacing() {
        let limiter = limiter(Duration::from_millis(100), 1);

        let start = Instant::now();
        limiter.wait("a.com").await;
        assert!(start.elapsed() < Duration::from_millis(50));

        limiter.wait("a.com").await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_domain_isolation() {
        let limiter = limiter(Duration::from_millis(100), 1);

        // Exhaust a.com's burst
        limiter.wait("a.com").await;

        // An unrelated domain is unaffected
        let start = Instant::now();
        limiter.wait("b.com").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_allows_immediate_requests() {
        let limiter = limiter(Duration::from_millis(100), 2);

        let start = Instant::now();
        limiter.wait("a.com").await;
        limiter.wait("a.com").await;
        assert!(start.elapsed() < Duration::from_millis(50));

        limiter.wait("a.com").await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let limiter = limiter(Duration::from_secs(10), 1);
        limiter.wait("a.com").await;

        let cancel = CancellationToken::new();
        let before = limiter.metrics("a.com").unwrap();

        let start = Instant::now();
        tokio::join!(
            async {
                let result = limiter.wait_cancellable(&cancel, "a.com").await;
                assert!(matches!(result, Err(RateLimitError::Canceled { .. })));
                assert!(start.elapsed() < Duration::from_secs(1));
            },
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        );

        // A canceled wait leaves the domain state untouched
        let after = limiter.metrics("a.com").unwrap();
        assert_eq!(before.burst_tokens, after.burst_tokens);
        assert_eq!(before.total_requests, after.total_requests);
    }

    #[tokio::test]
    async fn test_precancelled_token_fails_fast() {
        let limiter = limiter(Duration::from_millis(100), 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = limiter.wait_cancellable(&cancel, "a.com").await;
        assert!(matches!(result, Err(RateLimitError::Canceled { .. })));
        assert_eq!(limiter.active_domain_count(), 0);
    }

    #[test]
    fn test_metrics_never_creates_state() {
        let limiter = limiter(Duration::from_millis(100), 1);
        assert!(limiter.metrics("a.com").is_none());
        assert_eq!(limiter.active_domain_count(), 0);
    }

    #[test]
    fn test_record_creates_state_lazily() {
        let limiter = limiter(Duration::from_millis(100), 1);
        limiter.record_success("a.com", Duration::from_millis(30));

        let metrics = limiter.metrics("a.com").unwrap();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(limiter.active_domain_count(), 1);
    }

    #[test]
    fn test_adaptation_shrinks_interval_for_healthy_domain() {
        let limiter = limiter(Duration::from_millis(100), 1);
        for _ in 0..10 {
            limiter.record_success("good.com", Duration::from_millis(20));
        }

        let metrics = limiter.metrics("good.com").unwrap();
        assert!(metrics.current_interval < Duration::from_millis(100));
        assert!(metrics.current_interval >= Duration::from_millis(25));
    }

    #[test]
    fn test_adaptation_grows_interval_for_failing_domain() {
        let limiter = limiter(Duration::from_millis(100), 1);
        for _ in 0..10 {
            limiter.record_failure("bad.com", Duration::from_secs(1));
        }

        let metrics = limiter.metrics("bad.com").unwrap();
        assert!(metrics.current_interval > Duration::from_millis(100));
        assert!(metrics.current_interval <= Duration::from_secs(1));
    }

    #[test]
    fn test_domain_interval_override() {
        let mut config = RateLimitConfig {
            default_interval: Duration::from_millis(100),
            ..RateLimitConfig::default()
        };
        config
            .domain_intervals
            .insert("slow.com".into(), Duration::from_secs(2));
        let limiter = DomainRateLimiter::new(config).unwrap();

        limiter.record_success("slow.com", Duration::from_millis(10));
        limiter.record_success("fast.com", Duration::from_millis(10));

        assert_eq!(
            limiter.metrics("slow.com").unwrap().base_interval,
            Duration::from_secs(2)
        );
        assert_eq!(
            limiter.metrics("fast.com").unwrap().base_interval,
            Duration::from_millis(100)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_evicts_only_idle_domains() {
        let limiter = DomainRateLimiter::new(RateLimitConfig {
            default_interval: Duration::from_millis(100),
            idle_retention: Duration::from_millis(500),
            ..RateLimitConfig::default()
        })
        .unwrap();

        limiter.record_success("stale.com", Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(600)).await;
        limiter.record_success("active.com", Duration::from_millis(10));

        assert_eq!(limiter.cleanup(), 1);
        assert!(limiter.metrics("stale.com").is_none());
        assert!(limiter.metrics("active.com").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_metrics_snapshot() {
        let limiter = limiter(Duration::from_millis(100), 1);
        limiter.record_success("a.com", Duration::from_millis(10));
        limiter.record_success("b.com", Duration::from_millis(10));
        limiter.record_success("b.com", Duration::from_millis(10));

        let all = limiter.all_metrics();
        assert_eq!(all.len(), 2);
        assert_eq!(all.sorted()[0].0, "b.com");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_share_one_state() {
        let limiter = Arc::new(limiter(Duration::from_millis(10), 1));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.wait("shared.com").await;
                limiter.record_success("shared.com", Duration::from_millis(1));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(limiter.active_domain_count(), 1);
        assert_eq!(limiter.metrics("shared.com").unwrap().total_requests, 8);
    }
}
