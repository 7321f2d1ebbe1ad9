use std::time::Duration;
use tokio::time::Instant;

use crate::limiter::DomainMetrics;

/// Number of recorded outcomes between interval re-evaluations
pub(crate) const ADAPTATION_WINDOW: u64 = 10;

/// Lifetime success rate at or above which the interval shrinks
const SHRINK_THRESHOLD: f64 = 0.9;

/// Lifetime success rate below which the interval grows
const GROW_THRESHOLD: f64 = 0.7;

/// Multiplicative adjustment step applied on each adaptation
const STEP: f64 = 0.1;

/// Lower bound on the adapted interval, as a divisor of the base interval
const MIN_INTERVAL_DIVISOR: u32 = 4;

/// Upper bound on the adapted interval, as a multiple of the base interval
const MAX_INTERVAL_MULTIPLE: u32 = 10;

/// Mutable per-domain limiter state: a token bucket plus the cumulative
/// counters that drive interval adaptation.
///
/// Owned exclusively by the registry in [`crate::limiter::DomainRateLimiter`]
/// behind a per-domain mutex; reads leave through [`DomainState::metrics`]
/// as copies, never as references.
#[derive(Debug)]
pub(crate) struct DomainState {
    /// When the last request slot was handed out
    last_request: Instant,
    /// Effective interval between requests, adjusted by adaptation
    current_interval: Duration,
    /// Configured interval this domain started with; anchor for the
    /// adaptation bounds
    base_interval: Duration,
    /// Tokens available for immediate requests
    burst_tokens: u32,
    /// Cap on accumulated burst tokens
    max_burst_tokens: u32,
    /// Whether recorded outcomes adjust the interval
    adaptive: bool,
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    total_response_time: Duration,
    /// Updated on every recorded outcome and acquired slot; drives idle
    /// eviction
    last_activity: Instant,
}

impl DomainState {
    pub(crate) fn new(base_interval: Duration, burst_size: u32, adaptive: bool) -> Self {
        let now = Instant::now();
        Self {
            last_request: now,
            current_interval: base_interval,
            base_interval,
            burst_tokens: burst_size,
            max_burst_tokens: burst_size,
            adaptive,
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            total_response_time: Duration::ZERO,
            last_activity: now,
        }
    }

    /// Try to take a request slot at `now`.
    ///
    /// Elapsed full intervals since the last request refill burst tokens up
    /// to the cap. On success a token is consumed and the request timestamp
    /// is stamped. On failure, returns how long the caller must wait before
    /// the next token becomes available.
    pub(crate) fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.duration_since(self.last_request);
        if elapsed >= self.current_interval && !self.current_interval.is_zero() {
            let refill = (elapsed.as_nanos() / self.current_interval.as_nanos())
                .min(u128::from(self.max_burst_tokens)) as u32;
            self.burst_tokens = (self.burst_tokens + refill).min(self.max_burst_tokens);
        }

        if self.burst_tokens > 0 {
            self.burst_tokens -= 1;
            self.last_request = now;
            self.last_activity = now;
            return Ok(());
        }

        let remaining = self.current_interval.saturating_sub(elapsed);
        if remaining.is_zero() {
            self.last_request = now;
            self.last_activity = now;
            return Ok(());
        }
        Err(remaining)
    }

    /// Record one request outcome; at every adaptation window boundary,
    /// re-evaluate the interval.
    pub(crate) fn record(&mut self, success: bool, response_time: Duration, now: Instant) {
        self.total_requests += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.total_response_time += response_time;
        self.last_activity = now;

        if self.adaptive && self.total_requests.is_multiple_of(ADAPTATION_WINDOW) {
            self.adapt();
        }
    }

    /// Hysteresis control over the request interval. High lifetime success
    /// shrinks it one step, low success grows it one step, and the band in
    /// between leaves it untouched so the interval does not oscillate.
    ///
    /// The rate is cumulative since domain creation, never windowed.
    fn adapt(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let success_rate = self.success_count as f64 / self.total_requests as f64;

        let floor = self.base_interval / MIN_INTERVAL_DIVISOR;
        let ceiling = self.base_interval * MAX_INTERVAL_MULTIPLE;

        if success_rate >= SHRINK_THRESHOLD {
            self.current_interval = self.current_interval.mul_f64(1.0 - STEP).max(floor);
        } else if success_rate < GROW_THRESHOLD {
            self.current_interval = self.current_interval.mul_f64(1.0 + STEP).min(ceiling);
        }
    }

    /// How long this domain has gone without recorded activity
    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_activity)
    }

    /// Defensive copy of the observable state
    pub(crate) fn metrics(&self) -> DomainMetrics {
        DomainMetrics {
            total_requests: self.total_requests,
            success_count: self.success_count,
            failure_count: self.failure_count,
            current_interval: self.current_interval,
            base_interval: self.base_interval,
            burst_tokens: self.burst_tokens,
            max_burst_tokens: self.max_burst_tokens,
            total_response_time: self.total_response_time,
        }
    }
}
