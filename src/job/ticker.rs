use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// A periodic tick source whose period can be reprogrammed at runtime.
///
/// Unlike [`tokio::time::interval`], changing the period is a first-class
/// operation: [`Ticker::set_period`] re-arms the next deadline relative to
/// now. This is what backoff needs when it temporarily lengthens, and then
/// restores, the schedule of a running job loop.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    deadline: Instant,
}

impl Ticker {
    /// Create a ticker that first fires one `period` from now
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: Instant::now() + period,
        }
    }

    /// Get the current period
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Change the period and re-arm the next deadline to one `period` from
    /// now, discarding the previously scheduled tick.
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
        self.deadline = Instant::now() + period;
    }

    /// Suspend until the next deadline, then re-arm it one period ahead.
    ///
    /// Cancel-safe: if the returned future is dropped before firing, the
    /// deadline is left unchanged and the next call resumes the same wait.
    pub async fn tick(&mut self) {
        sleep_until(self.deadline).await;
        self.deadline = Instant::now() + self.period;
    }
}
