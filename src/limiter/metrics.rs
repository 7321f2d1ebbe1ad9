use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde::ser::SerializeStruct;

/// A [`HashMap`] mapping domains to their [`DomainMetrics`]
#[derive(Debug, Default, Serialize)]
pub struct DomainMetricsMap(HashMap<String, DomainMetrics>);

impl DomainMetricsMap {
    /// Sort domain metrics by request count (descending order)
    #[must_use]
    pub fn sorted(&self) -> Vec<(String, DomainMetrics)> {
        let mut sorted: Vec<_> = self.0.clone().into_iter().collect();
        sorted.sort_by_key(|(_, metrics)| std::cmp::Reverse(metrics.total_requests));
        sorted
    }

    /// Number of domains with metrics
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether any domain has metrics
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a single domain's metrics
    #[must_use]
    pub fn get(&self, domain: &str) -> Option<&DomainMetrics> {
        self.0.get(domain)
    }
}

impl From<HashMap<String, DomainMetrics>> for DomainMetricsMap {
    fn from(value: HashMap<String, DomainMetrics>) -> Self {
        Self(value)
    }
}

/// A point-in-time copy of one domain's limiter state.
///
/// Returned by [`crate::limiter::DomainRateLimiter::metrics`]; holding on to
/// a value never blocks or observes later limiter activity.
#[derive(Debug, Clone, Default)]
pub struct DomainMetrics {
    /// Total number of recorded requests for this domain
    pub total_requests: u64,
    /// Number of requests recorded as successful
    pub success_count: u64,
    /// Number of requests recorded as failed
    pub failure_count: u64,
    /// Effective interval between requests after adaptation
    pub current_interval: Duration,
    /// Configured interval the domain started with
    pub base_interval: Duration,
    /// Burst tokens currently available
    pub burst_tokens: u32,
    /// Cap on accumulated burst tokens
    pub max_burst_tokens: u32,
    /// Sum of recorded response times
    pub total_response_time: Duration,
}

impl DomainMetrics {
    /// Get the lifetime success rate (0.0 to 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0 // Assume success until proven otherwise
        } else {
            #[allow(clippy::cast_precision_loss)]
            let success_rate = self.success_count as f64 / self.total_requests as f64;
            success_rate
        }
    }

    /// Get the average recorded response time
    #[must_use]
    pub fn average_response_time(&self) -> Option<Duration> {
        if self.total_requests == 0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        Some(self.total_response_time / (self.total_requests as u32))
    }

    /// Get a human-readable summary of the metrics
    #[must_use]
    pub fn summary(&self) -> String {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let success_pct = (self.success_rate() * 100.0) as u64;

        let avg_time = self
            .average_response_time()
            .map_or_else(|| "N/A".to_string(), |d| format!("{:.0}ms", d.as_millis()));

        format!(
            "{} requests ({}% success), interval: {}ms, avg: {}",
            self.total_requests,
            success_pct,
            self.current_interval.as_millis(),
            avg_time
        )
    }
}

impl Serialize for DomainMetrics {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let average_response_time_ms = self.average_response_time().map(|d| d.as_millis());

        let mut s = serializer.serialize_struct("DomainMetrics", 8)?;
        s.serialize_field("total_requests", &self.total_requests)?;
        s.serialize_field("success_count", &self.success_count)?;
        s.serialize_field("failure_count", &self.failure_count)?;
        s.serialize_field("success_rate", &self.success_rate())?;
        s.serialize_field("current_interval_ms", &self.current_interval.as_millis())?;
        s.serialize_field("base_interval_ms", &self.base_interval.as_millis())?;
        s.serialize_field("burst_tokens", &self.burst_tokens)?;
        s.serialize_field("average_response_time_ms", &average_response_time_ms)?;
        s.end()
    }
}
