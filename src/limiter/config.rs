use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use humantime_serde::re::humantime;

use crate::limiter::{DomainKey, RateLimitError};

/// Default minimum interval between requests to the same domain
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of burst tokens per domain
const DEFAULT_BURST_SIZE: u32 = 3;

/// Default idle time after which a domain's state is evicted by a sweep
const DEFAULT_IDLE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the per-domain rate limiter.
///
/// Durations are expressed as humantime strings in serialized form
/// (`"500ms"`, `"2s"`, `"24h"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum interval between requests to the same domain, unless
    /// overridden in [`RateLimitConfig::domain_intervals`]
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub default_interval: Duration,

    /// Number of requests a domain may absorb immediately before the
    /// sustained rate kicks in
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Whether recorded outcomes adjust each domain's interval
    #[serde(default = "default_enable_adaptive")]
    pub enable_adaptive: bool,

    /// Idle time after which [`crate::limiter::DomainRateLimiter::cleanup`]
    /// evicts a domain's state
    #[serde(default = "default_idle_retention", with = "humantime_serde")]
    pub idle_retention: Duration,

    /// Per-domain overrides for the base request interval
    #[serde(
        default,
        deserialize_with = "deserialize_intervals",
        serialize_with = "serialize_intervals"
    )]
    pub domain_intervals: HashMap<DomainKey, Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_interval: default_interval(),
            burst_size: default_burst_size(),
            enable_adaptive: default_enable_adaptive(),
            idle_retention: default_idle_retention(),
            domain_intervals: HashMap::new(),
        }
    }
}

const fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

const fn default_burst_size() -> u32 {
    DEFAULT_BURST_SIZE
}

const fn default_enable_adaptive() -> bool {
    true
}

const fn default_idle_retention() -> Duration {
    DEFAULT_IDLE_RETENTION
}

impl RateLimitConfig {
    /// Check every option once, at limiter construction time.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] for a zero interval, a zero
    /// burst size, or a zero per-domain override.
    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.default_interval.is_zero() {
            return Err(RateLimitError::invalid_config(
                "default_interval must be greater than zero",
            ));
        }
        if self.burst_size == 0 {
            return Err(RateLimitError::invalid_config(
                "burst_size must be greater than zero",
            ));
        }
        for (domain, interval) in &self.domain_intervals {
            if interval.is_zero() {
                return Err(RateLimitError::invalid_config(format!(
                    "interval override for domain {domain} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// Get the effective base interval for a domain, falling back to the
    /// global default
    #[must_use]
    pub fn interval_for(&self, domain: &DomainKey) -> Duration {
        self.domain_intervals
            .get(domain)
            .copied()
            .unwrap_or(self.default_interval)
    }
}

/// Custom deserializer for the interval map from humantime strings.
/// Domain keys normalize through [`DomainKey`]'s own deserialization.
fn deserialize_intervals<'de, D>(deserializer: D) -> Result<HashMap<DomainKey, Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = HashMap::<DomainKey, String>::deserialize(deserializer)?;
    map.into_iter()
        .map(|(domain, value)| {
            let duration = humantime::parse_duration(&value).map_err(|e| {
                serde::de::Error::custom(format!("Invalid interval '{value}' for {domain}: {e}"))
            })?;
            Ok((domain, duration))
        })
        .collect()
}

/// Custom serializer for the interval map to humantime strings
fn serialize_intervals<S>(
    intervals: &HashMap<DomainKey, Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let map: HashMap<String, String> = intervals
        .iter()
        .map(|(domain, interval)| {
            (
                domain.to_string(),
                humantime::format_duration(*interval).to_string(),
            )
        })
        .collect();
    map.serialize(serializer)
}
