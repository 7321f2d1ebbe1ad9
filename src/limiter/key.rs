use serde::Deserialize;
use std::fmt;
use url::Url;

use crate::limiter::RateLimitError;

/// A normalized domain name used as the rate-limiting partition key.
///
/// Keys are lowercased on construction so that lookups are
/// case-insensitive. Subdomains are distinct keys: `api.example.com` and
/// `www.example.com` are rate-limited independently.
///
/// # Examples
///
/// ```
/// use pacer::DomainKey;
/// use url::Url;
///
/// let url = Url::parse("https://News.Example.com/feed.xml").unwrap();
/// let key = DomainKey::try_from(&url).unwrap();
/// assert_eq!(key.as_str(), "news.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub struct DomainKey(String);

impl DomainKey {
    /// Get the domain as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the domain as an owned [`String`]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<&Url> for DomainKey {
    type Error = RateLimitError;

    fn try_from(url: &Url) -> Result<Self, RateLimitError> {
        let host = url.host_str().ok_or(RateLimitError::InvalidDomain)?;
        Ok(DomainKey(host.to_lowercase()))
    }
}

impl From<String> for DomainKey {
    fn from(domain: String) -> Self {
        DomainKey(domain.to_lowercase())
    }
}

impl From<&str> for DomainKey {
    fn from(domain: &str) -> Self {
        DomainKey(domain.to_lowercase())
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
