use thiserror::Error;

use crate::limiter::DomainKey;

/// Errors that can occur during rate limiting operations
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// The limiter was constructed with an unusable option.
    ///
    /// This is raised at construction time so that a misconfigured service
    /// fails on startup instead of at the first `wait` call.
    #[error("invalid rate limit configuration: {reason}")]
    InvalidConfig {
        /// Description of the rejected option
        reason: String,
    },

    /// A cancellable wait was interrupted before a request slot was acquired
    #[error("wait for domain {domain} was canceled")]
    Canceled {
        /// The domain the caller was waiting on
        domain: DomainKey,
    },

    /// A URL without a host portion cannot be mapped to a domain key
    #[error("URL has no host to derive a domain key from")]
    InvalidDomain,
}

impl RateLimitError {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
