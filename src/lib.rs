//! `pacer` is the concurrency-control core for polite, resilient,
//! parallel fetch-and-process pipelines.
//!
//! It answers three questions the rest of such a service composes around:
//! how many operations may run in parallel ([`run_stage`]), how fast a
//! given external domain may be hit ([`DomainRateLimiter`]), and how
//! periodic maintenance work survives transient failure ([`JobRunner`]).
//!
//! A typical fetch batch limits each worker by domain and fans out with a
//! bounded stage:
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pacer::{DomainRateLimiter, RateLimitConfig, StageConfig, run_stage};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pacer::RateLimitError> {
//!     let limiter = Arc::new(DomainRateLimiter::new(RateLimitConfig::default())?);
//!     let cancel = CancellationToken::new();
//!
//!     let urls = vec!["https://a.example.com/1", "https://a.example.com/2"];
//!     let results = run_stage(
//!         &cancel,
//!         &StageConfig::new("fetch", 8),
//!         urls,
//!         move |_cancel, url: &'static str| {
//!             let limiter = Arc::clone(&limiter);
//!             async move {
//!                 limiter.wait("a.example.com").await;
//!                 let started = tokio::time::Instant::now();
//!                 // ... fetch and process `url` here ...
//!                 limiter.record_success("a.example.com", started.elapsed());
//!                 Ok::<_, std::convert::Infallible>(url.len())
//!             }
//!         },
//!     )
//!     .await;
//!
//!     assert_eq!(results.len(), 2);
//!     Ok(())
//! }
//! ```
//!
//! The repeating cycle ("run this batch every N minutes") is registered as
//! a job in a [`JobGroup`] for unified startup and shutdown.

pub mod job;
pub mod limiter;
pub mod stage;

pub use job::{JobConfig, JobError, JobErrorKind, JobGroup, JobRunner, Ticker};
pub use limiter::{
    DomainKey, DomainMetrics, DomainMetricsMap, DomainRateLimiter, RateLimitConfig, RateLimitError,
};
pub use stage::{StageConfig, StageResult, run_stage};
