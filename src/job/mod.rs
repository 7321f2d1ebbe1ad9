//! Periodic background jobs with panic isolation and backoff-on-error.
//!
//! A [`JobRunner`] wraps an arbitrary async function with a start/stop
//! lifecycle: the loop races its cancellation token against a
//! reprogrammable [`Ticker`], recovers panics, and temporarily lengthens
//! its schedule (doubling up to a cap) when an invocation fails with one
//! of the error kinds the job's [`JobConfig`] names. A [`JobGroup`] ties
//! several runners to one shared parent token for unified shutdown.

mod error;
mod group;
mod runner;
mod ticker;

pub use error::{JobError, JobErrorKind};
pub use group::JobGroup;
pub use runner::{JobConfig, JobRunner};
pub use ticker::Ticker;
