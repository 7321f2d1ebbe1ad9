use std::any::Any;
use thiserror::Error;

/// Broad classification of background-job failures.
///
/// A job's configuration names the kinds that should lengthen its schedule
/// (see [`crate::job::JobConfig::backoff_on`]); all other kinds are logged
/// and the normal interval keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobErrorKind {
    /// A network dependency misbehaved or was unreachable
    Network,
    /// An operation ran out of time
    Timeout,
    /// An upstream dependency pushed back on request volume
    RateLimited,
    /// A repository or storage layer failed
    Storage,
    /// The job function panicked and was recovered by the runner
    Panic,
    /// Anything that does not fit the kinds above
    Other,
}

/// An error returned (or recovered) from one background-job invocation.
///
/// Job errors never reach the caller of [`crate::job::JobRunner::start`];
/// they are routed to backoff handling or logged inside the loop.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct JobError {
    kind: JobErrorKind,
    message: String,
}

impl JobError {
    /// Create a job error of the given kind
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The kind used for backoff routing
    #[must_use]
    pub fn kind(&self) -> JobErrorKind {
        self.kind
    }

    /// Build a [`JobErrorKind::Panic`] error from a recovered panic payload
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_string());
        Self {
            kind: JobErrorKind::Panic,
            message: format!("job panicked: {message}"),
        }
    }
}
