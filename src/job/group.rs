use tokio_util::sync::CancellationToken;

use crate::job::JobRunner;

/// A set of [`JobRunner`]s sharing one parent cancellation token, giving
/// the owning service a single shutdown call for all of its periodic
/// maintenance work.
#[derive(Debug)]
pub struct JobGroup {
    token: CancellationToken,
    runners: Vec<JobRunner>,
}

impl JobGroup {
    /// Create an empty group with its own root token
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            runners: Vec::new(),
        }
    }

    /// Create an empty group whose runners stop when `parent` is cancelled
    #[must_use]
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            runners: Vec::new(),
        }
    }

    /// Register a runner and start it immediately against the group token
    pub fn add(&mut self, mut runner: JobRunner) {
        runner.start(&self.token);
        self.runners.push(runner);
    }

    /// Stop all runners in registration order, awaiting each loop's exit
    /// before moving on to the next
    pub async fn stop_all(&mut self) {
        for runner in &mut self.runners {
            runner.stop().await;
        }
    }

    /// Number of registered runners
    #[must_use]
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    /// Whether the group has no registered runners
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

impl Default for JobGroup {
    fn default() -> Self {
        Self::new()
    }
}
