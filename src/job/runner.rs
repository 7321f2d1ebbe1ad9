use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job::{JobError, JobErrorKind, Ticker};

/// Default first backoff applied after a backoff-kind failure
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(30);

/// Default cap on the doubled backoff
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Immutable configuration for one periodic background job
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Job name, used for logging
    pub name: String,
    /// Normal interval between invocations
    pub interval: Duration,
    /// First backoff applied after a backoff-kind failure
    pub initial_backoff: Duration,
    /// Cap on the doubled backoff
    pub max_backoff: Duration,
    /// Error kinds that lengthen the schedule instead of being merely logged
    pub backoff_on: HashSet<JobErrorKind>,
    /// Whether to invoke the job once before entering the periodic loop
    pub run_immediately: bool,
}

impl JobConfig {
    /// Create a job configuration with default backoff settings and an
    /// empty backoff kind set
    #[must_use]
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_on: HashSet::new(),
            run_immediately: false,
        }
    }

    /// Select the error kinds that trigger backoff
    #[must_use]
    pub fn backoff_on(mut self, kinds: impl IntoIterator<Item = JobErrorKind>) -> Self {
        self.backoff_on = kinds.into_iter().collect();
        self
    }

    /// Override the first backoff duration
    #[must_use]
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Override the backoff cap
    #[must_use]
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Invoke the job once, synchronously with startup, before the loop
    #[must_use]
    pub fn run_immediately(mut self) -> Self {
        self.run_immediately = true;
        self
    }
}

/// The job function: receives the loop's cancellation token so a long
/// invocation can wind down early during shutdown
type JobFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// A periodic background job with panic isolation and backoff-on-error.
///
/// [`JobRunner::start`] launches exactly one long-lived loop and returns
/// immediately; job errors are never surfaced to the caller, only logged
/// (fire-and-forget with feedback). [`JobRunner::stop`] cancels the loop
/// and blocks until it has fully exited.
///
/// The loop imposes no per-invocation timeout: a hung job function blocks
/// that runner's subsequent ticks, and `stop`, indefinitely.
pub struct JobRunner {
    config: JobConfig,
    job: JobFn,
    running: Option<Running>,
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("config", &self.config)
            .field("running", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    /// Create a runner for `job`; nothing executes until
    /// [`JobRunner::start`] is called
    pub fn new<F, Fut>(config: JobConfig, job: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self {
            config,
            job: Arc::new(move |token| -> BoxFuture<'static, Result<(), JobError>> {
                Box::pin(job(token))
            }),
            running: None,
        }
    }

    /// Get the configured job name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether the loop has been started and not yet stopped
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Derive a child cancellation token from `parent` and launch the job
    /// loop. Returns immediately; a second `start` while running is a
    /// logged no-op.
    pub fn start(&mut self, parent: &CancellationToken) {
        if self.running.is_some() {
            log::warn!("job {}: already running, ignoring start", self.config.name);
            return;
        }

        log::debug!(
            "job {}: starting with interval {}ms",
            self.config.name,
            self.config.interval.as_millis()
        );
        let token = parent.child_token();
        let handle = tokio::spawn(run_loop(
            self.config.clone(),
            Arc::clone(&self.job),
            token.clone(),
        ));
        self.running = Some(Running { token, handle });
    }

    /// Signal cancellation and block until the loop has fully exited.
    ///
    /// An invocation already in flight is never interrupted; `stop` waits
    /// for it to finish. Stopping a runner that was never started is a
    /// no-op.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.token.cancel();
        if let Err(err) = running.handle.await {
            // The loop recovers job panics itself, so this is unexpected.
            log::warn!("job {}: loop ended abnormally: {err}", self.config.name);
        }
        log::debug!("job {}: stopped", self.config.name);
    }
}

/// The long-lived execution loop: race cancellation against the next tick,
/// invoke on tick, and reprogram the tick period on backoff transitions.
async fn run_loop(config: JobConfig, job: JobFn, token: CancellationToken) {
    if config.run_immediately {
        // An immediate-run failure is logged, never fatal, and does not
        // start a backoff.
        if let Err(err) = invoke(&job, &token).await {
            log::warn!("job {}: immediate run failed: {err}", config.name);
        }
    }

    let mut ticker = Ticker::new(config.interval);
    let mut backoff = Duration::ZERO;

    loop {
        tokio::select! {
            () = token.cancelled() => {
                log::debug!("job {}: cancellation received, exiting loop", config.name);
                return;
            }
            () = ticker.tick() => {}
        }

        match invoke(&job, &token).await {
            Ok(()) => {
                if !backoff.is_zero() {
                    log::info!(
                        "job {}: recovered, restoring {}ms interval",
                        config.name,
                        config.interval.as_millis()
                    );
                    backoff = Duration::ZERO;
                    ticker.set_period(config.interval);
                }
            }
            Err(err) if config.backoff_on.contains(&err.kind()) => {
                backoff = if backoff.is_zero() {
                    config.initial_backoff
                } else {
                    (backoff * 2).min(config.max_backoff)
                };
                log::warn!(
                    "job {}: failed ({err}), backing off for {}ms",
                    config.name,
                    backoff.as_millis()
                );
                ticker.set_period(backoff);
            }
            Err(err) => {
                log::warn!("job {}: failed ({err}), keeping normal interval", config.name);
            }
        }
    }
}

/// Run one invocation in its own task so that a panic is recovered and
/// reported as a [`JobErrorKind::Panic`] error instead of taking down the
/// loop or the process.
async fn invoke(job: &JobFn, token: &CancellationToken) -> Result<(), JobError> {
    match tokio::spawn(job(token.clone())).await {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => Err(JobError::from_panic(err.into_panic())),
        Err(err) => Err(JobError::new(
            JobErrorKind::Other,
            format!("job task aborted: {err}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Record each invocation's offset from `start` for schedule assertions
    fn recording_job(
        start: Instant,
        timestamps: Arc<Mutex<Vec<Duration>>>,
        outcomes: Vec<Result<(), JobError>>,
    ) -> impl Fn(CancellationToken) -> BoxFuture<'static, Result<(), JobError>> {
        let calls = AtomicUsize::new(0);
        move |_token| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            timestamps.lock().unwrap().push(start.elapsed());
            let outcome = outcomes.get(call).cloned().unwrap_or(Ok(()));
            Box::pin(async move { outcome })
        }
    }

    fn network_error() -> Result<(), JobError> {
        Err(JobError::new(JobErrorKind::Network, "fetch upstream failed"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_every_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_inner = Arc::clone(&count);

        let mut runner = JobRunner::new(
            JobConfig::new("steady", Duration::from_millis(100)),
            move |_| {
                let count = Arc::clone(&count_inner);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        let parent = CancellationToken::new();
        runner.start(&parent);
        tokio::time::sleep(Duration::from_millis(350)).await;
        runner.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_immediately_fires_before_first_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_inner = Arc::clone(&count);

        let mut runner = JobRunner::new(
            JobConfig::new("eager", Duration::from_millis(100)).run_immediately(),
            move |_| {
                let count = Arc::clone(&count_inner);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        let parent = CancellationToken::new();
        runner.start(&parent);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        runner.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_then_resets() {
        let start = Instant::now();
        let timestamps = Arc::new(Mutex::new(Vec::new()));

        let config = JobConfig::new("flaky", Duration::from_millis(100))
            .initial_backoff(Duration::from_millis(200))
            .max_backoff(Duration::from_millis(600))
            .backoff_on([JobErrorKind::Network]);

        let mut runner = JobRunner::new(
            config,
            recording_job(
                start,
                Arc::clone(&timestamps),
                vec![network_error(), network_error(), network_error(), Ok(()), Ok(())],
            ),
        );

        let parent = CancellationToken::new();
        runner.start(&parent);
        // Ticks at 100 (fail -> 200), 300 (fail -> 400), 700 (fail -> 600,
        // capped), 1300 (ok -> interval restored), 1400.
        tokio::time::sleep(Duration::from_millis(1450)).await;
        runner.stop().await;

        let timestamps = timestamps.lock().unwrap();
        let expected = [100_u64, 300, 700, 1300, 1400];
        assert_eq!(timestamps.len(), expected.len());
        for (actual, expected_ms) in timestamps.iter().zip(expected) {
            let expected = Duration::from_millis(expected_ms);
            let drift = actual.abs_diff(expected);
            assert!(
                drift < Duration::from_millis(20),
                "invocation at {actual:?}, expected ~{expected:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_error_kind_keeps_interval() {
        let start = Instant::now();
        let timestamps = Arc::new(Mutex::new(Vec::new()));

        let config = JobConfig::new("grumbling", Duration::from_millis(100))
            .initial_backoff(Duration::from_millis(500))
            .backoff_on([JobErrorKind::Network]);

        let mut runner = JobRunner::new(
            config,
            recording_job(
                start,
                Arc::clone(&timestamps),
                vec![
                    Err(JobError::new(JobErrorKind::Storage, "row gone")),
                    Err(JobError::new(JobErrorKind::Storage, "row gone")),
                ],
            ),
        );

        let parent = CancellationToken::new();
        runner.start(&parent);
        tokio::time::sleep(Duration::from_millis(350)).await;
        runner.stop().await;

        // Storage errors are not in the backoff set, so ticks stay at 100ms.
        assert_eq!(timestamps.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_does_not_stop_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_inner = Arc::clone(&count);

        let mut runner = JobRunner::new(
            JobConfig::new("crashy", Duration::from_millis(100)),
            move |_| {
                let count = Arc::clone(&count_inner);
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first invocation blows up");
                    }
                    Ok(())
                }
            },
        );

        let parent = CancellationToken::new();
        runner.start(&parent);
        tokio::time::sleep(Duration::from_millis(350)).await;
        runner.stop().await;

        // Invocations after the panic keep executing normally
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_joins_in_flight_invocation() {
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_inner = Arc::clone(&finished);

        let mut runner = JobRunner::new(
            JobConfig::new("slowpoke", Duration::from_millis(100)),
            move |_| {
                let finished = Arc::clone(&finished_inner);
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        let parent = CancellationToken::new();
        runner.start(&parent);
        // Land inside the first invocation, then stop.
        tokio::time::sleep(Duration::from_millis(150)).await;
        runner.stop().await;

        // Stop returned only after the in-flight invocation completed.
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_a_no_op() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_inner = Arc::clone(&count);

        let mut runner = JobRunner::new(
            JobConfig::new("single", Duration::from_millis(100)),
            move |_| {
                let count = Arc::clone(&count_inner);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        let parent = CancellationToken::new();
        runner.start(&parent);
        runner.start(&parent);
        tokio::time::sleep(Duration::from_millis(150)).await;
        runner.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
