//! Bounded-concurrency, order-preserving fan-out over a batch of inputs.
//!
//! [`run_stage`] is the fan-out/fan-in building block of the pipeline: it
//! runs a caller-supplied async function over a sequence of inputs with at
//! most a configured number of concurrently active invocations, and hands
//! back one result per input, index-matched to the input order no matter
//! which invocations finish first.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Configuration for one bounded-concurrency pipeline stage
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Stage name, used for logging
    pub name: String,
    /// Maximum number of concurrently active `process` invocations;
    /// values below 1 are treated as 1
    pub concurrency: usize,
}

impl StageConfig {
    /// Create a stage configuration
    #[must_use]
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency,
        }
    }
}

/// The outcome of processing one stage input, tagged with that input's
/// ordinal position in the batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult<T, E> {
    /// Position of the corresponding input in the batch
    pub index: usize,
    /// The item's outcome; an error here never affected sibling items
    pub outcome: Result<T, E>,
}

/// Run `process` over `inputs` with bounded concurrency, returning results
/// index-matched to the input order.
///
/// Each invocation runs in its own spawned task; dispatch suspends on a
/// semaphore once `concurrency` invocations are active, so no more than
/// `concurrency` run at once and never more tasks than inputs exist. An
/// empty batch returns an empty vector without spawning anything.
///
/// A failing item captures its error in its own result slot and never
/// aborts siblings that are already dispatched or queued.
///
/// Cancellation is cooperative: `cancel` is cloned into every invocation,
/// but the executor itself never aborts queued or in-flight work. A
/// `process` that ignores the token runs to completion; one that honors it
/// should return promptly with an error in its slot.
pub async fn run_stage<In, Out, E, F, Fut>(
    cancel: &CancellationToken,
    config: &StageConfig,
    inputs: Vec<In>,
    process: F,
) -> Vec<StageResult<Out, E>>
where
    In: Send + 'static,
    Out: Send + 'static,
    E: Send + 'static,
    F: Fn(CancellationToken, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, E>> + Send + 'static,
{
    if inputs.is_empty() {
        return Vec::new();
    }

    let total = inputs.len();
    let concurrency = config.concurrency.max(1);
    log::debug!(
        "stage {}: dispatching {total} input(s) with concurrency {concurrency}",
        config.name
    );

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let process = Arc::new(process);
    let mut tasks: JoinSet<(usize, Result<Out, E>)> = JoinSet::new();

    for (index, input) in inputs.into_iter().enumerate() {
        // Dispatch suspends here once `concurrency` invocations are active.
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            // SAFETY: this should not panic as we never close the semaphore
            .expect("stage semaphore was closed unexpectedly");
        let process = Arc::clone(&process);
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let outcome = process(cancel, input).await;
            drop(permit);
            (index, outcome)
        });
    }

    // Each task reports exactly one index, so every slot is written exactly
    // once and no locking of the results is needed.
    let mut slots: Vec<Option<StageResult<Out, E>>> =
        std::iter::repeat_with(|| None).take(total).collect();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Some(StageResult { index, outcome }),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            // Tasks are never aborted while the set is being drained.
            Err(err) => unreachable!("stage task failed to join: {err}"),
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.expect("every stage input produces exactly one result"))
        .collect()
}
