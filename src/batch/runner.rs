use super::*;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Validated runner settings.
///
/// The runner keeps no state between invocations: the admission semaphore and
/// the result slots are created per call, so one runner can drive several
/// batches concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRunner {
    max_concurrency: usize,
    item_timeout: Option<Duration>,
}

/// Per-invocation hooks: cancellation and recording.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub cancel: Option<CancelToken>,
    pub recorder: Option<BatchRecorder>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_recorder(mut self, recorder: BatchRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

/// Runs `items` with at most `max_concurrency` in flight.
///
/// Returns `Err` only for invalid settings, before any item runs. See
/// [`BatchRunner::with_timeout`] for the timeout semantics.
pub async fn run_batch<P: Send + 'static>(
    items: Vec<WorkItem<P>>,
    max_concurrency: usize,
    per_item_timeout: Option<Duration>,
) -> Result<BatchReport, BatchError> {
    let runner = BatchRunner::with_timeout(max_concurrency, per_item_timeout)?;
    Ok(runner.run(items).await)
}

impl BatchRunner {
    /// Creates a runner without a per-item timeout.
    pub fn new(max_concurrency: usize) -> Result<Self, BatchError> {
        Self::with_timeout(max_concurrency, None)
    }

    /// Creates a runner with an optional per-item timeout.
    ///
    /// The timeout clock starts when the item is admitted, not when it is
    /// queued. On expiry the operation's future is dropped, which cancels it at
    /// its next suspension point. Work already performed by then is not undone:
    /// commands already written to a device stay applied.
    pub fn with_timeout(
        max_concurrency: usize,
        item_timeout: Option<Duration>,
    ) -> Result<Self, BatchError> {
        if max_concurrency < 1 {
            return Err(BatchError::InvalidConcurrency(max_concurrency));
        }
        if item_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BatchError::InvalidTimeout);
        }
        Ok(Self {
            max_concurrency,
            item_timeout,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout
    }

    pub async fn run<P: Send + 'static>(&self, items: Vec<WorkItem<P>>) -> BatchReport {
        self.run_with(items, RunContext::default()).await
    }

    /// Runs a batch with cancellation and/or recording attached.
    ///
    /// Every item yields exactly one result. Items not yet admitted when the
    /// token fires are recorded as [`FailureKind::Cancelled`]; admitted items
    /// run to completion or to their timeout.
    pub async fn run_with<P: Send + 'static>(
        &self,
        items: Vec<WorkItem<P>>,
        ctx: RunContext,
    ) -> BatchReport {
        let started = Instant::now();
        let total = items.len();
        let recorder = ctx.recorder;

        if let Some(recorder) = recorder.as_ref() {
            let _ = recorder.record_event(BatchEvent::BatchStarted {
                total,
                max_concurrency: self.max_concurrency,
            });
        }
        debug!(
            "Batch started: {} items, max concurrency {}",
            total, self.max_concurrency
        );

        let mut slots: Vec<Option<ItemResult>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);
        let ids = items.iter().map(|item| item.id.clone()).collect::<Vec<_>>();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = wait_cancelled(ctx.cancel.as_ref()) => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                debug!("Item {} not dispatched: batch cancelled", item.id);
                if let Some(recorder) = recorder.as_ref() {
                    let _ = recorder.record_event(BatchEvent::ItemCancelled {
                        index,
                        id: item.id.clone(),
                    });
                }
                slots[index] = Some(ItemResult::cancelled(item.id));
                continue;
            };

            let item_timeout = self.item_timeout;
            let task_recorder = recorder.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let result = execute_item(index, item, item_timeout, task_recorder.as_ref()).await;
                (index, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => warn!("Batch task ended without a result: {err}"),
            }
        }

        let results = slots
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| {
                slot.unwrap_or_else(|| {
                    ItemResult::failure(
                        id,
                        FailureKind::Panicked,
                        "task ended without reporting a result",
                        Duration::ZERO,
                    )
                })
            })
            .collect::<Vec<_>>();

        let report = BatchReport::new(results, started.elapsed());
        if let Some(recorder) = recorder.as_ref() {
            let _ = recorder.record_event(BatchEvent::BatchFinished {
                succeeded: report.succeeded,
                failed: report.failed,
                elapsed_ms: duration_ms(report.elapsed),
            });
        }
        debug!("Batch finished: {}", report.summary());
        report
    }
}

async fn wait_cancelled(cancel: Option<&CancelToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn execute_item<P: Send + 'static>(
    index: usize,
    item: WorkItem<P>,
    item_timeout: Option<Duration>,
    recorder: Option<&BatchRecorder>,
) -> ItemResult {
    let WorkItem {
        id,
        payload,
        executor,
    } = item;

    if let Some(recorder) = recorder {
        let _ = recorder.record_event(BatchEvent::ItemStarted {
            index,
            id: id.clone(),
        });
    }
    debug!("Item {id} admitted");

    let started = Instant::now();
    let operation = AssertUnwindSafe(executor.execute(ItemContext {
        id: id.clone(),
        payload,
    }))
    .catch_unwind();

    let finished = match item_timeout {
        Some(limit) => tokio::time::timeout(limit, operation).await.ok(),
        None => Some(operation.await),
    };
    let elapsed = started.elapsed();

    let result = match finished {
        Some(Ok(Ok(output))) => ItemResult::success(id, output, elapsed),
        Some(Ok(Err(err))) => ItemResult::failure(id, err.kind(), err.to_string(), elapsed),
        Some(Err(panic)) => {
            ItemResult::failure(id, FailureKind::Panicked, panic_message(panic.as_ref()), elapsed)
        }
        None => ItemResult::failure(
            id,
            FailureKind::Timeout,
            format!("no result within {:?}", item_timeout.unwrap_or_default()),
            elapsed,
        ),
    };

    match &result.outcome {
        Outcome::Success { .. } => debug!("Item {} succeeded in {:?}", result.id, elapsed),
        Outcome::Failure { kind, message } => {
            warn!("Item {} failed ({kind}): {message}", result.id)
        }
    }
    if let Some(recorder) = recorder {
        let _ = recorder.record_item_finished(index, &result);
    }
    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("operation panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("operation panicked: {msg}")
    } else {
        "operation panicked".to_string()
    }
}

pub(super) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
