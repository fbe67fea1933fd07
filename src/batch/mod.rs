//! Bounded-concurrency batch execution with per-item failure isolation.
//!
//! A batch is a list of [`WorkItem`]s, each carrying an identifier, a payload and
//! an [`Executor`] that performs the work. [`BatchRunner`] admits at most
//! `max_concurrency` items at a time, converts every error, timeout or panic into
//! that item's [`ItemResult`], and returns a [`BatchReport`] in submission order.
//!
//! # Main Components
//!
//! - [`BatchRunner`] - Validated runner settings plus the dispatch loop
//! - [`Executor`] - The "connect, act, disconnect" capability injected per item
//! - [`CancelToken`] - Batch-level cancellation signal
//! - [`BatchRecorder`] / [`ReplayExecutor`] - JSONL recording and offline replay

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, FailureKind, OperationError};

pub use cancel::CancelToken;
pub use recording::{
    BatchEvent, BatchRecordEntry, BatchRecordLevel, BatchRecorder, ReplayExecutor,
};
pub use report::{BatchReport, ItemResult, Outcome};
pub use runner::{BatchRunner, RunContext, run_batch};

/// Input handed to an executor for one work item.
#[derive(Debug, Clone)]
pub struct ItemContext<P> {
    /// Identifier of the item, e.g. the device host.
    pub id: String,
    /// Description of the operation to perform.
    pub payload: P,
}

/// Performs the operation behind a work item.
///
/// Implementations should only mutate resources they exclusively own; the runner
/// may execute several items of the same executor at once.
#[async_trait]
pub trait Executor<P>: Send + Sync {
    async fn execute(&self, ctx: ItemContext<P>) -> Result<String, OperationError>;
}

/// Adapts an async closure into an [`Executor`].
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<P, F, Fut> Executor<P> for FnExecutor<F>
where
    P: Send + 'static,
    F: Fn(ItemContext<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, OperationError>> + Send + 'static,
{
    async fn execute(&self, ctx: ItemContext<P>) -> Result<String, OperationError> {
        (self.f)(ctx).await
    }
}

/// One independent unit of batched work.
pub struct WorkItem<P> {
    pub id: String,
    pub payload: P,
    executor: Arc<dyn Executor<P>>,
}

impl<P: Send + 'static> WorkItem<P> {
    /// Creates an item backed by a shared executor.
    pub fn new(id: impl Into<String>, payload: P, executor: Arc<dyn Executor<P>>) -> Self {
        Self {
            id: id.into(),
            payload,
            executor,
        }
    }

    /// Creates an item backed by an async closure.
    pub fn from_fn<F, Fut>(id: impl Into<String>, payload: P, f: F) -> Self
    where
        F: Fn(ItemContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, OperationError>> + Send + 'static,
    {
        Self::new(id, payload, Arc::new(FnExecutor::new(f)))
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for WorkItem<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

mod cancel;
mod recording;
mod report;
mod runner;
