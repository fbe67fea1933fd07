use super::*;
use std::fmt;

/// Terminal outcome of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { output: String },
    Failure { kind: FailureKind, message: String },
}

/// Result recorded for exactly one submitted work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: String,
    pub outcome: Outcome,
    /// Execution time, excluding time spent waiting for admission.
    pub elapsed: Duration,
}

impl ItemResult {
    pub fn success(id: impl Into<String>, output: String, elapsed: Duration) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Success { output },
            elapsed,
        }
    }

    pub fn failure(
        id: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Failure {
                kind,
                message: message.into(),
            },
            elapsed,
        }
    }

    /// Result for an item that was never dispatched.
    pub fn cancelled(id: impl Into<String>) -> Self {
        Self::failure(
            id,
            FailureKind::Cancelled,
            "batch cancelled before item was dispatched",
            Duration::ZERO,
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn output(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { output } => Some(output),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl fmt::Display for ItemResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.elapsed.as_millis();
        match &self.outcome {
            Outcome::Success { .. } => write!(f, "[ok] {} ({ms} ms)", self.id),
            Outcome::Failure { kind, message } => {
                write!(f, "[failed:{kind}] {}: {message} ({ms} ms)", self.id)
            }
        }
    }
}

/// Aggregate outcome of one batch invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One entry per submitted item, in submission order.
    pub results: Vec<ItemResult>,
    /// Wall time of the whole batch.
    pub elapsed: Duration,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub(crate) fn new(results: Vec<ItemResult>, elapsed: Duration) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let failed = results.len() - succeeded;
        Self {
            results,
            elapsed,
            succeeded,
            failed,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// True when every item succeeded. An empty batch counts as successful.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// First result with the given identifier.
    pub fn get(&self, id: &str) -> Option<&ItemResult> {
        self.results.iter().find(|r| r.id == id)
    }

    /// Identifiers of failed items, in submission order.
    ///
    /// The runner never retries; callers resubmit these as a new batch.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.id.as_str())
            .collect()
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.results.iter().any(|r| r.id == id && !r.is_success())
    }

    /// Number of failures per classification.
    pub fn count_by_kind(&self, kind: FailureKind) -> usize {
        self.results
            .iter()
            .filter(|r| r.failure_kind() == Some(kind))
            .count()
    }

    /// Sum of per-item execution times.
    pub fn items_elapsed(&self) -> Duration {
        self.results.iter().map(|r| r.elapsed).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} items: {} succeeded, {} failed in {} ms",
            self.results.len(),
            self.succeeded,
            self.failed,
            self.elapsed.as_millis()
        )
    }

    /// Plain-text rendering, one line per item followed by the summary.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = self
            .results
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>();
        lines.push(self.summary());
        lines
    }

    pub fn to_json(&self) -> Result<String, BatchError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BatchError::RecordEncodeError(format!("report encode error: {e}")))
    }
}
