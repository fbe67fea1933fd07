use super::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;

/// Batch recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum BatchRecordLevel {
    /// Disable recording.
    Off,
    /// Batch and item outcomes, without item output.
    KeyEventsOnly,
    /// Everything, including item start events and successful output.
    #[default]
    Full,
}

/// A single recorded batch event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecordEntry {
    pub ts_ms: u128,
    pub event: BatchEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStarted {
        total: usize,
        max_concurrency: usize,
    },
    ItemStarted {
        index: usize,
        id: String,
    },
    ItemFinished {
        index: usize,
        id: String,
        success: bool,
        #[serde(default)]
        failure: Option<FailureKind>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        output: Option<String>,
        elapsed_ms: u64,
    },
    ItemCancelled {
        index: usize,
        id: String,
    },
    BatchFinished {
        succeeded: usize,
        failed: usize,
        elapsed_ms: u64,
    },
}

/// In-memory batch recorder, shared between the dispatch loop and item tasks.
#[derive(Debug, Clone)]
pub struct BatchRecorder {
    level: BatchRecordLevel,
    entries: Arc<Mutex<Vec<BatchRecordEntry>>>,
}

impl BatchRecorder {
    pub fn new(level: BatchRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> BatchRecordLevel {
        self.level
    }

    /// Record an event, subject to the recording level.
    pub fn record_event(&self, event: BatchEvent) -> Result<(), BatchError> {
        match (self.level, &event) {
            (BatchRecordLevel::Off, _) => return Ok(()),
            (BatchRecordLevel::KeyEventsOnly, BatchEvent::ItemStarted { .. }) => return Ok(()),
            _ => {}
        }
        let event = match event {
            BatchEvent::ItemFinished {
                index,
                id,
                success,
                failure,
                message,
                elapsed_ms,
                ..
            } if self.level == BatchRecordLevel::KeyEventsOnly => BatchEvent::ItemFinished {
                index,
                id,
                success,
                failure,
                message,
                output: None,
                elapsed_ms,
            },
            event => event,
        };

        let mut guard = self
            .entries
            .lock()
            .map_err(|e| BatchError::RecordLockError(e.to_string()))?;
        guard.push(BatchRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record the terminal result of an item.
    pub fn record_item_finished(&self, index: usize, result: &ItemResult) -> Result<(), BatchError> {
        let (success, failure, message, output) = match &result.outcome {
            Outcome::Success { output } => (true, None, None, Some(output.clone())),
            Outcome::Failure { kind, message } => (false, Some(*kind), Some(message.clone()), None),
        };
        self.record_event(BatchEvent::ItemFinished {
            index,
            id: result.id.clone(),
            success,
            failure,
            message,
            output,
            elapsed_ms: runner::duration_ms(result.elapsed),
        })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<BatchRecordEntry>, BatchError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| BatchError::RecordLockError(e.to_string()))?;
        Ok(guard.clone())
    }

    pub fn clear(&self) -> Result<(), BatchError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| BatchError::RecordLockError(e.to_string()))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, BatchError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| BatchError::RecordEncodeError(e.to_string()))?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore a recorder from JSONL lines. Blank lines are skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, BatchError> {
        let mut parsed = Vec::new();
        for (line_no, line) in jsonl.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: BatchRecordEntry = serde_json::from_str(line)
                .map_err(|e| BatchError::RecordDecodeError(format!("line {}: {e}", line_no + 1)))?;
            parsed.push(entry);
        }

        Ok(Self {
            level: BatchRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }
}

impl Default for BatchRecorder {
    fn default() -> Self {
        Self::new(BatchRecordLevel::Full)
    }
}

#[derive(Debug, Clone)]
enum ReplayedOutcome {
    Output(String),
    Failure { kind: FailureKind, message: String },
    MissingOutput,
}

/// Offline executor serving outcomes from a batch recording.
///
/// Each identifier's recorded outcomes are consumed in order, so a recording of
/// a batch can be re-run through [`BatchRunner`] without touching any device.
/// Works for any payload type; the payload is ignored.
#[derive(Debug)]
pub struct ReplayExecutor {
    outcomes: Mutex<HashMap<String, VecDeque<ReplayedOutcome>>>,
}

impl ReplayExecutor {
    pub fn from_recorder(recorder: &BatchRecorder) -> Result<Self, BatchError> {
        let mut outcomes: HashMap<String, VecDeque<ReplayedOutcome>> = HashMap::new();
        for entry in recorder.entries()? {
            match entry.event {
                BatchEvent::ItemFinished {
                    id,
                    success,
                    failure,
                    message,
                    output,
                    ..
                } => {
                    let outcome = match (success, output) {
                        (true, Some(output)) => ReplayedOutcome::Output(output),
                        (true, None) => ReplayedOutcome::MissingOutput,
                        (false, _) => ReplayedOutcome::Failure {
                            kind: failure.unwrap_or(FailureKind::Other),
                            message: message.unwrap_or_default(),
                        },
                    };
                    outcomes.entry(id).or_default().push_back(outcome);
                }
                BatchEvent::ItemCancelled { id, .. } => {
                    outcomes
                        .entry(id)
                        .or_default()
                        .push_back(ReplayedOutcome::Failure {
                            kind: FailureKind::Cancelled,
                            message: "batch cancelled before item was dispatched".to_string(),
                        });
                }
                _ => {}
            }
        }
        Ok(Self {
            outcomes: Mutex::new(outcomes),
        })
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, BatchError> {
        let recorder = BatchRecorder::from_jsonl(jsonl)?;
        Self::from_recorder(&recorder)
    }

    /// Identifiers that still have outcomes to replay, sorted.
    pub fn pending_ids(&self) -> Result<Vec<String>, BatchError> {
        let guard = self
            .outcomes
            .lock()
            .map_err(|e| BatchError::RecordLockError(e.to_string()))?;
        let mut ids = guard
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }

    fn next_outcome(&self, id: &str) -> Result<ReplayedOutcome, OperationError> {
        let mut guard = self
            .outcomes
            .lock()
            .map_err(|e| OperationError::Other(format!("replay lock error: {e}")))?;
        guard
            .get_mut(id)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| OperationError::ReplayMismatch(format!("no recorded outcome for '{id}'")))
    }
}

#[async_trait]
impl<P: Send + 'static> Executor<P> for ReplayExecutor {
    async fn execute(&self, ctx: ItemContext<P>) -> Result<String, OperationError> {
        match self.next_outcome(&ctx.id)? {
            ReplayedOutcome::Output(output) => Ok(output),
            ReplayedOutcome::Failure { kind, message } => {
                Err(OperationError::Replayed { kind, message })
            }
            ReplayedOutcome::MissingOutput => Err(OperationError::ReplayMismatch(format!(
                "recording for '{}' has no output, record with level Full",
                ctx.id
            ))),
        }
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
