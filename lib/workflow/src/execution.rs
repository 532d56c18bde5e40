//! Run records and the bounded execution log.

use crate::item::ExecutionItem;
use chrono::{DateTime, Utc};
use flowloom_core::{NodeId, WorkflowId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// The overall state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is actively executing.
    Running,
    /// Run completed without a node failure.
    Success,
    /// A node failed or the run was aborted.
    Error,
}

impl RunStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A record of a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique identifier for this run.
    pub id: WorkflowRunId,
    /// The workflow that was executed.
    pub workflow_id: WorkflowId,
    /// Workflow name at the time of the run.
    pub workflow_name: String,
    /// Current status.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Output batches of each node that succeeded.
    #[serde(default)]
    pub data_snapshot: BTreeMap<NodeId, Vec<Vec<ExecutionItem>>>,
}

impl RunRecord {
    /// Creates a running record.
    #[must_use]
    pub fn start(id: WorkflowRunId, workflow_id: WorkflowId, workflow_name: impl Into<String>) -> Self {
        Self {
            id,
            workflow_id,
            workflow_name: workflow_name.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            stopped_at: None,
            duration_ms: None,
            error: None,
            data_snapshot: BTreeMap::new(),
        }
    }

    /// Completes the record successfully.
    pub fn succeed(&mut self) {
        self.finish(RunStatus::Success, None);
    }

    /// Completes the record with an error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(RunStatus::Error, Some(error.into()));
    }

    fn finish(&mut self, status: RunStatus, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.stopped_at = Some(now);
        self.duration_ms = u64::try_from((now - self.started_at).num_milliseconds()).ok();
    }

    /// Human-readable duration such as `"1.25s"`, or `"-"` while running.
    #[must_use]
    pub fn duration_display(&self) -> String {
        match self.duration_ms {
            Some(ms) if ms < 1000 => format!("{ms}ms"),
            Some(ms) => format!("{:.2}s", ms as f64 / 1000.0),
            None => "-".to_string(),
        }
    }
}

/// Capacity-bounded log of run records, newest last.
#[derive(Debug, Clone)]
pub struct RunLog {
    capacity: usize,
    records: VecDeque<RunRecord>,
}

impl RunLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::new(),
        }
    }

    /// Appends a record, evicting the oldest past capacity.
    pub fn push(&mut self, record: RunRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Returns all records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<RunRecord> {
        self.records.iter().cloned().collect()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> RunRecord {
        RunRecord::start(WorkflowRunId::new(), WorkflowId::new(), name)
    }

    #[test]
    fn run_record_lifecycle() {
        let mut run = record("Daily");
        assert_eq!(run.status, RunStatus::Running);
        assert!(!run.status.is_terminal());
        assert_eq!(run.duration_display(), "-");

        run.fail("boom");
        assert_eq!(run.status, RunStatus::Error);
        assert!(run.status.is_terminal());
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert!(run.stopped_at.is_some());
        assert!(run.duration_ms.is_some());
    }

    #[test]
    fn duration_display_formats() {
        let mut run = record("x");
        run.duration_ms = Some(250);
        assert_eq!(run.duration_display(), "250ms");
        run.duration_ms = Some(1250);
        assert_eq!(run.duration_display(), "1.25s");
    }

    #[test]
    fn run_log_evicts_oldest() {
        let mut log = RunLog::new(2);
        log.push(record("a"));
        log.push(record("b"));
        log.push(record("c"));

        let names: Vec<_> = log.records().into_iter().map(|r| r.workflow_name).collect();
        assert_eq!(names, vec!["b", "c"]);

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn run_record_serde_roundtrip() {
        let mut run = record("Serde");
        run.succeed();
        let json = serde_json::to_string(&run).expect("serialize");
        assert!(json.contains("\"success\""));
        let parsed: RunRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(run, parsed);
    }
}
