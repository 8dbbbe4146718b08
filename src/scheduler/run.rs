use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::calibration::{RunFault, RunOutcome};

pub use crate::calibration::RunnableType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Finished => write!(f, "finished"),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of one run at one point of its lifecycle.
///
/// Records are never edited after publication: [`RunRecord::finish`] and
/// [`RunRecord::fail`] derive the terminal record from the running one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub name: String,
    pub runnable_type: RunnableType,
    pub status: RunStatus,
    pub idx: i64,
    pub passed_parameters: Map<String, Value>,
    pub started_at: DateTime<FixedOffset>,
    pub completed_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub state_updates: Map<String, Value>,
    pub run_result: Option<Value>,
    pub error: Option<RunFault>,
}

impl RunRecord {
    pub fn start(
        name: impl Into<String>,
        runnable_type: RunnableType,
        passed_parameters: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            runnable_type,
            status: RunStatus::Running,
            idx: -1,
            passed_parameters,
            started_at: now(),
            completed_at: None,
            state_updates: Map::new(),
            run_result: None,
            error: None,
        }
    }

    pub fn finish(&self, outcome: RunOutcome) -> Self {
        Self {
            status: RunStatus::Finished,
            idx: outcome.snapshot_idx.unwrap_or(-1),
            completed_at: Some(now()),
            state_updates: outcome.state_updates,
            run_result: Some(outcome.summary),
            error: None,
            ..self.clone()
        }
    }

    pub fn fail(&self, fault: RunFault) -> Self {
        Self {
            status: RunStatus::Error,
            idx: -1,
            completed_at: Some(now()),
            run_result: None,
            error: Some(fault),
            ..self.clone()
        }
    }
}

fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// Progress view of the current (or most recent) workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    pub active: bool,
    pub status: RunStatus,
    pub active_node_name: Option<String>,
    pub nodes_completed: usize,
    pub nodes_total: usize,
    /// Seconds.
    pub run_duration: f64,
    pub error: Option<RunFault>,
}
