//! Runnable calibration units.
//!
//! A runnable is either a single [`CalibrationNode`] or a [`Workflow`] of
//! nodes executed in order. Both expose a declared parameter schema and an
//! execution capability returning `Result<RunOutcome, RunFault>`.
//!
//! # Components
//!
//! - [`CalibrationNode`]: the capability implemented by every node
//! - [`Runnable`]: tagged union handed to the scheduler
//! - [`schema`]: parameter schemas and field-level validation
//! - [`workflow`]: ordered node graphs with progress counters
//! - [`library`]: registry that resolves runnables by name
//! - [`simulated`]: stand-in nodes served by the binary

pub mod library;
pub mod schema;
pub mod simulated;
pub mod workflow;

use std::backtrace::Backtrace;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub use library::{CalibrationLibrary, Registry};
pub use schema::{FieldError, FieldKind, FieldSpec, ParameterSchema};
pub use workflow::Workflow;

/// A single calibration unit.
///
/// `run` may block for a long time; callers execute it off the async runtime.
pub trait CalibrationNode: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn parameters_schema(&self) -> &ParameterSchema;

    fn run(&self, parameters: &Map<String, Value>) -> Result<RunOutcome, RunFault>;

    /// Catalog entry for this node.
    fn serialize(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": self.parameters_schema().to_json(),
        })
    }
}

/// What a runnable reports after a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub summary: Value,
    pub state_updates: Map<String, Value>,
    /// Execution sequence number, if the runnable assigns one.
    pub snapshot_idx: Option<i64>,
}

impl RunOutcome {
    pub fn new(summary: Value) -> Self {
        Self {
            summary,
            ..Default::default()
        }
    }

    pub fn with_state_updates(mut self, state_updates: Map<String, Value>) -> Self {
        self.state_updates = state_updates;
        self
    }

    pub fn with_snapshot_idx(mut self, idx: i64) -> Self {
        self.snapshot_idx = Some(idx);
        self
    }
}

/// Fault raised by a runnable during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFault {
    pub error_class: String,
    pub message: String,
    pub traceback: Vec<String>,
}

impl RunFault {
    /// Build a fault and capture the current backtrace as its traceback.
    pub fn new(error_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_class: error_class.into(),
            message: message.into(),
            traceback: capture_traceback(),
        }
    }

    /// Build a fault from an error value. The class is the error's type name;
    /// the traceback lists its source chain followed by the captured backtrace.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut traceback = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            traceback.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        traceback.extend(capture_traceback());

        Self {
            error_class: short_type_name::<E>().to_string(),
            message: err.to_string(),
            traceback,
        }
    }

    pub(crate) fn resolution(kind: RunnableType, name: &str) -> Self {
        Self::new(
            "ResolutionError",
            format!("{kind} '{name}' is not available in the calibration library"),
        )
    }
}

impl std::fmt::Display for RunFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_class, self.message)
    }
}

fn capture_traceback() -> Vec<String> {
    let rendered = Backtrace::force_capture().to_string();
    let lines: Vec<String> = rendered
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        vec!["<no backtrace available>".to_string()]
    } else {
        lines
    }
}

/// `my_crate::module::ValueError<T>` -> `ValueError`
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnableType {
    Node,
    Workflow,
}

impl RunnableType {
    /// Capitalized label used in submission messages.
    pub fn label(self) -> &'static str {
        match self {
            RunnableType::Node => "Node",
            RunnableType::Workflow => "Workflow",
        }
    }
}

impl std::fmt::Display for RunnableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnableType::Node => write!(f, "node"),
            RunnableType::Workflow => write!(f, "workflow"),
        }
    }
}

/// A resolved node or workflow.
#[derive(Clone)]
pub enum Runnable {
    Node(Arc<dyn CalibrationNode>),
    Workflow(Arc<Workflow>),
}

impl Runnable {
    pub fn name(&self) -> &str {
        match self {
            Runnable::Node(node) => node.name(),
            Runnable::Workflow(workflow) => workflow.name(),
        }
    }

    pub fn runnable_type(&self) -> RunnableType {
        match self {
            Runnable::Node(_) => RunnableType::Node,
            Runnable::Workflow(_) => RunnableType::Workflow,
        }
    }

    /// Validate an already normalized payload against the declared schema.
    pub fn validate(&self, parameters: &Map<String, Value>) -> Result<Map<String, Value>, Vec<FieldError>> {
        match self {
            Runnable::Node(node) => node.parameters_schema().validate(parameters),
            Runnable::Workflow(workflow) => workflow.validate(parameters),
        }
    }

    pub fn as_workflow(&self) -> Option<&Arc<Workflow>> {
        match self {
            Runnable::Workflow(workflow) => Some(workflow),
            Runnable::Node(_) => None,
        }
    }
}

impl std::fmt::Debug for Runnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runnable")
            .field("type", &self.runnable_type())
            .field("name", &self.name())
            .finish()
    }
}
