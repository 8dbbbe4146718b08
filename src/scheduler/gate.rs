use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::calibration::{FieldError, Runnable};
use crate::error::{Result, RunnerError};
use crate::scheduler::state::RunState;
use crate::worker::Job;

/// Single entry point for job submissions.
///
/// Enforces single-flight admission and hands accepted jobs to the executor's
/// one-slot queue. It never waits for a job to run.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    state: Arc<RunState>,
    jobs: mpsc::Sender<Job>,
}

impl AdmissionGate {
    pub fn new(state: Arc<RunState>, jobs: mpsc::Sender<Job>) -> Self {
        Self { state, jobs }
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Validate and schedule `runnable` with `raw_parameters`.
    ///
    /// Returns the acceptance message once the job is queued. The run state
    /// reports `is_running` from this point until the terminal record of the
    /// job is published.
    ///
    /// # Errors
    ///
    /// - [`RunnerError::AlreadyRunning`] if another job holds the run slot
    /// - [`RunnerError::InvalidInput`] if the payload fails the runnable's schema
    /// - [`RunnerError::Internal`] if the executor is no longer accepting jobs
    pub fn submit(&self, runnable: Runnable, raw_parameters: &Map<String, Value>) -> Result<String> {
        let name = runnable.name().to_string();
        let kind = runnable.runnable_type();

        if self.state.is_running() {
            tracing::warn!(name = %name, kind = %kind, "Submission rejected, a job is already running");
            return Err(RunnerError::AlreadyRunning);
        }

        let parameters = validate(&runnable, raw_parameters).map_err(|errors| {
            tracing::warn!(name = %name, kind = %kind, errors = errors.len(), "Submission rejected, invalid parameters");
            RunnerError::InvalidInput(errors)
        })?;

        if !self.state.try_claim() {
            tracing::warn!(name = %name, kind = %kind, "Submission lost the admission race");
            return Err(RunnerError::AlreadyRunning);
        }

        if let Err(e) = self.jobs.try_send(Job {
            runnable,
            parameters,
        }) {
            self.state.release();
            tracing::error!(name = %name, error = %e, "Failed to hand job to executor");
            return Err(RunnerError::Internal(format!(
                "executor is not accepting jobs: {e}"
            )));
        }

        tracing::info!(name = %name, kind = %kind, "Job submitted");
        Ok(format!("{} job {} is submitted", kind.label(), name))
    }
}

fn validate(
    runnable: &Runnable,
    raw_parameters: &Map<String, Value>,
) -> std::result::Result<Map<String, Value>, Vec<FieldError>> {
    let normalized = match runnable {
        Runnable::Node(_) => normalize_node_parameters(raw_parameters),
        Runnable::Workflow(_) => normalize_workflow_parameters(raw_parameters),
    };
    runnable.validate(&normalized)
}

/// A node payload may arrive wrapped as `{"parameters": {...}}`, the shape a
/// workflow uses for its members; unwrap it.
pub fn normalize_node_parameters(raw: &Map<String, Value>) -> Map<String, Value> {
    match raw.get("parameters") {
        Some(Value::Object(inner)) => inner.clone(),
        _ => raw.clone(),
    }
}

/// Reshape a workflow payload to `{"parameters": {...}, "nodes": {name: {...}}}`,
/// keeping only the `parameters` object of each node entry.
pub fn normalize_workflow_parameters(raw: &Map<String, Value>) -> Map<String, Value> {
    let parameters = raw
        .get("parameters")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    let nodes: Map<String, Value> = raw
        .get("nodes")
        .and_then(Value::as_object)
        .map(|nodes| {
            nodes
                .iter()
                .map(|(name, entry)| {
                    let params = entry
                        .get("parameters")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Map::new()));
                    (name.clone(), params)
                })
                .collect()
        })
        .unwrap_or_default();

    let mut normalized = Map::new();
    normalized.insert("parameters".into(), parameters);
    normalized.insert("nodes".into(), Value::Object(nodes));
    normalized
}
