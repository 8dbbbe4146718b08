use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tokio::sync::watch;

use crate::calibration::schema::{FieldError, ParameterSchema};
use crate::calibration::{CalibrationNode, RunFault, RunOutcome};

/// Progress counters of one workflow instance.
#[derive(Debug, Clone, Default)]
pub struct WorkflowProgress {
    pub active_node_name: Option<String>,
    pub nodes_completed: usize,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl WorkflowProgress {
    /// Seconds since the run started, frozen once it finished.
    pub fn run_duration(&self) -> f64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs_f64(),
            (Some(start), None) => start.elapsed().as_secs_f64(),
            _ => 0.0,
        }
    }
}

/// An ordered chain of calibration nodes.
///
/// Every instance carries its own progress counters, so a run must use its
/// own instance; [`Workflow::fresh_copy`] hands out one with zeroed counters.
pub struct Workflow {
    name: String,
    description: Option<String>,
    parameters: ParameterSchema,
    nodes: Vec<Arc<dyn CalibrationNode>>,
    progress: watch::Sender<WorkflowProgress>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, parameters: ParameterSchema) -> Self {
        let (progress, _) = watch::channel(WorkflowProgress::default());
        Self {
            name: name.into(),
            description: None,
            parameters,
            nodes: Vec::new(),
            progress,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_node(mut self, node: Arc<dyn CalibrationNode>) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn parameters_schema(&self) -> &ParameterSchema {
        &self.parameters
    }

    pub fn nodes(&self) -> &[Arc<dyn CalibrationNode>] {
        &self.nodes
    }

    pub fn progress(&self) -> WorkflowProgress {
        self.progress.borrow().clone()
    }

    /// Same definition, independent progress counters.
    pub fn fresh_copy(&self) -> Self {
        let (progress, _) = watch::channel(WorkflowProgress::default());
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            nodes: self.nodes.clone(),
            progress,
        }
    }

    /// Validate `{"parameters": {...}, "nodes": {name: {...}}}` against the
    /// workflow schema and the schema of every member node.
    pub fn validate(&self, input: &Map<String, Value>) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut errors = Vec::new();
        let empty = Map::new();

        let parameters = object_field(input, "parameters", &empty, &mut errors);
        let nodes = object_field(input, "nodes", &empty, &mut errors);

        let validated_parameters = match self.parameters.validate(parameters) {
            Ok(validated) => validated,
            Err(errs) => {
                errors.extend(errs.into_iter().map(|e| e.nested_under(&["parameters"])));
                Map::new()
            }
        };

        let mut validated_nodes = Map::new();
        for node in &self.nodes {
            let name = node.name();
            let node_input = match nodes.get(name) {
                None => &empty,
                Some(Value::Object(map)) => map,
                Some(_) => {
                    errors.push(FieldError::new(
                        vec!["nodes".into(), name.into()],
                        "Input should be a valid dictionary",
                        "dict_type",
                    ));
                    continue;
                }
            };
            match node.parameters_schema().validate(node_input) {
                Ok(validated) => {
                    validated_nodes.insert(name.to_string(), Value::Object(validated));
                }
                Err(errs) => {
                    errors.extend(errs.into_iter().map(|e| e.nested_under(&["nodes", name])));
                }
            }
        }

        for key in nodes.keys() {
            if !self.nodes.iter().any(|n| n.name() == key) {
                errors.push(FieldError::new(
                    vec!["nodes".into(), key.clone()],
                    "Extra inputs are not permitted",
                    "extra_forbidden",
                ));
            }
        }
        for key in input.keys() {
            if key != "parameters" && key != "nodes" {
                errors.push(FieldError::new(
                    vec![key.clone()],
                    "Extra inputs are not permitted",
                    "extra_forbidden",
                ));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let mut validated = Map::new();
        validated.insert("parameters".into(), Value::Object(validated_parameters));
        validated.insert("nodes".into(), Value::Object(validated_nodes));
        Ok(validated)
    }

    /// Run every member node in order, each with its own entry from `nodes`.
    ///
    /// Stops at the first failing node and returns its fault unchanged apart
    /// from a leading traceback line naming the node. Progress is marked
    /// finished on every exit, including a panicking member.
    pub fn run(
        &self,
        parameters: &Map<String, Value>,
        nodes: &Map<String, Value>,
    ) -> Result<RunOutcome, RunFault> {
        self.progress.send_replace(WorkflowProgress {
            started_at: Some(Instant::now()),
            ..Default::default()
        });
        let finished = FinishOnDrop(&self.progress);

        let empty = Map::new();
        let mut node_summaries = Map::new();
        let mut state_updates = Map::new();
        let mut snapshot_idx = None;

        for node in &self.nodes {
            let name = node.name().to_string();
            self.progress
                .send_modify(|p| p.active_node_name = Some(name.clone()));
            tracing::debug!(workflow = %self.name, node = %name, "Running workflow node");

            let node_parameters = nodes.get(&name).and_then(Value::as_object).unwrap_or(&empty);
            match node.run(node_parameters) {
                Ok(outcome) => {
                    node_summaries.insert(name, outcome.summary);
                    state_updates.extend(outcome.state_updates);
                    if outcome.snapshot_idx.is_some() {
                        snapshot_idx = outcome.snapshot_idx;
                    }
                    self.progress.send_modify(|p| p.nodes_completed += 1);
                }
                Err(mut fault) => {
                    fault
                        .traceback
                        .insert(0, format!("in workflow node '{name}'"));
                    return Err(fault);
                }
            }
        }

        drop(finished);
        let nodes_completed = self.progress.borrow().nodes_completed;
        let summary = json!({
            "name": self.name,
            "parameters": parameters,
            "nodes": node_summaries,
            "nodes_completed": nodes_completed,
            "nodes_total": self.nodes.len(),
        });

        Ok(RunOutcome {
            summary,
            state_updates,
            snapshot_idx,
        })
    }

    pub fn serialize(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters.to_json(),
            "nodes": self.nodes.iter().map(|n| n.serialize()).collect::<Vec<_>>(),
        })
    }
}

/// Clears the active node and stamps the finish time when dropped.
struct FinishOnDrop<'a>(&'a watch::Sender<WorkflowProgress>);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|p| {
            p.active_node_name = None;
            p.finished_at = Some(Instant::now());
        });
    }
}

fn object_field<'a>(
    input: &'a Map<String, Value>,
    key: &str,
    empty: &'a Map<String, Value>,
    errors: &mut Vec<FieldError>,
) -> &'a Map<String, Value> {
    match input.get(key) {
        None => empty,
        Some(Value::Object(map)) => map,
        Some(_) => {
            errors.push(FieldError::new(
                vec![key.to_string()],
                "Input should be a valid dictionary",
                "dict_type",
            ));
            empty
        }
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field(
                "nodes",
                &self.nodes.iter().map(|n| n.name()).collect::<Vec<_>>(),
            )
            .field("progress", &*self.progress.borrow())
            .finish()
    }
}
