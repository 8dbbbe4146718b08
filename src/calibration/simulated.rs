//! Simulated calibration nodes served by the binary out of the box.
//!
//! They sleep for the requested duration and report a synthetic fit, which is
//! enough to exercise admission, run tracking and the HTTP surface end to end.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use crate::calibration::library::LibraryContents;
use crate::calibration::schema::{FieldKind, FieldSpec, ParameterSchema};
use crate::calibration::{CalibrationNode, RunFault, RunOutcome, Workflow};

const TICK: Duration = Duration::from_millis(50);

/// A node that pretends to calibrate a qubit.
#[derive(Debug)]
pub struct SimulatedNode {
    name: String,
    description: String,
    schema: ParameterSchema,
    /// Wall-clock seconds slept per requested second.
    time_scale: f64,
    sequence: Arc<AtomicI64>,
}

impl SimulatedNode {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: format!("Simulated {name} calibration"),
            name,
            schema: ParameterSchema::new()
                .field(
                    FieldSpec::optional("qubit", FieldKind::String, json!("q0"))
                        .with_description("Target qubit"),
                )
                .field(
                    FieldSpec::optional("duration", FieldKind::Float, json!(1.0))
                        .with_description("Simulated run time in seconds"),
                ),
            time_scale: 1.0,
            sequence: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale;
        self
    }

    /// Share an execution counter so indices are monotonic across nodes.
    pub fn with_sequence(mut self, sequence: Arc<AtomicI64>) -> Self {
        self.sequence = sequence;
        self
    }
}

impl CalibrationNode for SimulatedNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        Some(&self.description)
    }

    fn parameters_schema(&self) -> &ParameterSchema {
        &self.schema
    }

    fn run(&self, parameters: &Map<String, Value>) -> Result<RunOutcome, RunFault> {
        let qubit = parameters
            .get("qubit")
            .and_then(Value::as_str)
            .unwrap_or("q0")
            .to_string();
        let duration = parameters
            .get("duration")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        if !duration.is_finite() || duration < 0.0 {
            return Err(RunFault::new(
                "ValueError",
                format!("duration must be a non-negative number, got {duration}"),
            ));
        }

        let wall = Duration::try_from_secs_f64(duration * self.time_scale).map_err(|e| {
            RunFault::new("ValueError", format!("duration {duration} is out of range: {e}"))
        })?;
        let started = Instant::now();
        while started.elapsed() < wall {
            std::thread::sleep(TICK.min(wall.saturating_sub(started.elapsed())));
        }

        let idx = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state_updates = Map::new();
        state_updates.insert(
            format!("{qubit}.{}", self.name),
            json!({ "calibrated": true, "snapshot_idx": idx }),
        );

        Ok(RunOutcome::new(json!({
            "name": self.name,
            "qubit": qubit,
            "duration": duration,
            "outcome": "successful",
        }))
        .with_state_updates(state_updates)
        .with_snapshot_idx(idx))
    }
}

/// The library the binary serves when no other source is configured.
pub fn builtin_library(time_scale: f64) -> LibraryContents {
    let sequence = Arc::new(AtomicI64::new(0));
    let node = |name: &str| -> Arc<dyn CalibrationNode> {
        Arc::new(
            SimulatedNode::new(name)
                .with_time_scale(time_scale)
                .with_sequence(sequence.clone()),
        )
    };

    let resonator = node("resonator_spectroscopy");
    let rabi = node("rabi");
    let ramsey = node("ramsey");

    let full_calibration = Workflow::new(
        "full_calibration",
        ParameterSchema::new().field(
            FieldSpec::optional("qubits", FieldKind::List, json!(["q0"]))
                .with_description("Qubits to calibrate"),
        ),
    )
    .with_description("Resonator spectroscopy, then Rabi, then Ramsey")
    .with_node(resonator.clone())
    .with_node(rabi.clone())
    .with_node(ramsey.clone());

    LibraryContents::new()
        .with_node(resonator)
        .with_node(rabi)
        .with_node(ramsey)
        .with_workflow(full_calibration)
}
