//! Job admission and run-state tracking.
//!
//! - [`AdmissionGate`]: single-flight admission and parameter validation
//! - [`RunState`]: process-wide run flag, current item and latest record
//! - [`RunRecord`]: immutable lifecycle snapshot of one run

pub mod gate;
pub mod run;
pub mod state;

pub use gate::AdmissionGate;
pub use run::{RunRecord, RunStatus, WorkflowStatus};
pub use state::RunState;
