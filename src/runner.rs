use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::calibration::Registry;
use crate::config::RunnerConfig;
use crate::error::Result;
use crate::scheduler::{AdmissionGate, RunState};
use crate::worker::JobExecutor;

/// Composition root: owns the one [`RunState`] of the process and wires it
/// into the admission gate, the executor and the API.
pub struct Runner {
    pub config: RunnerConfig,
    pub run_state: Arc<RunState>,
    pub registry: Arc<dyn Registry>,
    pub gate: Arc<AdmissionGate>,
}

impl Runner {
    /// Build the runner and start its executor task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: RunnerConfig, registry: Arc<dyn Registry>) -> Self {
        let run_state = Arc::new(RunState::new());
        let jobs = JobExecutor::new(registry.clone(), run_state.clone()).spawn();
        let gate = Arc::new(AdmissionGate::new(run_state.clone(), jobs));

        Self {
            config,
            run_state,
            registry,
            gate,
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            gate: self.gate.clone(),
            run_state: self.run_state.clone(),
            registry: self.registry.clone(),
        }
    }

    /// Serve the API until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let state = self.api_state();
        run_api(
            self.config.listen_addr,
            state,
            self.config.cors_permissive,
            shutdown,
        )
        .await?;

        if self.run_state.is_running() {
            if let Some(record) = self.run_state.last_run() {
                tracing::warn!(name = %record.name, "Shutting down while a job is still running");
            }
        }
        Ok(())
    }
}
