use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinError;

use crate::calibration::{Registry, RunFault, RunOutcome, Runnable, RunnableType};
use crate::scheduler::{RunRecord, RunState, RunStatus};

/// An admitted job: the runnable resolved at submission time plus its
/// validated parameters.
#[derive(Debug)]
pub struct Job {
    pub runnable: Runnable,
    pub parameters: Map<String, Value>,
}

/// Executes admitted jobs and records their lifecycle in [`RunState`].
#[derive(Clone)]
pub struct JobExecutor {
    registry: Arc<dyn Registry>,
    state: Arc<RunState>,
}

impl JobExecutor {
    pub fn new(registry: Arc<dyn Registry>, state: Arc<RunState>) -> Self {
        Self { registry, state }
    }

    /// Spawn the worker loop and return the sender side of its one-slot queue.
    ///
    /// Must be called from within a tokio runtime. The loop exits once every
    /// sender is dropped.
    pub fn spawn(self) -> mpsc::Sender<Job> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.worker_loop(rx).await;
        });
        tx
    }

    async fn worker_loop(self, mut rx: mpsc::Receiver<Job>) {
        tracing::debug!("Job executor started");
        while let Some(job) = rx.recv().await {
            self.run(job).await;
        }
        tracing::debug!("Job executor stopped, queue closed");
    }

    /// Run one job to completion and return its terminal record.
    ///
    /// The terminal record is published before the single-flight token is
    /// released, so a caller that sees `is_running() == false` also sees the
    /// final record.
    pub async fn run(&self, job: Job) -> Arc<RunRecord> {
        let Job {
            runnable,
            parameters,
        } = job;
        let name = runnable.name().to_string();

        // The item goes first so a running record never pairs with the
        // previous run's workflow counters.
        self.state.set_run_item(runnable.clone());
        let started = self.state.publish(RunRecord::start(
            name.clone(),
            runnable.runnable_type(),
            parameters.clone(),
        ));
        tracing::info!(name = %name, kind = %runnable.runnable_type(), "Job started");

        let registry = self.registry.clone();
        let state = self.state.clone();
        let result = tokio::task::spawn_blocking(move || {
            execute(registry.as_ref(), &state, &runnable, &parameters)
        })
        .await
        .unwrap_or_else(|e| Err(fault_from_join_error(e)));

        let terminal = match result {
            Ok(outcome) => started.finish(outcome),
            Err(fault) => {
                tracing::error!(
                    name = %name,
                    error_class = %fault.error_class,
                    message = %fault.message,
                    traceback = %fault.traceback.join("\n"),
                    "Job failed"
                );
                started.fail(fault)
            }
        };

        let terminal = self.state.publish(terminal);
        self.state.release();

        if terminal.status == RunStatus::Finished {
            tracing::info!(name = %name, idx = terminal.idx, "Job finished");
        }
        terminal
    }
}

/// Re-resolve `runnable` and execute it on the current (blocking) thread.
fn execute(
    registry: &dyn Registry,
    state: &RunState,
    runnable: &Runnable,
    parameters: &Map<String, Value>,
) -> Result<RunOutcome, RunFault> {
    match runnable {
        Runnable::Node(node) => {
            let node = registry
                .node(node.name())
                .ok_or_else(|| RunFault::resolution(RunnableType::Node, node.name()))?;
            node.run(parameters)
        }
        Runnable::Workflow(workflow) => {
            let workflow = registry
                .workflow(workflow.name())
                .ok_or_else(|| RunFault::resolution(RunnableType::Workflow, workflow.name()))?;
            state.set_run_item(Runnable::Workflow(workflow.clone()));

            let empty = Map::new();
            let workflow_parameters = parameters
                .get("parameters")
                .and_then(Value::as_object)
                .unwrap_or(&empty);
            let node_parameters = parameters
                .get("nodes")
                .and_then(Value::as_object)
                .unwrap_or(&empty);
            workflow.run(workflow_parameters, node_parameters)
        }
    }
}

fn fault_from_join_error(err: JoinError) -> RunFault {
    if !err.is_panic() {
        return RunFault::new("Cancelled", err.to_string());
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "job panicked".to_string());
    RunFault::new("Panic", message)
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
