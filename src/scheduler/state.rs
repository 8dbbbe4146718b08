use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::calibration::Runnable;
use crate::scheduler::run::{RunRecord, RunStatus, WorkflowStatus};

/// Process-wide run state.
///
/// Created once by the composition root and shared by the admission gate,
/// the executor and the HTTP layer. The `is_running` flag is the single-flight
/// token; `last_run` is swapped wholesale on every publish so readers always
/// see a complete record.
#[derive(Debug)]
pub struct RunState {
    running: AtomicBool,
    run_item: watch::Sender<Option<Runnable>>,
    last_run: watch::Sender<Option<Arc<RunRecord>>>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        let (run_item, _) = watch::channel(None);
        let (last_run, _) = watch::channel(None);
        Self {
            running: AtomicBool::new(false),
            run_item,
            last_run,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Latest published record, possibly still running.
    pub fn last_run(&self) -> Option<Arc<RunRecord>> {
        self.last_run.borrow().clone()
    }

    /// The runnable currently or most recently executing.
    pub fn run_item(&self) -> Option<Runnable> {
        self.run_item.borrow().clone()
    }

    /// Receiver notified on every record publication.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<RunRecord>>> {
        self.last_run.subscribe()
    }

    /// Progress of the workflow in `run_item`, if the last item was a workflow.
    pub fn workflow_status(&self) -> Option<WorkflowStatus> {
        let item = self.run_item()?;
        let workflow = item.as_workflow()?;
        let progress = workflow.progress();
        let last_run = self.last_run();
        let record = last_run
            .as_deref()
            .filter(|r| r.name == workflow.name());

        let status = record.map(|r| r.status).unwrap_or(RunStatus::Running);
        Some(WorkflowStatus {
            active: !status.is_terminal(),
            status,
            active_node_name: progress.active_node_name.clone(),
            nodes_completed: progress.nodes_completed,
            nodes_total: workflow.nodes().len(),
            run_duration: progress.run_duration(),
            error: record.and_then(|r| r.error.clone()),
        })
    }

    /// Atomically take the single-flight token. Returns false if a job holds it.
    pub(crate) fn try_claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn publish(&self, record: RunRecord) -> Arc<RunRecord> {
        let record = Arc::new(record);
        tracing::debug!(name = %record.name, status = %record.status, "Publishing run record");
        self.last_run.send_replace(Some(record.clone()));
        record
    }

    pub(crate) fn set_run_item(&self, item: Runnable) {
        self.run_item.send_replace(Some(item));
    }
}
