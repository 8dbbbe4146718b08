use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::calibration::{CalibrationNode, Workflow};

/// Resolves runnables by name.
///
/// `workflow` must hand out a fresh instance on every call: workflows keep
/// progress counters that must not be shared between runs.
pub trait Registry: Send + Sync {
    fn node(&self, name: &str) -> Option<Arc<dyn CalibrationNode>>;

    fn workflow(&self, name: &str) -> Option<Arc<Workflow>>;

    fn nodes(&self) -> Vec<Arc<dyn CalibrationNode>>;

    fn workflows(&self) -> Vec<Arc<Workflow>>;

    /// Reload the catalog from its source.
    fn rescan(&self);
}

/// Snapshot of everything a library currently offers.
#[derive(Default)]
pub struct LibraryContents {
    pub nodes: BTreeMap<String, Arc<dyn CalibrationNode>>,
    pub workflows: BTreeMap<String, Arc<Workflow>>,
}

impl LibraryContents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: Arc<dyn CalibrationNode>) -> Self {
        self.nodes.insert(node.name().to_string(), node);
        self
    }

    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.workflows
            .insert(workflow.name().to_string(), Arc::new(workflow));
        self
    }
}

type Loader = Box<dyn Fn() -> LibraryContents + Send + Sync>;

/// In-memory calibration library backed by a loader function.
///
/// The current contents live in a watch channel so a rescan swaps the whole
/// catalog at once while readers keep using the snapshot they hold.
pub struct CalibrationLibrary {
    loader: Loader,
    contents: watch::Sender<Arc<LibraryContents>>,
}

impl CalibrationLibrary {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> LibraryContents + Send + Sync + 'static,
    {
        let (contents, _) = watch::channel(Arc::new(loader()));
        Self {
            loader: Box::new(loader),
            contents,
        }
    }

    fn snapshot(&self) -> Arc<LibraryContents> {
        self.contents.borrow().clone()
    }
}

impl Registry for CalibrationLibrary {
    fn node(&self, name: &str) -> Option<Arc<dyn CalibrationNode>> {
        self.snapshot().nodes.get(name).cloned()
    }

    fn workflow(&self, name: &str) -> Option<Arc<Workflow>> {
        self.snapshot()
            .workflows
            .get(name)
            .map(|template| Arc::new(template.fresh_copy()))
    }

    fn nodes(&self) -> Vec<Arc<dyn CalibrationNode>> {
        self.snapshot().nodes.values().cloned().collect()
    }

    fn workflows(&self) -> Vec<Arc<Workflow>> {
        self.snapshot().workflows.values().cloned().collect()
    }

    fn rescan(&self) {
        let contents = (self.loader)();
        tracing::info!(
            nodes = contents.nodes.len(),
            workflows = contents.workflows.len(),
            "Calibration library rescanned"
        );
        self.contents.send_replace(Arc::new(contents));
    }
}

impl std::fmt::Debug for CalibrationLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CalibrationLibrary")
            .field("nodes", &snapshot.nodes.keys().collect::<Vec<_>>())
            .field("workflows", &snapshot.workflows.keys().collect::<Vec<_>>())
            .finish()
    }
}
