use crate::workflow::{NodeId, WorkflowDocument, WorkflowNode, WorkflowTree};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag flipped by the orchestrator and polled by running handlers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// View of one node handed to a handler call.
///
/// The tree is a snapshot owned by the calling thread. Handlers report
/// details and scratch properties through the context; the orchestrator
/// folds them back into the live tree when the phase completes.
pub struct PhaseContext<'a> {
    tree: &'a WorkflowTree,
    node: NodeId,
    work_folder: &'a Path,
    cancel: &'a CancelToken,
    details: RefCell<Option<String>>,
    properties: RefCell<Map<String, Value>>,
}

impl<'a> PhaseContext<'a> {
    pub fn new(
        tree: &'a WorkflowTree,
        node: NodeId,
        work_folder: &'a Path,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            tree,
            node,
            work_folder,
            cancel,
            details: RefCell::new(None),
            properties: RefCell::new(Map::new()),
        }
    }

    pub fn workflow_id(&self) -> &str {
        self.tree.workflow_id().as_str()
    }

    pub fn tree(&self) -> &WorkflowTree {
        self.tree
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn node(&self) -> &WorkflowNode {
        self.tree.node(self.node).unwrap_or_else(|| self.tree.root())
    }

    pub fn document(&self) -> &WorkflowDocument {
        &self.node().document
    }

    pub fn work_folder(&self) -> &Path {
        self.work_folder
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.cancel
    }

    pub fn set_result_details(&self, details: impl Into<String>) {
        *self.details.borrow_mut() = Some(details.into());
    }

    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        self.properties.borrow_mut().insert(key.into(), value);
    }

    pub(crate) fn into_parts(self) -> (Option<String>, Map<String, Value>) {
        (self.details.into_inner(), self.properties.into_inner())
    }
}
