//! Arena-backed workflow handle tree.
//!
//! Nodes live in one `Vec` owned by the tree. Parents hold child indices and
//! children hold a parent index that is only used for lookup.

use super::action::{UpdateAction, WorkflowStep};
use super::manifest::{ManifestFile, UpdateId, UpdateManifest, UpdateType};
use crate::result::AducResult;
use crate::shared::ids::WorkflowId;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancellationType {
    #[default]
    None,
    Normal,
    Replacement,
    Retry,
}

impl CancellationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Normal => "normal",
            Self::Replacement => "replacement",
            Self::Retry => "retry",
        }
    }
}

impl std::fmt::Display for CancellationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A file the handler may fetch, resolved from the manifest and `fileUrls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub file_id: String,
    pub file_name: String,
    pub size_in_bytes: Option<u64>,
    pub hashes: BTreeMap<String, String>,
    pub download_url: Option<String>,
}

impl FileEntry {
    pub fn resolve(
        file_id: &str,
        manifest_file: &ManifestFile,
        file_urls: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            file_id: file_id.to_string(),
            file_name: manifest_file.file_name.clone(),
            size_in_bytes: manifest_file.size_in_bytes,
            hashes: manifest_file.hashes.clone(),
            download_url: file_urls.get(file_id).cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Top-level deployment parsed from the property update.
    Deployment,
    /// Bundle step with its own handler.
    InlineStep,
    /// Bundle step that points at a detached manifest file.
    ReferenceStep { manifest_file: FileEntry },
}

/// Immutable instruction data for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDocument {
    pub id: String,
    pub action: UpdateAction,
    pub kind: NodeKind,
    pub update_type: Option<UpdateType>,
    pub update_id: Option<UpdateId>,
    pub installed_criteria: Option<String>,
    pub update_manifest: Option<String>,
    pub update_manifest_signature: Option<String>,
    pub file_urls: BTreeMap<String, String>,
    pub files: Vec<FileEntry>,
    pub handler_properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub document: WorkflowDocument,
    pub result: Option<AducResult>,
    pub result_details: Option<String>,
    /// Scratch space for handlers; cleared when a deployment (re)starts.
    pub properties: Map<String, Value>,
}

/// Execution flags tracked per tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    pub current_step: WorkflowStep,
    pub operation_in_progress: bool,
    pub operation_cancel_requested: bool,
    pub cancellation_type: CancellationType,
    pub force_update: bool,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            current_step: WorkflowStep::ProcessDeployment,
            operation_in_progress: false,
            operation_cancel_requested: false,
            cancellation_type: CancellationType::None,
            force_update: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTree {
    workflow_id: WorkflowId,
    retry_timestamp: Option<String>,
    manifest: Option<UpdateManifest>,
    source_json: String,
    nodes: Vec<WorkflowNode>,
    work_folder: Option<PathBuf>,
    pub execution: ExecutionState,
}

impl WorkflowTree {
    pub fn new(
        workflow_id: WorkflowId,
        retry_timestamp: Option<String>,
        manifest: Option<UpdateManifest>,
        source_json: impl Into<String>,
        root: WorkflowDocument,
    ) -> Self {
        let root_node = WorkflowNode {
            id: NodeId::ROOT,
            parent: None,
            children: Vec::new(),
            document: root,
            result: None,
            result_details: None,
            properties: Map::new(),
        };
        Self {
            workflow_id,
            retry_timestamp,
            manifest,
            source_json: source_json.into(),
            nodes: vec![root_node],
            work_folder: None,
            execution: ExecutionState::default(),
        }
    }

    pub fn add_child(&mut self, parent: NodeId, document: WorkflowDocument) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(WorkflowNode {
            id,
            parent: Some(parent),
            children: Vec::new(),
            document,
            result: None,
            result_details: None,
            properties: Map::new(),
        });
        if let Some(parent_node) = self.nodes.get_mut(parent.0) {
            parent_node.children.push(id);
        }
        id
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn action(&self) -> UpdateAction {
        self.root().document.action
    }

    pub fn retry_timestamp(&self) -> Option<&str> {
        self.retry_timestamp.as_deref()
    }

    pub fn set_retry_timestamp(&mut self, token: Option<String>) {
        self.retry_timestamp = token;
    }

    pub fn manifest(&self) -> Option<&UpdateManifest> {
        self.manifest.as_ref()
    }

    pub fn source_json(&self) -> &str {
        &self.source_json
    }

    pub fn expected_update_id(&self) -> Option<&UpdateId> {
        self.root().document.update_id.as_ref()
    }

    pub fn root(&self) -> &WorkflowNode {
        &self.nodes[0]
    }

    pub fn root_mut(&mut self) -> &mut WorkflowNode {
        &mut self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> Option<&WorkflowNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &WorkflowNode> + '_ {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(move |child| self.node(*child))
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.node(id).map(|node| node.children.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth of `id` below the root, following parent links.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cursor = self.node(id).and_then(|node| node.parent);
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.node(parent).and_then(|node| node.parent);
        }
        depth
    }

    pub fn work_folder(&self) -> Option<&Path> {
        self.work_folder.as_deref()
    }

    pub fn set_work_folder(&mut self, folder: PathBuf) {
        self.work_folder = Some(folder);
    }

    pub fn set_result(&mut self, id: NodeId, result: AducResult, details: Option<String>) {
        if let Some(node) = self.node_mut(id) {
            node.result = Some(result);
            node.result_details = details;
        }
    }

    /// Root result, or a plain failure when nothing has completed yet.
    pub fn result(&self) -> AducResult {
        self.root().result.unwrap_or_default()
    }

    pub fn result_details(&self) -> Option<&str> {
        self.root().result_details.as_deref()
    }

    /// Forgets results and handler scratch data ahead of a (re)start.
    pub fn reset_for_deployment(&mut self) {
        for node in &mut self.nodes {
            node.result = None;
            node.result_details = None;
        }
        self.root_mut().properties.clear();
        self.execution.current_step = WorkflowStep::ProcessDeployment;
        self.execution.operation_in_progress = false;
        self.execution.operation_cancel_requested = false;
        self.execution.cancellation_type = CancellationType::None;
    }

    pub fn clear_cancellation(&mut self) {
        self.execution.operation_cancel_requested = false;
        self.execution.cancellation_type = CancellationType::None;
    }
}
