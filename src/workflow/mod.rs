pub mod action;
pub mod document;
pub mod error;
pub mod manifest;
pub mod signature;
pub mod tree;

pub use action::{UpdateAction, UpdateState, WorkflowStep};
pub use document::{parse_workflow, SignaturePolicy};
pub use error::ParseError;
pub use manifest::{UpdateId, UpdateManifest, UpdateType};
pub use signature::{sign_manifest, validate_manifest_signature, SignatureError, SignatureVerifier};
pub use tree::{
    CancellationType, ExecutionState, FileEntry, NodeId, NodeKind, WorkflowDocument, WorkflowNode,
    WorkflowTree,
};
