//! Parsing of one deployment instruction into a [`WorkflowTree`].

use super::action::UpdateAction;
use super::error::ParseError;
use super::manifest::{ManifestStep, StepType, UpdateManifest, UpdateType};
use super::signature::{validate_manifest_signature, SignatureVerifier};
use super::tree::{FileEntry, NodeId, NodeKind, WorkflowDocument, WorkflowTree};
use crate::shared::ids::WorkflowId;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const FIELD_WORKFLOW: &str = "workflow";
pub const FIELD_WORKFLOW_ACTION: &str = "workflow.action";
pub const FIELD_WORKFLOW_ID: &str = "workflow.id";
pub const FIELD_RETRY_TIMESTAMP: &str = "retryTimestamp";
pub const FIELD_UPDATE_MANIFEST: &str = "updateManifest";
pub const FIELD_UPDATE_MANIFEST_SIGNATURE: &str = "updateManifestSignature";
pub const FIELD_FILE_URLS: &str = "fileUrls";

/// Signature policy applied while parsing.
#[derive(Clone, Copy)]
pub enum SignaturePolicy<'a> {
    Verify(&'a dyn SignatureVerifier),
    Skip,
}

impl std::fmt::Debug for SignaturePolicy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verify(_) => write!(f, "Verify"),
            Self::Skip => write!(f, "Skip"),
        }
    }
}

/// Parses a property update into an inert tree. Nothing outside the returned
/// value is touched.
pub fn parse_workflow(raw: &str, policy: SignaturePolicy<'_>) -> Result<WorkflowTree, ParseError> {
    let root: Value =
        serde_json::from_str(raw).map_err(|err| ParseError::MalformedJson(err.to_string()))?;
    let root = root
        .as_object()
        .ok_or_else(|| ParseError::MalformedJson("instruction root is not an object".into()))?;

    let workflow = root
        .get(FIELD_WORKFLOW)
        .and_then(Value::as_object)
        .ok_or_else(|| ParseError::MissingField(FIELD_WORKFLOW.to_string()))?;
    let action = parse_action(workflow)?;
    let workflow_id = parse_workflow_id(workflow)?;
    let retry_timestamp = optional_string(workflow, FIELD_RETRY_TIMESTAMP, "workflow.retryTimestamp")?;

    if action == UpdateAction::Cancel {
        let document = WorkflowDocument {
            id: workflow_id.to_string(),
            action,
            kind: NodeKind::Deployment,
            update_type: None,
            update_id: None,
            installed_criteria: None,
            update_manifest: None,
            update_manifest_signature: None,
            file_urls: BTreeMap::new(),
            files: Vec::new(),
            handler_properties: Map::new(),
        };
        return Ok(WorkflowTree::new(
            workflow_id,
            retry_timestamp,
            None,
            raw,
            document,
        ));
    }

    let manifest_raw = root
        .get(FIELD_UPDATE_MANIFEST)
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::MissingField(FIELD_UPDATE_MANIFEST.to_string()))?;
    let signature = optional_string(
        root,
        FIELD_UPDATE_MANIFEST_SIGNATURE,
        FIELD_UPDATE_MANIFEST_SIGNATURE,
    )?;
    if let SignaturePolicy::Verify(verifier) = policy {
        let signature = signature
            .as_deref()
            .ok_or_else(|| ParseError::MissingField(FIELD_UPDATE_MANIFEST_SIGNATURE.to_string()))?;
        validate_manifest_signature(manifest_raw, signature, verifier)?;
    }

    let manifest = parse_manifest(manifest_raw)?;
    let file_urls = parse_file_urls(root)?;

    let update_type = manifest
        .update_type
        .as_deref()
        .map(|raw| UpdateType::parse(raw).map_err(|e| ParseError::invalid("updateManifest.updateType", e)))
        .transpose()?;
    if update_type.is_none() && manifest.steps().is_empty() {
        return Err(ParseError::invalid(
            "updateManifest",
            "manifest declares neither `updateType` nor `instructions.steps`",
        ));
    }

    let files = manifest
        .files
        .iter()
        .map(|(file_id, file)| FileEntry::resolve(file_id, file, &file_urls))
        .collect();
    let root_document = WorkflowDocument {
        id: workflow_id.to_string(),
        action,
        kind: NodeKind::Deployment,
        update_type,
        update_id: Some(manifest.update_id.clone()),
        installed_criteria: manifest.installed_criteria.clone(),
        update_manifest: Some(manifest_raw.to_string()),
        update_manifest_signature: signature,
        file_urls: file_urls.clone(),
        files,
        handler_properties: Map::new(),
    };

    let steps: Vec<ManifestStep> = manifest.steps().to_vec();
    let mut tree = WorkflowTree::new(
        workflow_id,
        retry_timestamp,
        Some(manifest),
        raw,
        root_document,
    );
    if action == UpdateAction::ProcessDeployment {
        for (index, step) in steps.iter().enumerate() {
            let document = build_step_document(&tree, index, step, &file_urls)?;
            tree.add_child(NodeId::ROOT, document);
        }
    }
    Ok(tree)
}

fn parse_action(workflow: &Map<String, Value>) -> Result<UpdateAction, ParseError> {
    let raw = workflow
        .get("action")
        .ok_or_else(|| ParseError::MissingField(FIELD_WORKFLOW_ACTION.to_string()))?;
    let value = raw
        .as_i64()
        .ok_or_else(|| ParseError::invalid(FIELD_WORKFLOW_ACTION, "must be an integer"))?;
    UpdateAction::from_wire(value).ok_or(ParseError::UnsupportedAction(value))
}

fn parse_workflow_id(workflow: &Map<String, Value>) -> Result<WorkflowId, ParseError> {
    let raw = workflow
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::MissingField(FIELD_WORKFLOW_ID.to_string()))?;
    WorkflowId::parse(raw).map_err(|reason| ParseError::invalid(FIELD_WORKFLOW_ID, reason))
}

fn optional_string(
    object: &Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<Option<String>, ParseError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ParseError::invalid(field, "must be a string")),
    }
}

fn parse_manifest(raw: &str) -> Result<UpdateManifest, ParseError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| ParseError::MalformedJson(format!("updateManifest: {err}")))?;
    serde_json::from_value(value)
        .map_err(|err| ParseError::invalid(FIELD_UPDATE_MANIFEST, err.to_string()))
}

fn parse_file_urls(root: &Map<String, Value>) -> Result<BTreeMap<String, String>, ParseError> {
    let Some(value) = root.get(FIELD_FILE_URLS) else {
        return Ok(BTreeMap::new());
    };
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(entries) => entries
            .iter()
            .map(|(file_id, url)| {
                url.as_str()
                    .map(|url| (file_id.clone(), url.to_string()))
                    .ok_or_else(|| {
                        ParseError::invalid(format!("{FIELD_FILE_URLS}.{file_id}"), "must be a string")
                    })
            })
            .collect(),
        _ => Err(ParseError::invalid(FIELD_FILE_URLS, "must be an object")),
    }
}

fn build_step_document(
    tree: &WorkflowTree,
    index: usize,
    step: &ManifestStep,
    file_urls: &BTreeMap<String, String>,
) -> Result<WorkflowDocument, ParseError> {
    let field = format!("instructions.steps[{index}]");
    let manifest = tree
        .manifest()
        .ok_or_else(|| ParseError::MissingField(FIELD_UPDATE_MANIFEST.to_string()))?;
    let resolve = |file_id: &str| -> Result<FileEntry, ParseError> {
        manifest
            .files
            .get(file_id)
            .map(|file| FileEntry::resolve(file_id, file, file_urls))
            .ok_or_else(|| {
                ParseError::invalid(
                    format!("{field}.files"),
                    format!("file `{file_id}` is not declared in the manifest"),
                )
            })
    };

    let (kind, update_type, files) = match step.step_type {
        StepType::Inline => {
            let handler = step
                .handler
                .as_deref()
                .ok_or_else(|| ParseError::MissingField(format!("{field}.handler")))?;
            let update_type = UpdateType::parse(handler)
                .map_err(|reason| ParseError::invalid(format!("{field}.handler"), reason))?;
            let files = step
                .files
                .iter()
                .map(|file_id| resolve(file_id))
                .collect::<Result<Vec<_>, _>>()?;
            (NodeKind::InlineStep, update_type, files)
        }
        StepType::Reference => {
            let file_id = step
                .detached_manifest_file_id
                .as_deref()
                .ok_or_else(|| ParseError::MissingField(format!("{field}.detachedManifestFileId")))?;
            let manifest_file = resolve(file_id)?;
            let update_type = UpdateType::parse(&manifest.reference_handler_key())
                .map_err(|reason| ParseError::invalid("updateManifest.manifestVersion", reason))?;
            (
                NodeKind::ReferenceStep {
                    manifest_file: manifest_file.clone(),
                },
                update_type,
                vec![manifest_file],
            )
        }
    };

    let installed_criteria = step
        .handler_properties
        .get("installedCriteria")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(WorkflowDocument {
        id: format!("{}/step_{index}", tree.workflow_id()),
        action: tree.action(),
        kind,
        update_type: Some(update_type),
        update_id: None,
        installed_criteria,
        update_manifest: None,
        update_manifest_signature: None,
        file_urls: file_urls.clone(),
        files,
        handler_properties: step.handler_properties.clone(),
    })
}
