use super::plan::{PhasePlan, PhaseTarget};
use super::ContentHandler;
use crate::result::{erc, ExtendedResultCode};
use crate::workflow::{NodeId, UpdateType, WorkflowTree};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid update type `{0}`")]
    InvalidUpdateType(String),
    #[error("no content handler registered for `{0}`")]
    NotRegistered(String),
    #[error("node `{0}` declares no update type")]
    MissingUpdateType(String),
}

impl HandlerError {
    pub fn extended_result_code(&self) -> ExtendedResultCode {
        match self {
            Self::InvalidUpdateType(_) | Self::NotRegistered(_) => erc::NO_HANDLER_FOR_UPDATE_TYPE,
            Self::MissingUpdateType(_) => erc::STEP_HANDLER_MISSING,
        }
    }
}

/// Content handlers keyed by normalized update type (`provider/name:version`).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn ContentHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("update_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        update_type: &str,
        handler: Arc<dyn ContentHandler>,
    ) -> Result<(), HandlerError> {
        let parsed = UpdateType::parse(update_type)
            .map_err(|_| HandlerError::InvalidUpdateType(update_type.to_string()))?;
        self.handlers.insert(parsed.handler_key(), handler);
        Ok(())
    }

    pub fn with_handler(
        mut self,
        update_type: &str,
        handler: Arc<dyn ContentHandler>,
    ) -> Result<Self, HandlerError> {
        self.register(update_type, handler)?;
        Ok(self)
    }

    pub fn resolve(&self, update_type: &UpdateType) -> Result<Arc<dyn ContentHandler>, HandlerError> {
        self.handlers
            .get(&update_type.handler_key())
            .cloned()
            .ok_or_else(|| HandlerError::NotRegistered(update_type.to_string()))
    }

    pub fn update_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Resolves the handler for every node the phases will run against: the
    /// bundle steps in order, or the root when it has no steps.
    pub fn plan(&self, tree: &WorkflowTree) -> Result<PhasePlan, HandlerError> {
        let node_ids: Vec<NodeId> = if tree.child_count(NodeId::ROOT) == 0 {
            vec![NodeId::ROOT]
        } else {
            tree.children(NodeId::ROOT).map(|node| node.id).collect()
        };

        let mut targets = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let Some(node) = tree.node(node_id) else {
                continue;
            };
            let update_type = node
                .document
                .update_type
                .as_ref()
                .ok_or_else(|| HandlerError::MissingUpdateType(node.document.id.clone()))?;
            targets.push(PhaseTarget {
                node: node_id,
                update_type: update_type.clone(),
                handler: self.resolve(update_type)?,
            });
        }
        Ok(PhasePlan::new(targets))
    }
}
