use crate::runtime::RestartState;
use crate::workflow::{UpdateAction, UpdateState, WorkflowTree};

/// Long-lived orchestrator state. Owned by the event loop thread only.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowData {
    pub current: Option<WorkflowTree>,
    /// Tree waiting for the current one to finish cancelling.
    pub deferred_replacement: Option<WorkflowTree>,
    pub last_reported_state: UpdateState,
    pub last_completed_workflow_id: Option<String>,
    pub installed_update_id: Option<String>,
    pub current_action: Option<UpdateAction>,
    pub is_registered: bool,
    pub startup_idle_call_sent: bool,
    pub system_reboot_state: RestartState,
    pub agent_restart_state: RestartState,
}

impl Default for WorkflowData {
    fn default() -> Self {
        Self {
            current: None,
            deferred_replacement: None,
            last_reported_state: UpdateState::Idle,
            last_completed_workflow_id: None,
            installed_update_id: None,
            current_action: None,
            is_registered: false,
            startup_idle_call_sent: false,
            system_reboot_state: RestartState::None,
            agent_restart_state: RestartState::None,
        }
    }
}

impl WorkflowData {
    pub fn current_workflow_id(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|tree| tree.workflow_id().as_str())
    }

    pub fn operation_in_progress(&self) -> bool {
        self.current
            .as_ref()
            .map(|tree| tree.execution.operation_in_progress)
            .unwrap_or(false)
    }

    pub fn restart_pending(&self) -> bool {
        self.system_reboot_state.is_pending() || self.agent_restart_state.is_pending()
    }

    pub(crate) fn clear_restart_states(&mut self) {
        self.system_reboot_state = RestartState::None;
        self.agent_restart_state = RestartState::None;
    }
}

/// A retry is honoured when the new token is present and differs from the
/// one the current tree was started with.
pub fn is_retry_applicable(current: Option<&str>, candidate: Option<&str>) -> bool {
    match (current, candidate) {
        (None, Some(_)) => true,
        (Some(current), Some(candidate)) => current != candidate,
        _ => false,
    }
}
