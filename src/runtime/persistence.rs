use super::{atomic_write_file, RuntimeError, StatePaths};
use crate::result::{AducResult, ExtendedResultCode, ResultCode};
use crate::workflow::{UpdateState, WorkflowStep};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartState {
    #[default]
    None,
    Required,
    InProgress,
}

impl RestartState {
    pub fn is_pending(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// On-disk record read by the startup reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedWorkflowState {
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub update_type: Option<String>,
    #[serde(default)]
    pub expected_update_id: Option<String>,
    #[serde(default)]
    pub installed_criteria: Option<String>,
    #[serde(default)]
    pub work_folder: Option<PathBuf>,
    pub workflow_step: WorkflowStep,
    pub last_reported_state: UpdateState,
    #[serde(default)]
    pub result_code: ResultCode,
    #[serde(default)]
    pub extended_result_code: ExtendedResultCode,
    #[serde(default)]
    pub result_details: Option<String>,
    #[serde(default)]
    pub system_reboot_state: RestartState,
    #[serde(default)]
    pub agent_restart_state: RestartState,
    #[serde(default)]
    pub last_completed_workflow_id: Option<String>,
    #[serde(default)]
    pub installed_update_id: Option<String>,
    #[serde(default)]
    pub retry_timestamp: Option<String>,
    #[serde(default)]
    pub source_json: Option<String>,
    pub updated_at: String,
}

impl PersistedWorkflowState {
    pub fn idle(updated_at: impl Into<String>) -> Self {
        Self {
            workflow_id: None,
            update_type: None,
            expected_update_id: None,
            installed_criteria: None,
            work_folder: None,
            workflow_step: WorkflowStep::Idle,
            last_reported_state: UpdateState::Idle,
            result_code: 0,
            extended_result_code: 0,
            result_details: None,
            system_reboot_state: RestartState::None,
            agent_restart_state: RestartState::None,
            last_completed_workflow_id: None,
            installed_update_id: None,
            retry_timestamp: None,
            source_json: None,
            updated_at: updated_at.into(),
        }
    }

    pub fn result(&self) -> AducResult {
        AducResult::new(self.result_code, self.extended_result_code)
    }

    pub fn restart_pending(&self) -> bool {
        self.system_reboot_state.is_pending() || self.agent_restart_state.is_pending()
    }
}

pub fn load_workflow_state(
    paths: &StatePaths,
) -> Result<Option<PersistedWorkflowState>, RuntimeError> {
    let path = paths.workflow_state_path();
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|source| RuntimeError::ReadState {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| RuntimeError::ParseState {
            path: path.display().to_string(),
            source,
        })
}

pub fn save_workflow_state(
    paths: &StatePaths,
    state: &PersistedWorkflowState,
) -> Result<(), RuntimeError> {
    let path = paths.workflow_state_path();
    let encoded = serde_json::to_vec_pretty(state).map_err(|source| RuntimeError::EncodeState {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(&path, &encoded).map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}
