use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Instruction carried in `workflow.action`. The integers are the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateAction {
    Download,
    Install,
    Apply,
    ProcessDeployment,
    Cancel,
}

impl UpdateAction {
    pub fn wire_value(self) -> i64 {
        match self {
            Self::Download => 0,
            Self::Install => 1,
            Self::Apply => 2,
            Self::ProcessDeployment => 3,
            Self::Cancel => 255,
        }
    }

    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Download),
            1 => Some(Self::Install),
            2 => Some(Self::Apply),
            3 => Some(Self::ProcessDeployment),
            255 => Some(Self::Cancel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Install => "install",
            Self::Apply => "apply",
            Self::ProcessDeployment => "process_deployment",
            Self::Cancel => "cancel",
        }
    }

    /// First step the agent runs for this instruction. Cloud-driven single
    /// phase actions start at their own phase.
    pub fn initial_step(self) -> WorkflowStep {
        match self {
            Self::Download => WorkflowStep::Download,
            Self::Install => WorkflowStep::Install,
            Self::Apply => WorkflowStep::Apply,
            Self::ProcessDeployment | Self::Cancel => WorkflowStep::ProcessDeployment,
        }
    }
}

impl std::fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for UpdateAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.wire_value())
    }
}

impl<'de> Deserialize<'de> for UpdateAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Self::from_wire(raw).ok_or_else(|| D::Error::custom(format!("unknown action {raw}")))
    }
}

/// Sub-phase the orchestrator is currently driving for a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    ProcessDeployment,
    Download,
    Install,
    Apply,
    Idle,
}

impl WorkflowStep {
    pub fn next(self) -> Self {
        match self {
            Self::ProcessDeployment => Self::Download,
            Self::Download => Self::Install,
            Self::Install => Self::Apply,
            Self::Apply | Self::Idle => Self::Idle,
        }
    }

    /// State reported when the step begins, if any.
    pub fn started_state(self) -> Option<UpdateState> {
        match self {
            Self::Download => Some(UpdateState::DownloadStarted),
            Self::Install => Some(UpdateState::InstallStarted),
            Self::Apply => Some(UpdateState::ApplyStarted),
            Self::ProcessDeployment | Self::Idle => None,
        }
    }

    /// State reported when the step completes successfully.
    pub fn succeeded_state(self) -> UpdateState {
        match self {
            Self::ProcessDeployment => UpdateState::DeploymentInProgress,
            Self::Download => UpdateState::DownloadSucceeded,
            Self::Install => UpdateState::InstallSucceeded,
            Self::Apply | Self::Idle => UpdateState::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessDeployment => "process_deployment",
            Self::Download => "download",
            Self::Install => "install",
            Self::Apply => "apply",
            Self::Idle => "idle",
        }
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top-level `state` reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateState {
    Idle,
    DownloadStarted,
    DownloadSucceeded,
    InstallStarted,
    InstallSucceeded,
    ApplyStarted,
    DeploymentInProgress,
    Failed,
}

impl UpdateState {
    pub fn wire_value(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::DownloadStarted => 1,
            Self::DownloadSucceeded => 2,
            Self::InstallStarted => 3,
            Self::InstallSucceeded => 4,
            Self::ApplyStarted => 5,
            Self::DeploymentInProgress => 6,
            Self::Failed => 255,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::DownloadStarted),
            2 => Some(Self::DownloadSucceeded),
            3 => Some(Self::InstallStarted),
            4 => Some(Self::InstallSucceeded),
            5 => Some(Self::ApplyStarted),
            6 => Some(Self::DeploymentInProgress),
            255 => Some(Self::Failed),
            _ => None,
        }
    }

    /// A new deployment may be adopted without replacement from these states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }

    pub fn is_phase_started(self) -> bool {
        matches!(
            self,
            Self::DownloadStarted | Self::InstallStarted | Self::ApplyStarted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DownloadStarted => "download_started",
            Self::DownloadSucceeded => "download_succeeded",
            Self::InstallStarted => "install_started",
            Self::InstallSucceeded => "install_succeeded",
            Self::ApplyStarted => "apply_started",
            Self::DeploymentInProgress => "deployment_in_progress",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for UpdateState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.wire_value())
    }
}

impl<'de> Deserialize<'de> for UpdateState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        Self::from_wire(raw).ok_or_else(|| D::Error::custom(format!("unknown state {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_integers_are_stable() {
        assert_eq!(UpdateAction::ProcessDeployment.wire_value(), 3);
        assert_eq!(UpdateAction::Cancel.wire_value(), 255);
        assert_eq!(UpdateAction::from_wire(2), Some(UpdateAction::Apply));
        assert_eq!(UpdateAction::from_wire(4), None);
        assert_eq!(UpdateState::DeploymentInProgress.wire_value(), 6);
        assert_eq!(UpdateState::Failed.wire_value(), 255);
    }

    #[test]
    fn steps_progress_linearly_to_idle() {
        let mut step = WorkflowStep::ProcessDeployment;
        let mut seen = vec![step];
        while !step.is_terminal() {
            step = step.next();
            seen.push(step);
        }
        assert_eq!(
            seen,
            vec![
                WorkflowStep::ProcessDeployment,
                WorkflowStep::Download,
                WorkflowStep::Install,
                WorkflowStep::Apply,
                WorkflowStep::Idle,
            ]
        );
    }

    #[test]
    fn states_serialize_as_integers() {
        let json = serde_json::to_string(&UpdateState::ApplyStarted).expect("encode");
        assert_eq!(json, "5");
        let state: UpdateState = serde_json::from_str("255").expect("decode");
        assert_eq!(state, UpdateState::Failed);
    }
}
