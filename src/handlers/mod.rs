//! Content handler seam.
//!
//! A handler performs the real work for one update type. The orchestrator
//! never inspects payloads; it only sequences calls through this trait.

pub mod context;
pub mod plan;
pub mod registry;

use crate::result::{
    AducResult, ResultCode, RESULT_APPLY_SUCCESS, RESULT_CANCEL_SUCCESS,
    RESULT_DEPLOYMENT_IN_PROGRESS_SUCCESS, RESULT_DOWNLOAD_SUCCESS, RESULT_INSTALL_SUCCESS,
    RESULT_IS_INSTALLED_INSTALLED,
};

use crate::workflow::WorkflowStep;

pub use context::{CancelToken, PhaseContext};
pub use plan::{run_phase, NodeOutcome, PhaseOutcome, PhasePlan, PhaseTarget};
pub use registry::{HandlerError, HandlerRegistry};

/// Implementations must tolerate `cancel` running on another thread while a
/// `download`, `install` or `apply` call on the same node is still executing.
/// Long-running calls poll [`PhaseContext::is_cancelled`] and return
/// `Failure_Cancelled` once it flips.
pub trait ContentHandler: Send + Sync {
    fn download(&self, ctx: &PhaseContext<'_>) -> AducResult;
    fn install(&self, ctx: &PhaseContext<'_>) -> AducResult;
    fn apply(&self, ctx: &PhaseContext<'_>) -> AducResult;
    fn cancel(&self, ctx: &PhaseContext<'_>) -> AducResult;
    fn is_installed(&self, ctx: &PhaseContext<'_>) -> AducResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    ProcessDeployment,
    Download,
    Install,
    Apply,
    Cancel,
    IsInstalled,
}

impl Phase {
    pub fn invoke(self, handler: &dyn ContentHandler, ctx: &PhaseContext<'_>) -> AducResult {
        match self {
            Self::ProcessDeployment => AducResult::code(RESULT_DEPLOYMENT_IN_PROGRESS_SUCCESS),
            Self::Download => handler.download(ctx),
            Self::Install => handler.install(ctx),
            Self::Apply => handler.apply(ctx),
            Self::Cancel => handler.cancel(ctx),
            Self::IsInstalled => handler.is_installed(ctx),
        }
    }

    /// Code the root reports when every target succeeded without extras.
    pub fn success_code(self) -> ResultCode {
        match self {
            Self::ProcessDeployment => RESULT_DEPLOYMENT_IN_PROGRESS_SUCCESS,
            Self::Download => RESULT_DOWNLOAD_SUCCESS,
            Self::Install => RESULT_INSTALL_SUCCESS,
            Self::Apply => RESULT_APPLY_SUCCESS,
            Self::Cancel => RESULT_CANCEL_SUCCESS,
            Self::IsInstalled => RESULT_IS_INSTALLED_INSTALLED,
        }
    }

    pub fn for_step(step: WorkflowStep) -> Option<Self> {
        match step {
            WorkflowStep::ProcessDeployment => Some(Self::ProcessDeployment),
            WorkflowStep::Download => Some(Self::Download),
            WorkflowStep::Install => Some(Self::Install),
            WorkflowStep::Apply => Some(Self::Apply),
            WorkflowStep::Idle => None,
        }
    }

    /// Phases that run on a worker thread.
    pub fn is_async(self) -> bool {
        matches!(self, Self::Download | Self::Install | Self::Apply)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessDeployment => "process_deployment",
            Self::Download => "download",
            Self::Install => "install",
            Self::Apply => "apply",
            Self::Cancel => "cancel",
            Self::IsInstalled => "is_installed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
