//! Deployment orchestration: the state machine, its phase executor and the
//! startup reconciler.

mod completion;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod startup;
pub mod workflow_data;

pub use error::OrchestratorError;
pub use executor::{InFlightPhase, PhaseExecutor};
pub use orchestrator::{EngineState, Orchestrator};
pub use startup::{reconcile, StartupDecision};
pub use workflow_data::{is_retry_applicable, WorkflowData};

/// Device collaborators the orchestrator calls out to. Requests return
/// whether the platform accepted them.
pub trait PlatformLayer: Send {
    /// Called once a deployment has reached its final Idle.
    fn on_idle(&self, _workflow_id: &str) {}

    fn request_reboot(&self) -> bool {
        false
    }

    fn request_agent_restart(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlatform;

impl PlatformLayer for NoopPlatform {}
