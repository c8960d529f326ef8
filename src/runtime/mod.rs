pub mod events;
pub mod logging;
pub mod persistence;
pub mod state_paths;

pub use crate::shared::errors::RuntimeError;
pub(crate) use crate::shared::fs_atomic::atomic_write_file;
pub use events::{AgentEvent, PhaseCompletion, PhaseToken};
pub use logging::append_runtime_log;
pub use persistence::{
    load_workflow_state, save_workflow_state, PersistedWorkflowState, RestartState,
};
pub use state_paths::{bootstrap_state_root, StatePaths};
