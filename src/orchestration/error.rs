use crate::handlers::HandlerError;
use crate::runtime::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("failed to create sandbox {path}: {source}")]
    Sandbox {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no workflow is active")]
    NoActiveWorkflow,
}
