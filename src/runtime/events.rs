use crate::handlers::PhaseOutcome;

/// Identifies one phase execution; completions carrying a stale token are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseToken(pub u64);

impl std::fmt::Display for PhaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseCompletion {
    pub token: PhaseToken,
    pub workflow_id: String,
    pub outcome: PhaseOutcome,
    pub is_async: bool,
}

/// Everything the orchestrator event loop consumes, from any thread.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A desired-property write from the service. `version` is echoed in
    /// the acknowledgement.
    PropertyUpdate {
        raw: String,
        version: i64,
        force_update: bool,
    },
    PhaseCompleted(PhaseCompletion),
    Shutdown,
}
