use crate::handlers::{run_phase, CancelToken, Phase, PhaseOutcome, PhasePlan};
use crate::result::{erc, AducResult};
use crate::runtime::{AgentEvent, PhaseCompletion, PhaseToken};
use crate::workflow::WorkflowTree;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

/// The one phase currently running on a worker thread.
#[derive(Debug)]
pub struct InFlightPhase {
    pub token: PhaseToken,
    pub phase: Phase,
    pub workflow_id: String,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl InFlightPhase {
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Runs phases for the orchestrator. Download, Install and Apply run on a
/// spawned worker that posts its completion back on the event channel;
/// everything else runs on the calling thread.
#[derive(Debug)]
pub struct PhaseExecutor {
    events: Sender<AgentEvent>,
    next_token: u64,
    in_flight: Option<InFlightPhase>,
}

impl PhaseExecutor {
    pub fn new(events: Sender<AgentEvent>) -> Self {
        Self {
            events,
            next_token: 0,
            in_flight: None,
        }
    }

    fn issue_token(&mut self) -> PhaseToken {
        self.next_token += 1;
        PhaseToken(self.next_token)
    }

    pub fn in_flight(&self) -> Option<&InFlightPhase> {
        self.in_flight.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Starts `phase` on a worker thread over a snapshot of `tree`.
    pub fn spawn(
        &mut self,
        plan: &PhasePlan,
        phase: Phase,
        tree: &WorkflowTree,
        work_folder: PathBuf,
    ) -> std::io::Result<PhaseToken> {
        let token = self.issue_token();
        let cancel = CancelToken::new();
        let workflow_id = tree.workflow_id().to_string();

        let worker_plan = plan.clone();
        let worker_tree = tree.clone();
        let worker_cancel = cancel.clone();
        let worker_workflow_id = workflow_id.clone();
        let events = self.events.clone();
        let handle = thread::Builder::new()
            .name(format!("otaflow-{phase}"))
            .spawn(move || {
                let outcome = execute(
                    &worker_plan,
                    phase,
                    &worker_tree,
                    &work_folder,
                    &worker_cancel,
                );
                let _ = events.send(AgentEvent::PhaseCompleted(PhaseCompletion {
                    token,
                    workflow_id: worker_workflow_id,
                    outcome,
                    is_async: true,
                }));
            })?;

        self.in_flight = Some(InFlightPhase {
            token,
            phase,
            workflow_id,
            cancel,
            handle: Some(handle),
        });
        Ok(token)
    }

    /// Runs `phase` on the calling thread and returns its completion.
    pub fn run_inline(
        &mut self,
        plan: &PhasePlan,
        phase: Phase,
        tree: &WorkflowTree,
        work_folder: &Path,
    ) -> PhaseCompletion {
        let token = self.issue_token();
        let outcome = execute(plan, phase, tree, work_folder, &CancelToken::new());
        PhaseCompletion {
            token,
            workflow_id: tree.workflow_id().to_string(),
            outcome,
            is_async: false,
        }
    }

    /// Flips the in-flight cancel token and calls every handler's `cancel`
    /// while the worker may still be running. `None` when nothing is in flight.
    pub fn cancel(
        &self,
        plan: &PhasePlan,
        tree: &WorkflowTree,
        work_folder: &Path,
    ) -> Option<AducResult> {
        let in_flight = self.in_flight.as_ref()?;
        in_flight.cancel.cancel();
        let outcome = execute(plan, Phase::Cancel, tree, work_folder, &in_flight.cancel);
        Some(outcome.result)
    }

    /// Claims an async completion. Returns false for a token that is not the
    /// in-flight one; the caller drops such completions.
    pub fn accept(&mut self, completion: &PhaseCompletion) -> bool {
        let matches = self
            .in_flight
            .as_ref()
            .map(|in_flight| in_flight.token == completion.token)
            .unwrap_or(false);
        if !matches {
            return false;
        }
        if let Some(mut finished) = self.in_flight.take() {
            if let Some(handle) = finished.handle.take() {
                let _ = handle.join();
            }
        }
        true
    }
}

fn execute(
    plan: &PhasePlan,
    phase: Phase,
    tree: &WorkflowTree,
    work_folder: &Path,
    cancel: &CancelToken,
) -> PhaseOutcome {
    panic::catch_unwind(AssertUnwindSafe(|| {
        run_phase(plan, phase, tree, work_folder, cancel)
    }))
    .unwrap_or_else(|_| {
        PhaseOutcome::from_result(
            phase,
            AducResult::failure(erc::WORKER_PANICKED),
            Some(format!("{phase} handler panicked")),
        )
    })
}
