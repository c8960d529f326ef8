use super::orchestrator::{InstalledCheck, Orchestrator};
use crate::result::{erc, AducResult, RESULT_IDLE_SUCCESS};
use crate::runtime::logging::{LEVEL_INFO, LEVEL_WARN};
use crate::runtime::{append_runtime_log, load_workflow_state, PersistedWorkflowState};
use crate::workflow::{parse_workflow, SignaturePolicy, UpdateState, WorkflowStep};

/// What to do with the persisted record when the agent starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupDecision {
    AlreadyAnnounced,
    AnnounceIdle {
        installed_update_id: Option<String>,
    },
    /// The deployment finished its phases and was waiting on a reboot or
    /// agent restart.
    VerifyInstalled { workflow_id: String },
    Resume {
        workflow_id: String,
        step: WorkflowStep,
    },
}

/// Pure decision over the persisted record.
pub fn reconcile(
    persisted: Option<&PersistedWorkflowState>,
    startup_idle_call_sent: bool,
) -> StartupDecision {
    if startup_idle_call_sent {
        return StartupDecision::AlreadyAnnounced;
    }
    let Some(state) = persisted else {
        return StartupDecision::AnnounceIdle {
            installed_update_id: None,
        };
    };
    let announce = StartupDecision::AnnounceIdle {
        installed_update_id: state.installed_update_id.clone(),
    };
    let (Some(workflow_id), Some(_)) = (state.workflow_id.as_ref(), state.source_json.as_ref())
    else {
        return announce;
    };
    if state.last_reported_state == UpdateState::Failed {
        return announce;
    }
    if state.workflow_step.is_terminal() {
        if state.restart_pending() {
            return StartupDecision::VerifyInstalled {
                workflow_id: workflow_id.clone(),
            };
        }
        return announce;
    }
    StartupDecision::Resume {
        workflow_id: workflow_id.clone(),
        step: state.workflow_step,
    }
}

impl Orchestrator {
    /// Reconciles persisted state once per process. Later calls are no-ops.
    pub fn startup(&mut self) -> StartupDecision {
        if self.data.startup_idle_call_sent {
            return StartupDecision::AlreadyAnnounced;
        }
        self.data.startup_idle_call_sent = true;

        let persisted = match load_workflow_state(&self.paths) {
            Ok(state) => state,
            Err(err) => {
                append_runtime_log(
                    &self.paths,
                    LEVEL_WARN,
                    "startup.state_unreadable",
                    &err.to_string(),
                );
                None
            }
        };
        if let Some(state) = &persisted {
            self.data.last_completed_workflow_id = state.last_completed_workflow_id.clone();
            self.data.installed_update_id = state.installed_update_id.clone();
        }

        let decision = reconcile(persisted.as_ref(), false);
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "startup.reconciled",
            &format!("{decision:?}"),
        );

        match (&decision, persisted) {
            (StartupDecision::AnnounceIdle { installed_update_id }, _) => {
                self.report(
                    UpdateState::Idle,
                    Some(AducResult::code(RESULT_IDLE_SUCCESS)),
                    installed_update_id.as_deref(),
                );
            }
            (StartupDecision::VerifyInstalled { .. }, Some(state)) => {
                self.resume_persisted(state, InstalledCheck::AfterRestart);
            }
            (StartupDecision::Resume { step, .. }, Some(state)) => {
                self.resume_persisted(state, InstalledCheck::BeforeResume(*step));
            }
            _ => {}
        }
        decision
    }

    /// Rebuilds the persisted tree without signature checks and runs the
    /// installed check that decides whether to resume it.
    fn resume_persisted(&mut self, state: PersistedWorkflowState, check: InstalledCheck) {
        let Some(source) = state.source_json.as_deref() else {
            return;
        };
        let mut tree = match parse_workflow(source, SignaturePolicy::Skip) {
            Ok(tree) => tree,
            Err(err) => {
                append_runtime_log(
                    &self.paths,
                    LEVEL_WARN,
                    "startup.resume_failed",
                    &err.to_string(),
                );
                self.report_detached_failure(
                    AducResult::failure(erc::RESUME_STATE_UNREADABLE),
                    &format!("persisted workflow could not be rebuilt: {err}"),
                );
                self.data.last_reported_state = UpdateState::Failed;
                self.commit_state();
                return;
            }
        };
        tree.set_retry_timestamp(state.retry_timestamp.clone());
        if let Some(folder) = state.work_folder.clone() {
            tree.set_work_folder(folder);
        }
        tree.execution.current_step = state.workflow_step;
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "startup.resume",
            &format!("id={} step={}", tree.workflow_id(), state.workflow_step),
        );

        self.data.last_reported_state = state.last_reported_state;
        self.data.clear_restart_states();
        self.data.current_action = Some(tree.action());
        self.adopt(tree);
        self.start_installed_check(check);
    }
}
