//! The single re-entry point for phase results.

use super::orchestrator::{InstalledCheck, Orchestrator};
use crate::handlers::{Phase, PhaseOutcome};
use crate::result::{erc, AducResult, RESULT_IS_INSTALLED_INSTALLED};
use crate::runtime::logging::{LEVEL_ERROR, LEVEL_INFO, LEVEL_WARN};
use crate::runtime::{append_runtime_log, PhaseCompletion, RestartState};
use crate::workflow::{CancellationType, NodeId, UpdateAction, UpdateState, WorkflowStep};

impl Orchestrator {
    /// Applies one phase result to the current tree and drives the next step.
    ///
    /// A pending replacement is spliced in here and only here, once the
    /// cancelled worker has finished. Any terminal result triggers the splice,
    /// including a plain success that raced the cancel signal.
    pub fn on_phase_completed(&mut self, completion: PhaseCompletion) {
        if completion.is_async && !self.executor.accept(&completion) {
            append_runtime_log(
                &self.paths,
                LEVEL_WARN,
                "phase.stale",
                &format!(
                    "id={} token={} phase={}",
                    completion.workflow_id, completion.token, completion.outcome.phase
                ),
            );
            return;
        }
        let Some(tree) = self.data.current.as_mut() else {
            append_runtime_log(
                &self.paths,
                LEVEL_WARN,
                "phase.orphaned",
                &format!("id={} token={}", completion.workflow_id, completion.token),
            );
            return;
        };
        if tree.workflow_id().as_str() != completion.workflow_id {
            append_runtime_log(
                &self.paths,
                LEVEL_WARN,
                "phase.stale",
                &format!(
                    "id={} current={} token={}",
                    completion.workflow_id,
                    tree.workflow_id(),
                    completion.token
                ),
            );
            return;
        }

        let PhaseOutcome {
            phase,
            mut result,
            mut details,
            nodes,
        } = completion.outcome;
        if result.is_in_progress() {
            append_runtime_log(
                &self.paths,
                LEVEL_ERROR,
                "phase.unexpected_in_progress",
                &format!("id={} phase={phase} result={result}", completion.workflow_id),
            );
            details = Some(format!("{phase} returned an in-progress result"));
            result = AducResult::failure(erc::UNEXPECTED_IN_PROGRESS_RESULT);
        }
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "phase.completed",
            &format!("id={} phase={phase} result={result}", completion.workflow_id),
        );

        if phase == Phase::IsInstalled {
            self.on_installed_check(result);
            return;
        }

        if matches!(phase, Phase::Download | Phase::Install | Phase::Apply) {
            for node in nodes {
                if node.node != NodeId::ROOT {
                    tree.set_result(node.node, node.result, node.details);
                }
                if let Some(target) = tree.node_mut(node.node) {
                    target.properties.extend(node.properties);
                }
            }
        }
        tree.set_result(NodeId::ROOT, result, details);
        let cancel_requested = tree.execution.operation_cancel_requested;
        let cancellation = tree.execution.cancellation_type;

        if cancel_requested {
            match cancellation {
                CancellationType::Replacement => self.apply_deferred_replacement(),
                CancellationType::Retry => self.restart_for_retry(),
                CancellationType::Normal | CancellationType::None => self.finish_cancelled(),
            }
            return;
        }

        if !result.is_success() {
            self.fail_deployment(result, None);
            return;
        }
        self.advance(result);
    }

    fn on_installed_check(&mut self, result: AducResult) {
        let check = self
            .pending_check
            .take()
            .unwrap_or(InstalledCheck::BeforeDeployment);
        let installed = result.result_code == RESULT_IS_INSTALLED_INSTALLED;
        let Some(tree) = self.data.current.as_mut() else {
            return;
        };
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "workflow.installed_check",
            &format!(
                "id={} installed={installed} check={check:?}",
                tree.workflow_id()
            ),
        );

        match (check, installed) {
            (_, true) => self.complete_deployment(),
            (InstalledCheck::BeforeDeployment, false) => {
                tree.execution.current_step = tree.action().initial_step();
                self.transition_workflow();
            }
            (InstalledCheck::BeforeResume(step), false) => {
                tree.execution.current_step = step;
                self.transition_workflow();
            }
            (InstalledCheck::AfterRestart, false) => self.fail_deployment(
                AducResult::failure(erc::NOT_INSTALLED_AFTER_RESTART),
                Some("update is not installed after restart".to_string()),
            ),
        }
    }

    /// Forward progress after a successful phase.
    fn advance(&mut self, result: AducResult) {
        let Some(tree) = self.data.current.as_ref() else {
            return;
        };
        let step = tree.execution.current_step;
        let single_step = tree.action() != UpdateAction::ProcessDeployment;

        if result.requires_reboot() {
            self.data.system_reboot_state = RestartState::Required;
        }
        if result.requires_agent_restart() {
            self.data.agent_restart_state = RestartState::Required;
        }

        if step == WorkflowStep::Apply {
            if self.data.restart_pending() {
                self.request_restart(WorkflowStep::Idle);
            } else {
                self.complete_deployment();
            }
            return;
        }

        self.report(step.succeeded_state(), Some(result), None);

        let next = step.next();
        if result.requires_immediate_restart() {
            self.request_restart(next);
            return;
        }

        let Some(tree) = self.data.current.as_mut() else {
            return;
        };
        tree.execution.current_step = next;
        if single_step {
            tree.execution.operation_in_progress = false;
            self.commit_state();
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "workflow.step_completed",
                &format!("step={step} next={next}"),
            );
            return;
        }
        self.transition_workflow();
    }

    /// Drops the cancelled tree and starts the deferred one from the top.
    fn apply_deferred_replacement(&mut self) {
        let Some(next) = self.data.deferred_replacement.take() else {
            append_runtime_log(
                &self.paths,
                LEVEL_WARN,
                "replacement.missing",
                "replacement cancellation completed without a deferred tree",
            );
            self.finish_cancelled();
            return;
        };
        if let Some(previous) = self.data.current.take() {
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "replacement.applied",
                &format!("from={} to={}", previous.workflow_id(), next.workflow_id()),
            );
            let folder = self.work_folder_of(&previous);
            self.destroy_sandbox(&folder);
        }
        self.data.last_reported_state = UpdateState::Idle;
        self.data.clear_restart_states();
        self.adopt(next);
        self.handle_update_action();
    }

    /// Restarts the same tree at `ProcessDeployment` after a retry cancel.
    fn restart_for_retry(&mut self) {
        self.data.clear_restart_states();
        let Some(tree) = self.data.current.as_mut() else {
            return;
        };
        tree.reset_for_deployment();
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "workflow.retry_restart",
            &format!("id={}", tree.workflow_id()),
        );
        self.handle_update_action();
    }
}
