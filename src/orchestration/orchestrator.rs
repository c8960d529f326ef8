use super::error::OrchestratorError;
use super::executor::PhaseExecutor;
use super::workflow_data::{is_retry_applicable, WorkflowData};
use super::{NoopPlatform, PlatformLayer};
use crate::config::AgentSettings;
use crate::handlers::{HandlerRegistry, Phase, PhasePlan};
use crate::reporting::{build_ack, build_report, build_report_for, should_transmit, Reporter};
use crate::result::{
    erc, AducResult, RESULT_APPLY_IN_PROGRESS, RESULT_APPLY_SUCCESS, RESULT_DOWNLOAD_IN_PROGRESS,
    RESULT_INSTALL_IN_PROGRESS,
};
use crate::runtime::logging::{LEVEL_DEBUG, LEVEL_ERROR, LEVEL_INFO, LEVEL_WARN};
use crate::runtime::{
    append_runtime_log, bootstrap_state_root, save_workflow_state, AgentEvent,
    PersistedWorkflowState, RestartState, RuntimeError, StatePaths,
};
use crate::shared::fs_atomic::remove_dir_if_exists;
use crate::shared::time::now_rfc3339;
use crate::workflow::{
    parse_workflow, CancellationType, NodeId, ParseError, SignaturePolicy, SignatureVerifier,
    UpdateAction, UpdateId, UpdateState, WorkflowStep, WorkflowTree,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where the state machine is for the current tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    ProcessDeployment,
    DownloadStarted,
    InstallStarted,
    ApplyStarted,
    /// The last deployment failed; its tree is kept for retry detection.
    Failed,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ProcessDeployment => "process_deployment",
            Self::DownloadStarted => "download_started",
            Self::InstallStarted => "install_started",
            Self::ApplyStarted => "apply_started",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the pending inline `IsInstalled` check leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstalledCheck {
    BeforeDeployment,
    BeforeResume(WorkflowStep),
    AfterRestart,
}

/// Stand-in used when manifest signatures must be checked but no verifier
/// was supplied: every signed instruction is rejected.
struct MissingVerifier;

impl SignatureVerifier for MissingVerifier {
    fn verify(&self, _signing_input: &[u8], _signature: &[u8]) -> bool {
        false
    }
}

/// Owns all deployment state. Every mutation happens on the thread that
/// calls into it; workers only post [`AgentEvent::PhaseCompleted`] back.
pub struct Orchestrator {
    pub(super) settings: AgentSettings,
    pub(super) paths: StatePaths,
    pub(super) registry: HandlerRegistry,
    pub(super) reporter: Box<dyn Reporter>,
    pub(super) platform: Box<dyn PlatformLayer>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    pub(super) data: WorkflowData,
    pub(super) plan: Option<PhasePlan>,
    pub(super) pending_check: Option<InstalledCheck>,
    pub(super) executor: PhaseExecutor,
    events_tx: Sender<AgentEvent>,
    events_rx: Receiver<AgentEvent>,
}

impl Orchestrator {
    pub fn new(
        settings: AgentSettings,
        registry: HandlerRegistry,
        reporter: Box<dyn Reporter>,
    ) -> Result<Self, OrchestratorError> {
        let paths = StatePaths::from_settings(&settings);
        bootstrap_state_root(&paths)?;

        let (events_tx, events_rx) = mpsc::channel();
        let handlers: Vec<&str> = registry.update_types().collect();
        let data = WorkflowData {
            is_registered: !handlers.is_empty(),
            ..WorkflowData::default()
        };
        append_runtime_log(
            &paths,
            LEVEL_INFO,
            "orchestrator.created",
            &format!("handlers=[{}]", handlers.join(",")),
        );

        Ok(Self {
            executor: PhaseExecutor::new(events_tx.clone()),
            settings,
            paths,
            registry,
            reporter,
            platform: Box::new(NoopPlatform),
            verifier: None,
            data,
            plan: None,
            pending_check: None,
            events_tx,
            events_rx,
        })
    }

    pub fn with_platform(mut self, platform: Box<dyn PlatformLayer>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn data(&self) -> &WorkflowData {
        &self.data
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Sender handed to the transport; property updates posted here are
    /// handled by [`Orchestrator::run`].
    pub fn event_sender(&self) -> Sender<AgentEvent> {
        self.events_tx.clone()
    }

    pub fn state(&self) -> EngineState {
        let Some(tree) = self.data.current.as_ref() else {
            return EngineState::Idle;
        };
        if !tree.execution.operation_in_progress {
            if self.data.last_reported_state == UpdateState::Failed {
                return EngineState::Failed;
            }
            return EngineState::Idle;
        }
        match tree.execution.current_step {
            WorkflowStep::ProcessDeployment => EngineState::ProcessDeployment,
            WorkflowStep::Download => EngineState::DownloadStarted,
            WorkflowStep::Install => EngineState::InstallStarted,
            WorkflowStep::Apply => EngineState::ApplyStarted,
            WorkflowStep::Idle => EngineState::Idle,
        }
    }

    /// True when no worker is running.
    pub fn is_settled(&self) -> bool {
        !self.executor.is_busy()
    }

    /// Entry point for a new instruction from the service.
    pub fn handle_property_update(&mut self, raw: &str, force_update: bool) {
        let mut candidate = match self.parse_candidate(raw) {
            Ok(tree) => tree,
            Err(err) => {
                self.reject_instruction(&err);
                return;
            }
        };
        candidate.execution.force_update = force_update;
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "workflow.received",
            &format!(
                "id={} action={} force={force_update}",
                candidate.workflow_id(),
                candidate.action()
            ),
        );

        if !self.data.startup_idle_call_sent {
            self.startup();
        }

        match candidate.action() {
            UpdateAction::Cancel => {
                let workflow_id = candidate.workflow_id().to_string();
                self.handle_cancel_instruction(&workflow_id);
            }
            UpdateAction::ProcessDeployment => self.handle_deployment_instruction(candidate),
            UpdateAction::Download | UpdateAction::Install | UpdateAction::Apply => {
                self.handle_single_step_instruction(candidate)
            }
        }
    }

    /// Echoes the received instruction back with its secrets nulled.
    pub fn acknowledge_property_update(&self, raw: &str, version: i64) -> bool {
        match build_ack(raw, version) {
            Ok(payload) => {
                let sent = self.reporter.report_json(&payload);
                if !sent {
                    append_runtime_log(
                        &self.paths,
                        LEVEL_WARN,
                        "ack.failed",
                        &format!("version={version}"),
                    );
                }
                sent
            }
            Err(err) => {
                append_runtime_log(&self.paths, LEVEL_WARN, "ack.skipped", &err.to_string());
                false
            }
        }
    }

    fn parse_candidate(&self, raw: &str) -> Result<WorkflowTree, ParseError> {
        if !self.settings.validate_manifest_signature {
            return parse_workflow(raw, SignaturePolicy::Skip);
        }
        match self.verifier.as_deref() {
            Some(verifier) => parse_workflow(raw, SignaturePolicy::Verify(verifier)),
            None => parse_workflow(raw, SignaturePolicy::Verify(&MissingVerifier)),
        }
    }

    fn reject_instruction(&mut self, err: &ParseError) {
        append_runtime_log(
            &self.paths,
            LEVEL_WARN,
            "workflow.parse.failed",
            &err.to_string(),
        );
        self.report_detached_failure(
            AducResult::failure(err.extended_result_code()),
            &err.to_string(),
        );
    }

    /// Reports `Failed` for something that never became the current tree.
    /// No orchestrator state changes.
    pub(super) fn report_detached_failure(&self, result: AducResult, details: &str) {
        match build_report_for(
            None,
            None,
            UpdateState::Failed,
            Some(&result),
            Some(details),
            None,
        ) {
            Ok(payload) => {
                self.transmit(UpdateState::Failed, &payload);
            }
            Err(err) => append_runtime_log(
                &self.paths,
                LEVEL_ERROR,
                "report.encode_failed",
                &err.to_string(),
            ),
        }
    }

    fn handle_cancel_instruction(&mut self, workflow_id: &str) {
        let Some(current) = self.data.current.as_mut() else {
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "cancel.ignored",
                &format!("id={workflow_id} reason=no active workflow"),
            );
            return;
        };
        if current.workflow_id().as_str() != workflow_id {
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "cancel.ignored",
                &format!(
                    "id={workflow_id} reason=active workflow is {}",
                    current.workflow_id()
                ),
            );
            return;
        }
        if current.execution.cancellation_type != CancellationType::None {
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "cancel.ignored",
                &format!(
                    "id={workflow_id} reason={} cancellation already pending",
                    current.execution.cancellation_type
                ),
            );
            return;
        }
        current.execution.cancellation_type = CancellationType::Normal;
        self.handle_update_action();
    }

    fn handle_deployment_instruction(&mut self, candidate: WorkflowTree) {
        let candidate_id = candidate.workflow_id().to_string();
        let force = candidate.execution.force_update;

        let Some(current) = self.data.current.as_mut() else {
            if !force
                && self.data.last_completed_workflow_id.as_deref() == Some(candidate_id.as_str())
            {
                append_runtime_log(
                    &self.paths,
                    LEVEL_INFO,
                    "workflow.duplicate",
                    &format!("id={candidate_id} reason=already completed"),
                );
                return;
            }
            self.adopt(candidate);
            self.handle_update_action();
            return;
        };

        if current.workflow_id().as_str() == candidate_id && !force {
            if !is_retry_applicable(current.retry_timestamp(), candidate.retry_timestamp()) {
                append_runtime_log(
                    &self.paths,
                    LEVEL_INFO,
                    "workflow.duplicate",
                    &format!("id={candidate_id} reason=same workflow id"),
                );
                return;
            }
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "workflow.retry",
                &format!(
                    "id={candidate_id} retry_timestamp={}",
                    candidate.retry_timestamp().unwrap_or_default()
                ),
            );
            current.set_retry_timestamp(candidate.retry_timestamp().map(str::to_string));
            current.execution.cancellation_type = CancellationType::Retry;
            self.handle_update_action();
            return;
        }

        if current.execution.operation_in_progress {
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "replacement.deferred",
                &format!("from={} to={candidate_id}", current.workflow_id()),
            );
            current.execution.cancellation_type = CancellationType::Replacement;
            if let Some(dropped) = self.data.deferred_replacement.replace(candidate) {
                append_runtime_log(
                    &self.paths,
                    LEVEL_INFO,
                    "replacement.superseded",
                    &format!("id={}", dropped.workflow_id()),
                );
            }
            self.handle_update_action();
            return;
        }

        if !self.data.last_reported_state.is_terminal() {
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "replacement.immediate",
                &format!("from={} to={candidate_id}", current.workflow_id()),
            );
        }
        self.adopt(candidate);
        self.handle_update_action();
    }

    /// Cloud-driven Download, Install or Apply of a single phase.
    fn handle_single_step_instruction(&mut self, candidate: WorkflowTree) {
        if self.data.operation_in_progress() {
            append_runtime_log(
                &self.paths,
                LEVEL_WARN,
                "workflow.ignored",
                &format!(
                    "id={} action={} reason=another operation is in flight",
                    candidate.workflow_id(),
                    candidate.action()
                ),
            );
            return;
        }
        self.adopt(candidate);
        self.handle_update_action();
    }

    pub(super) fn adopt(&mut self, mut tree: WorkflowTree) {
        let replaces_other = self
            .data
            .current
            .as_ref()
            .is_some_and(|current| current.workflow_id() != tree.workflow_id());
        if replaces_other {
            self.data.clear_restart_states();
        }
        if tree.work_folder().is_none() {
            let folder = self.paths.sandbox_dir(tree.workflow_id().as_str());
            tree.set_work_folder(folder);
        }
        self.data.current = Some(tree);
        self.plan = None;
    }

    /// Acts on the current tree's action and pending cancellation.
    pub(super) fn handle_update_action(&mut self) {
        let Some(tree) = self.data.current.as_mut() else {
            return;
        };
        let workflow_id = tree.workflow_id().to_string();
        let cancellation = tree.execution.cancellation_type;

        if cancellation != CancellationType::None {
            if tree.execution.operation_in_progress {
                tree.execution.operation_cancel_requested = true;
                append_runtime_log(
                    &self.paths,
                    LEVEL_INFO,
                    "cancel.requested",
                    &format!("id={workflow_id} type={cancellation}"),
                );
                self.cancel_in_flight();
                return;
            }
            match cancellation {
                CancellationType::Normal => {
                    tree.clear_cancellation();
                    append_runtime_log(
                        &self.paths,
                        LEVEL_INFO,
                        "cancel.ignored",
                        &format!("id={workflow_id} reason=no operation in progress"),
                    );
                    return;
                }
                CancellationType::Retry => {
                    tree.reset_for_deployment();
                    self.data.system_reboot_state = RestartState::None;
                    self.data.agent_restart_state = RestartState::None;
                }
                CancellationType::Replacement | CancellationType::None => {
                    tree.clear_cancellation()
                }
            }
        }

        if !tree.execution.force_update
            && self.data.last_completed_workflow_id.as_deref() == Some(workflow_id.as_str())
        {
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "workflow.duplicate",
                &format!("id={workflow_id} reason=already completed"),
            );
            return;
        }

        self.data.current_action = Some(tree.action());
        self.start_installed_check(InstalledCheck::BeforeDeployment);
    }

    fn cancel_in_flight(&mut self) {
        let (Some(tree), Some(plan)) = (self.data.current.as_ref(), self.plan.as_ref()) else {
            return;
        };
        let folder = self.work_folder_of(tree);
        match self.executor.cancel(plan, tree, &folder) {
            Some(result) => append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "cancel.invoked",
                &format!("id={} result={result}", tree.workflow_id()),
            ),
            None => append_runtime_log(
                &self.paths,
                LEVEL_WARN,
                "cancel.no_worker",
                &format!("id={}", tree.workflow_id()),
            ),
        }
    }

    /// Runs `IsInstalled` inline; the completion decides what happens next.
    pub(super) fn start_installed_check(&mut self, check: InstalledCheck) {
        let plan = match self.ensure_plan() {
            Ok(plan) => plan,
            Err(err) => {
                self.fail_for_error(&err);
                return;
            }
        };
        let Some(tree) = self.data.current.as_ref() else {
            return;
        };
        let folder = self.work_folder_of(tree);
        self.pending_check = Some(check);
        let completion = self
            .executor
            .run_inline(&plan, Phase::IsInstalled, tree, &folder);
        self.on_phase_completed(completion);
    }

    /// Starts the phase for the current tree's `current_step`.
    pub(super) fn transition_workflow(&mut self) {
        let Some(tree) = self.data.current.as_mut() else {
            return;
        };
        let step = tree.execution.current_step;
        let Some(phase) = Phase::for_step(step) else {
            return;
        };
        tree.execution.operation_in_progress = true;
        let workflow_id = tree.workflow_id().to_string();
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "phase.started",
            &format!("id={workflow_id} phase={phase}"),
        );

        let plan = match self.ensure_plan() {
            Ok(plan) => plan,
            Err(err) => {
                self.fail_for_error(&err);
                return;
            }
        };
        let folder = match self.prepare_sandbox(phase == Phase::ProcessDeployment) {
            Ok(folder) => folder,
            Err(err) => {
                self.fail_deployment(
                    AducResult::failure(erc::SANDBOX_CREATE_FAILED),
                    Some(err.to_string()),
                );
                return;
            }
        };

        if !phase.is_async() {
            self.commit_state();
            let Some(tree) = self.data.current.as_ref() else {
                return;
            };
            let completion = self.executor.run_inline(&plan, phase, tree, &folder);
            self.on_phase_completed(completion);
            return;
        }

        if let Some(state) = step.started_state() {
            self.report(state, Some(started_result(phase)), None);
        }
        self.commit_state();
        let Some(tree) = self.data.current.as_ref() else {
            return;
        };
        match self.executor.spawn(&plan, phase, tree, folder) {
            Ok(token) => append_runtime_log(
                &self.paths,
                LEVEL_DEBUG,
                "phase.dispatched",
                &format!("id={workflow_id} phase={phase} token={token}"),
            ),
            Err(err) => self.fail_deployment(
                AducResult::failure(erc::WORKER_SPAWN_FAILED),
                Some(format!("failed to start {phase} worker: {err}")),
            ),
        }
    }

    fn ensure_plan(&mut self) -> Result<PhasePlan, OrchestratorError> {
        if let Some(plan) = &self.plan {
            return Ok(plan.clone());
        }
        let tree = self
            .data
            .current
            .as_ref()
            .ok_or(OrchestratorError::NoActiveWorkflow)?;
        let plan = self.registry.plan(tree)?;
        self.plan = Some(plan.clone());
        Ok(plan)
    }

    fn fail_for_error(&mut self, err: &OrchestratorError) {
        let result = match err {
            OrchestratorError::Handler(handler) => {
                AducResult::failure(handler.extended_result_code())
            }
            _ => AducResult::default(),
        };
        self.fail_deployment(result, Some(err.to_string()));
    }

    pub(super) fn work_folder_of(&self, tree: &WorkflowTree) -> PathBuf {
        tree.work_folder()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.paths.sandbox_dir(tree.workflow_id().as_str()))
    }

    fn prepare_sandbox(&self, remove_siblings: bool) -> Result<PathBuf, OrchestratorError> {
        let tree = self
            .data
            .current
            .as_ref()
            .ok_or(OrchestratorError::NoActiveWorkflow)?;
        let folder = self.work_folder_of(tree);
        fs::create_dir_all(&folder).map_err(|source| OrchestratorError::Sandbox {
            path: folder.display().to_string(),
            source,
        })?;
        if remove_siblings {
            self.remove_sibling_sandboxes(&folder);
        }
        Ok(folder)
    }

    fn remove_sibling_sandboxes(&self, keep: &Path) {
        let Ok(entries) = fs::read_dir(self.paths.downloads_dir()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path != keep {
                self.destroy_sandbox(&path);
            }
        }
    }

    pub(super) fn destroy_sandbox(&self, folder: &Path) {
        match remove_dir_if_exists(folder) {
            Ok(true) => append_runtime_log(
                &self.paths,
                LEVEL_DEBUG,
                "sandbox.removed",
                &folder.display().to_string(),
            ),
            Ok(false) => {}
            Err(source) => {
                let err = RuntimeError::RemoveSandbox {
                    path: folder.display().to_string(),
                    source,
                };
                append_runtime_log(
                    &self.paths,
                    LEVEL_WARN,
                    "sandbox.remove_failed",
                    &err.to_string(),
                );
            }
        }
    }

    /// Reports `state` for the current tree. The state is recorded as last
    /// reported even when transmission is filtered or fails.
    pub(super) fn report(
        &mut self,
        state: UpdateState,
        result: Option<AducResult>,
        installed_update_id: Option<&str>,
    ) -> bool {
        let payload = build_report(&self.data, state, result.as_ref(), installed_update_id);
        self.data.last_reported_state = state;
        match payload {
            Ok(payload) => self.transmit(state, &payload),
            Err(err) => {
                append_runtime_log(
                    &self.paths,
                    LEVEL_ERROR,
                    "report.encode_failed",
                    &err.to_string(),
                );
                false
            }
        }
    }

    fn transmit(&self, state: UpdateState, payload: &str) -> bool {
        if !should_transmit(state, &self.settings.reporting) {
            append_runtime_log(
                &self.paths,
                LEVEL_DEBUG,
                "report.suppressed",
                &format!("state={state}"),
            );
            return true;
        }
        let sent = self.reporter.report_json(payload);
        if !sent {
            append_runtime_log(
                &self.paths,
                LEVEL_WARN,
                "report.failed",
                &format!("state={state}"),
            );
        }
        sent
    }

    pub(super) fn snapshot_state(&self) -> PersistedWorkflowState {
        let mut state = PersistedWorkflowState::idle(now_rfc3339());
        state.last_reported_state = self.data.last_reported_state;
        state.last_completed_workflow_id = self.data.last_completed_workflow_id.clone();
        state.installed_update_id = self.data.installed_update_id.clone();
        state.system_reboot_state = self.data.system_reboot_state;
        state.agent_restart_state = self.data.agent_restart_state;

        if let Some(tree) = self.data.current.as_ref() {
            let root = tree.root();
            let result = tree.result();
            state.workflow_id = Some(tree.workflow_id().to_string());
            state.update_type = root
                .document
                .update_type
                .as_ref()
                .map(ToString::to_string);
            state.expected_update_id = tree.expected_update_id().map(UpdateId::to_reported_string);
            state.installed_criteria = root.document.installed_criteria.clone();
            state.work_folder = Some(self.work_folder_of(tree));
            state.workflow_step = tree.execution.current_step;
            state.result_code = result.result_code;
            state.extended_result_code = result.extended_result_code;
            state.result_details = tree.result_details().map(str::to_string);
            state.retry_timestamp = tree.retry_timestamp().map(str::to_string);
            state.source_json = Some(tree.source_json().to_string());
        }
        state
    }

    /// Persists the phase boundary. Failures are logged, never fatal.
    pub(super) fn commit_state(&self) {
        let state = self.snapshot_state();
        if let Err(err) = save_workflow_state(&self.paths, &state) {
            append_runtime_log(
                &self.paths,
                LEVEL_ERROR,
                "state.commit_failed",
                &err.to_string(),
            );
        }
    }

    /// Reports `Failed`, keeps the tree for duplicate and retry detection and
    /// returns the engine to Idle.
    pub(super) fn fail_deployment(&mut self, result: AducResult, details: Option<String>) {
        let Some(tree) = self.data.current.as_mut() else {
            return;
        };
        let details = details.or_else(|| tree.result_details().map(str::to_string));
        tree.set_result(NodeId::ROOT, result, details);
        tree.execution.operation_in_progress = false;
        tree.execution.current_step = WorkflowStep::Idle;
        tree.clear_cancellation();
        let workflow_id = tree.workflow_id().to_string();

        self.report(UpdateState::Failed, Some(result), None);
        self.data.clear_restart_states();
        self.commit_state();
        append_runtime_log(
            &self.paths,
            LEVEL_WARN,
            "workflow.failed",
            &format!("id={workflow_id} result={result}"),
        );
    }

    /// Final Idle for an installed update: report, record, clean up.
    pub(super) fn complete_deployment(&mut self) {
        let Some(tree) = self.data.current.as_mut() else {
            return;
        };
        tree.execution.operation_in_progress = false;
        tree.execution.current_step = WorkflowStep::Idle;
        let workflow_id = tree.workflow_id().to_string();
        let installed = tree.expected_update_id().map(UpdateId::to_reported_string);
        let folder = tree.work_folder().map(Path::to_path_buf);

        self.report(
            UpdateState::Idle,
            Some(AducResult::code(RESULT_APPLY_SUCCESS)),
            installed.as_deref(),
        );
        self.data.last_completed_workflow_id = Some(workflow_id.clone());
        self.data.installed_update_id = installed;
        self.data.clear_restart_states();
        self.release_current(folder);
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "workflow.completed",
            &format!("id={workflow_id}"),
        );
        self.platform.on_idle(&workflow_id);
    }

    /// Normal cancellation finished: report the cancelled Idle and drop the tree.
    pub(super) fn finish_cancelled(&mut self) {
        let Some(tree) = self.data.current.as_mut() else {
            return;
        };
        tree.execution.operation_in_progress = false;
        tree.execution.current_step = WorkflowStep::Idle;
        tree.clear_cancellation();
        let workflow_id = tree.workflow_id().to_string();
        let folder = tree.work_folder().map(Path::to_path_buf);

        self.report(UpdateState::Idle, Some(AducResult::cancelled()), None);
        self.data.clear_restart_states();
        self.release_current(folder);
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "workflow.cancelled",
            &format!("id={workflow_id}"),
        );
        self.platform.on_idle(&workflow_id);
    }

    fn release_current(&mut self, folder: Option<PathBuf>) {
        self.data.current = None;
        self.data.current_action = None;
        self.plan = None;
        if let Some(folder) = folder {
            self.destroy_sandbox(&folder);
        }
        self.commit_state();
    }

    /// Persists, then asks the platform for the reboot or restart a handler
    /// requested. The deployment resumes at `resume_step` afterwards.
    pub(super) fn request_restart(&mut self, resume_step: WorkflowStep) {
        let reboot = self.data.system_reboot_state.is_pending();
        if let Some(tree) = self.data.current.as_mut() {
            tree.execution.current_step = resume_step;
            tree.execution.operation_in_progress = false;
        }
        if reboot {
            self.data.system_reboot_state = RestartState::InProgress;
        } else {
            self.data.agent_restart_state = RestartState::InProgress;
        }
        self.commit_state();

        let kind = if reboot { "reboot" } else { "agent_restart" };
        let accepted = if reboot {
            self.platform.request_reboot()
        } else {
            self.platform.request_agent_restart()
        };
        if accepted {
            append_runtime_log(
                &self.paths,
                LEVEL_INFO,
                "restart.requested",
                &format!("kind={kind} resume_step={resume_step}"),
            );
            return;
        }

        let code = if reboot {
            erc::REBOOT_REQUEST_FAILED
        } else {
            erc::AGENT_RESTART_REQUEST_FAILED
        };
        self.fail_deployment(
            AducResult::failure(code),
            Some(format!("{kind} request was refused")),
        );
    }

    pub(super) fn dispatch(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::PropertyUpdate {
                raw,
                version,
                force_update,
            } => {
                self.acknowledge_property_update(&raw, version);
                self.handle_property_update(&raw, force_update)
            }
            AgentEvent::PhaseCompleted(completion) => self.on_phase_completed(completion),
            AgentEvent::Shutdown => {}
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settings.completion_poll_interval_ms.max(1))
    }

    /// Event loop. Runs startup reconciliation, then drains events until
    /// `stop` is set or a `Shutdown` event arrives.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), RuntimeError> {
        self.startup();
        append_runtime_log(
            &self.paths,
            LEVEL_INFO,
            "orchestrator.started",
            &format!("poll_ms={}", self.settings.completion_poll_interval_ms),
        );

        let tick = self.poll_interval();
        while !stop.load(Ordering::Relaxed) {
            match self.events_rx.recv_timeout(tick) {
                Ok(AgentEvent::Shutdown) => break,
                Ok(event) => self.dispatch(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(RuntimeError::EventChannelClosed),
            }
        }

        let in_flight = self
            .executor
            .in_flight()
            .map(|phase| format!("in_flight={} phase={}", phase.workflow_id, phase.phase))
            .unwrap_or_else(|| "in_flight=none".to_string());
        append_runtime_log(&self.paths, LEVEL_INFO, "orchestrator.stopped", &in_flight);
        Ok(())
    }

    /// Processes queued events until no worker is running or `timeout`
    /// elapses. Returns whether the orchestrator settled.
    pub fn wait_until_settled(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let tick = self.poll_interval();
        loop {
            loop {
                match self.events_rx.try_recv() {
                    Ok(AgentEvent::Shutdown) => return self.is_settled(),
                    Ok(event) => self.dispatch(event),
                    Err(_) => break,
                }
            }
            if self.is_settled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.events_rx.recv_timeout(tick.min(deadline - now)) {
                Ok(AgentEvent::Shutdown) => return self.is_settled(),
                Ok(event) => self.dispatch(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

fn started_result(phase: Phase) -> AducResult {
    match phase {
        Phase::Install => AducResult::code(RESULT_INSTALL_IN_PROGRESS),
        Phase::Apply => AducResult::code(RESULT_APPLY_IN_PROGRESS),
        _ => AducResult::code(RESULT_DOWNLOAD_IN_PROGRESS),
    }
}
