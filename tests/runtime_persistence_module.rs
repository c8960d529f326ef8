use otaflow::config::AgentSettings;
use otaflow::handlers::{ContentHandler, HandlerRegistry, PhaseContext};
use otaflow::orchestration::Orchestrator;
use otaflow::reporting::Reporter;
use otaflow::result::AducResult;
use otaflow::runtime::{load_workflow_state, RestartState};
use otaflow::workflow::{UpdateState, WorkflowStep};
use serde_json::{json, Value};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

#[derive(Default)]
struct GatedHandler {
    open: AtomicBool,
    fail_install: AtomicBool,
}

impl ContentHandler for GatedHandler {
    fn download(&self, ctx: &PhaseContext<'_>) -> AducResult {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.open.load(Ordering::SeqCst) && Instant::now() < deadline {
            if ctx.is_cancelled() {
                return AducResult::cancelled();
            }
            thread::sleep(Duration::from_millis(5));
        }
        ctx.set_property("bytesFetched", json!(10));
        AducResult::code(500)
    }

    fn install(&self, ctx: &PhaseContext<'_>) -> AducResult {
        if self.fail_install.load(Ordering::SeqCst) {
            ctx.set_result_details("disk full");
            return AducResult::failure(0x51);
        }
        AducResult::code(600)
    }

    fn apply(&self, _ctx: &PhaseContext<'_>) -> AducResult {
        AducResult::code(700)
    }

    fn cancel(&self, _ctx: &PhaseContext<'_>) -> AducResult {
        AducResult::code(800)
    }

    fn is_installed(&self, _ctx: &PhaseContext<'_>) -> AducResult {
        AducResult::code(901)
    }
}

struct NullReporter;

impl Reporter for NullReporter {
    fn report_json(&self, _payload: &str) -> bool {
        true
    }
}

fn instruction(id: &str) -> String {
    let manifest = json!({
        "manifestVersion": "5",
        "updateId": {"provider": "contoso", "name": "toaster", "version": "1.0"},
        "updateType": "contoso/toaster:1",
        "installedCriteria": "1.0"
    });
    json!({
        "workflow": {"action": 3, "id": id, "retryTimestamp": "t-1"},
        "updateManifest": manifest.to_string()
    })
    .to_string()
}

fn orchestrator(root: &std::path::Path, handler: Arc<GatedHandler>) -> Orchestrator {
    let mut settings = AgentSettings::for_state_root(root);
    settings.validate_manifest_signature = false;
    let registry = HandlerRegistry::new()
        .with_handler("contoso/toaster:1", handler)
        .expect("registry");
    Orchestrator::new(settings, registry, Box::new(NullReporter)).expect("orchestrator")
}

#[test]
fn phase_start_is_committed_before_the_worker_runs() {
    let dir = tempdir().expect("tempdir");
    let handler = Arc::new(GatedHandler::default());
    let mut orchestrator = orchestrator(dir.path(), handler.clone());

    orchestrator.handle_property_update(&instruction("wf-persist"), false);

    let persisted = load_workflow_state(orchestrator.paths())
        .expect("load")
        .expect("state present");
    assert_eq!(persisted.workflow_id.as_deref(), Some("wf-persist"));
    assert_eq!(persisted.workflow_step, WorkflowStep::Download);
    assert_eq!(persisted.last_reported_state, UpdateState::DownloadStarted);
    assert_eq!(persisted.retry_timestamp.as_deref(), Some("t-1"));
    assert_eq!(persisted.update_type.as_deref(), Some("contoso/toaster:1"));
    assert_eq!(persisted.installed_criteria.as_deref(), Some("1.0"));
    assert_eq!(
        persisted.work_folder.as_deref(),
        Some(orchestrator.paths().sandbox_dir("wf-persist").as_path())
    );
    assert_eq!(persisted.system_reboot_state, RestartState::None);
    assert!(persisted.source_json.is_some());
    assert!(orchestrator.paths().sandbox_dir("wf-persist").is_dir());

    handler.open.store(true, Ordering::SeqCst);
    assert!(orchestrator.wait_until_settled(Duration::from_secs(10)));

    let finished = load_workflow_state(orchestrator.paths())
        .expect("load")
        .expect("state present");
    assert!(finished.workflow_id.is_none());
    assert_eq!(finished.last_reported_state, UpdateState::Idle);
    assert_eq!(
        finished.last_completed_workflow_id.as_deref(),
        Some("wf-persist")
    );
    assert_eq!(
        finished.installed_update_id.as_deref(),
        Some(r#"{"provider":"contoso","name":"toaster","version":"1.0"}"#)
    );
}

#[test]
fn handler_output_is_folded_back_into_the_kept_tree() {
    let dir = tempdir().expect("tempdir");
    let handler = Arc::new(GatedHandler::default());
    handler.open.store(true, Ordering::SeqCst);
    handler.fail_install.store(true, Ordering::SeqCst);
    let mut orchestrator = orchestrator(dir.path(), handler);

    orchestrator.handle_property_update(&instruction("wf-props"), false);
    assert!(orchestrator.wait_until_settled(Duration::from_secs(10)));

    let tree = orchestrator.data().current.as_ref().expect("failed tree is kept");
    assert_eq!(tree.root().properties.get("bytesFetched"), Some(&json!(10)));
    assert_eq!(tree.result(), AducResult::failure(0x51));
    assert_eq!(tree.result_details(), Some("disk full"));
    assert_eq!(orchestrator.data().last_reported_state, UpdateState::Failed);

    let persisted = load_workflow_state(orchestrator.paths())
        .expect("load")
        .expect("state present");
    assert_eq!(persisted.last_reported_state, UpdateState::Failed);
    assert_eq!(persisted.workflow_step, WorkflowStep::Idle);
    assert_eq!(persisted.result(), AducResult::failure(0x51));
    assert_eq!(persisted.result_details.as_deref(), Some("disk full"));
}

#[test]
fn runtime_log_records_phase_lifecycle_as_json_lines() {
    let dir = tempdir().expect("tempdir");
    let handler = Arc::new(GatedHandler::default());
    handler.open.store(true, Ordering::SeqCst);
    let mut orchestrator = orchestrator(dir.path(), handler);

    orchestrator.handle_property_update(&instruction("wf-log"), false);
    assert!(orchestrator.wait_until_settled(Duration::from_secs(10)));

    let raw = fs::read_to_string(orchestrator.paths().runtime_log_path()).expect("log");
    let events: Vec<String> = raw
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).expect("json line"))
        .filter_map(|line| line["event"].as_str().map(str::to_string))
        .collect();

    for expected in [
        "orchestrator.created",
        "startup.reconciled",
        "workflow.received",
        "phase.started",
        "phase.dispatched",
        "phase.completed",
        "workflow.completed",
    ] {
        assert!(
            events.iter().any(|event| event == expected),
            "missing {expected} in {events:?}"
        );
    }
    let started = events.iter().filter(|event| *event == "phase.started").count();
    assert_eq!(started, 4);
}
