use otaflow::config::{load_agent_settings, AgentSettings, ConfigError};
use otaflow::handlers::HandlerRegistry;
use otaflow::orchestration::Orchestrator;
use otaflow::reporting::Reporter;
use std::fs;
use tempfile::tempdir;

struct NullReporter;

impl Reporter for NullReporter {
    fn report_json(&self, _payload: &str) -> bool {
        true
    }
}

#[test]
fn yaml_file_round_trips_every_field() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("state");
    let downloads = dir.path().join("payloads");
    let path = dir.path().join("agent.yaml");
    fs::write(
        &path,
        format!(
            "state_root: {}\ndownloads_folder: {}\nvalidate_manifest_signature: false\ncompletion_poll_interval_ms: 5\nreporting:\n  reduce_telemetry: false\n  report_phase_started_states: false\n",
            root.display(),
            downloads.display()
        ),
    )
    .expect("write");

    let settings = load_agent_settings(&path).expect("load");
    assert_eq!(settings.state_root, root);
    assert_eq!(settings.resolved_downloads_folder(), downloads);
    assert!(!settings.validate_manifest_signature);
    assert_eq!(settings.completion_poll_interval_ms, 5);
    assert!(!settings.reporting.report_phase_started_states);

    let encoded = serde_yaml::to_string(&settings).expect("encode");
    let decoded = AgentSettings::from_yaml(&encoded).expect("decode");
    assert_eq!(decoded, settings);
}

#[test]
fn zero_poll_interval_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("agent.yaml");
    fs::write(
        &path,
        format!(
            "state_root: {}\ncompletion_poll_interval_ms: 0\n",
            dir.path().display()
        ),
    )
    .expect("write");

    let err = load_agent_settings(&path).expect_err("zero interval");
    assert!(matches!(err, ConfigError::Settings(_)));
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempdir().expect("tempdir");
    let err = load_agent_settings(&dir.path().join("absent.yaml")).expect_err("missing");
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("absent.yaml"));
}

#[test]
fn orchestrator_bootstraps_configured_directories() {
    let dir = tempdir().expect("tempdir");
    let mut settings = AgentSettings::for_state_root(dir.path().join("state"));
    settings.downloads_folder = Some(dir.path().join("payloads"));

    let orchestrator =
        Orchestrator::new(settings, HandlerRegistry::new(), Box::new(NullReporter))
            .expect("orchestrator");

    assert!(dir.path().join("payloads").is_dir());
    assert!(dir.path().join("state/logs").is_dir());
    assert!(dir.path().join("state/runtime").is_dir());
    assert_eq!(
        orchestrator.paths().sandbox_dir("wf-1"),
        dir.path().join("payloads/wf-1")
    );
    assert!(!orchestrator.data().is_registered);
}
