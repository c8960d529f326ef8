use crate::config::ReportingConfig;
use crate::workflow::UpdateState;

/// Transmission filter applied after a report is built. It never changes
/// orchestrator state.
pub fn should_transmit(state: UpdateState, config: &ReportingConfig) -> bool {
    if config.reduce_telemetry {
        return matches!(
            state,
            UpdateState::DeploymentInProgress | UpdateState::Idle | UpdateState::Failed
        );
    }
    if !config.report_phase_started_states {
        return !matches!(state, UpdateState::InstallStarted | UpdateState::ApplyStarted);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduced_telemetry_keeps_only_milestones() {
        let config = ReportingConfig {
            reduce_telemetry: true,
            report_phase_started_states: true,
        };
        assert!(should_transmit(UpdateState::DeploymentInProgress, &config));
        assert!(should_transmit(UpdateState::Idle, &config));
        assert!(should_transmit(UpdateState::Failed, &config));
        assert!(!should_transmit(UpdateState::DownloadStarted, &config));
        assert!(!should_transmit(UpdateState::InstallSucceeded, &config));
    }

    #[test]
    fn legacy_filter_drops_install_and_apply_started() {
        let config = ReportingConfig {
            reduce_telemetry: false,
            report_phase_started_states: false,
        };
        assert!(should_transmit(UpdateState::DownloadStarted, &config));
        assert!(!should_transmit(UpdateState::InstallStarted, &config));
        assert!(!should_transmit(UpdateState::ApplyStarted, &config));
    }

    #[test]
    fn default_config_transmits_everything() {
        let config = ReportingConfig::default();
        assert!(should_transmit(UpdateState::ApplyStarted, &config));
    }
}
