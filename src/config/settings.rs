use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_STATE_ROOT: &str = "/var/lib/otaflow";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgentSettings {
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,
    #[serde(default)]
    pub downloads_folder: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub validate_manifest_signature: bool,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default = "default_completion_poll_interval_ms")]
    pub completion_poll_interval_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            state_root: default_state_root(),
            downloads_folder: None,
            validate_manifest_signature: true,
            reporting: ReportingConfig::default(),
            completion_poll_interval_ms: default_completion_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReportingConfig {
    /// Only `DeploymentInProgress`, `Idle` and `Failed` leave the device.
    #[serde(default)]
    pub reduce_telemetry: bool,
    /// When false, `InstallStarted` and `ApplyStarted` are never transmitted.
    #[serde(default = "default_true")]
    pub report_phase_started_states: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            reduce_telemetry: false,
            report_phase_started_states: true,
        }
    }
}

impl AgentSettings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Settings rooted at `state_root` with every other field defaulted.
    pub fn for_state_root(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.state_root.is_absolute() {
            return Err(ConfigError::Settings(
                "`state_root` must be an absolute path".to_string(),
            ));
        }
        if let Some(downloads) = &self.downloads_folder {
            if !downloads.is_absolute() {
                return Err(ConfigError::Settings(
                    "`downloads_folder` must be an absolute path".to_string(),
                ));
            }
        }
        if self.completion_poll_interval_ms == 0 {
            return Err(ConfigError::Settings(
                "`completion_poll_interval_ms` must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolved_downloads_folder(&self) -> PathBuf {
        self.downloads_folder
            .clone()
            .unwrap_or_else(|| self.state_root.join(DEFAULT_DOWNLOADS_DIR))
    }
}

fn default_state_root() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_ROOT)
}

fn default_true() -> bool {
    true
}

fn default_completion_poll_interval_ms() -> u64 {
    50
}
