use super::RuntimeError;
use crate::config::AgentSettings;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
    downloads: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let downloads = root.join(crate::config::DEFAULT_DOWNLOADS_DIR);
        Self { root, downloads }
    }

    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            root: settings.state_root.clone(),
            downloads: settings.resolved_downloads_folder(),
        }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        vec![
            self.root.join("logs"),
            self.root.join("runtime"),
            self.downloads.clone(),
        ]
    }

    pub fn runtime_log_path(&self) -> PathBuf {
        self.root.join("logs/runtime.log")
    }

    pub fn workflow_state_path(&self) -> PathBuf {
        self.root.join("runtime/workflow_state.json")
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads
    }

    /// Sandbox folder for one top-level deployment.
    pub fn sandbox_dir(&self, workflow_id: &str) -> PathBuf {
        self.downloads.join(workflow_id)
    }
}

pub fn bootstrap_state_root(paths: &StatePaths) -> Result<(), RuntimeError> {
    for path in paths.required_directories() {
        fs::create_dir_all(&path).map_err(|source| RuntimeError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
