use super::{AgentSettings, ConfigError};
use std::path::Path;

pub fn load_agent_settings(path: &Path) -> Result<AgentSettings, ConfigError> {
    let settings = AgentSettings::from_path(path)?;
    settings.validate()?;
    Ok(settings)
}
