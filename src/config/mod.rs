pub mod error;
pub mod load;
pub mod settings;

pub use error::ConfigError;
pub use load::load_agent_settings;
pub use settings::{AgentSettings, ReportingConfig, DEFAULT_DOWNLOADS_DIR, DEFAULT_STATE_ROOT};
