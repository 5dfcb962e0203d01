use meshtopo_window::WindowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("window setup failed: {0}")]
    Window(#[from] WindowError),

    #[error("periodic persistence needs a running tokio runtime")]
    NoRuntime,
}
