use thiserror::Error;
use vidstash::DownloadError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Download(#[from] DownloadError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No download with id `{0}`")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Interrupted")]
    Interrupted,
}

impl CliError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Whether the user stopped the command, as opposed to it failing.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted | Self::Download(DownloadError::Cancelled))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_interrupted() { 130 } else { 1 }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
