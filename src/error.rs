use crate::context::AgentStatus;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to parse {format} from {}: {message}", path.display())]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("invalid config {}: {message}", path.display())]
    Validation { path: PathBuf, message: String },

    #[error("failed to serialize config as {format}: {message}")]
    Serialize {
        format: &'static str,
        message: String,
    },

    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },

    #[error("agent execution failed: {0}")]
    Execution(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn validation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Missing, malformed or semantically invalid configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Parse { .. } | Self::Validation { .. }
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_config_error() { 2 } else { 1 }
    }
}
