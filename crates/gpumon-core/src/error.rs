use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpumonError {
    #[error("Diagnostic command not found: {0}")]
    CommandNotFound(String),

    #[error("Diagnostic command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("Diagnostic command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("Report decode failed: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Sink responded with {status}: {body}")]
    SinkStatus { status: u16, body: String },

    #[error("Sink request timed out")]
    SinkTimeout,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GpumonError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GpumonError::CommandTimeout(_) | GpumonError::SinkTimeout)
    }

    /// Short category name used as a log field.
    pub fn category(&self) -> &'static str {
        match self {
            GpumonError::CommandNotFound(_)
            | GpumonError::CommandFailed { .. }
            | GpumonError::CommandTimeout(_)
            | GpumonError::Io(_) => "command",
            GpumonError::Decode(_) => "decode",
            GpumonError::Http(_) | GpumonError::SinkStatus { .. } | GpumonError::SinkTimeout => {
                "network"
            }
            GpumonError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, GpumonError>;
