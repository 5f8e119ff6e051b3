use std::path::PathBuf;
use thiserror::Error;

use crate::core::Stage;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Tool not found in PATH: {0}")]
    ToolNotFound(String),

    #[error("Tool timeout: {tool} exceeded {seconds} seconds ({input_lines} input lines)")]
    ToolTimeout {
        tool: String,
        seconds: u64,
        input_lines: usize,
    },

    #[error("Tool execution failed: {tool} (exit code {exit_code:?}) - {stderr}")]
    ToolExecution {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Stage failed: {stage} - {message}")]
    StageFailure {
        stage: Stage,
        message: String,
    },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File error: {path:?} - {message}")]
    File {
        path: PathBuf,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl DiscoveryError {
    /// The tool ran past its allotted time and was killed
    pub fn is_timeout(&self) -> bool {
        matches!(self, DiscoveryError::ToolTimeout { .. })
    }

    /// The executable could not be resolved on PATH
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiscoveryError::ToolNotFound(_))
    }

    /// Wrap any error as the failure of a pipeline stage
    pub fn into_stage_failure(self, stage: Stage) -> Self {
        match self {
            DiscoveryError::StageFailure { .. } => self,
            other => DiscoveryError::StageFailure {
                stage,
                message: other.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for DiscoveryError {
    fn from(error: anyhow::Error) -> Self {
        DiscoveryError::Unexpected(format!("{:#}", error))
    }
}

pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;

/// Truncate captured tool output so errors stay readable
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
