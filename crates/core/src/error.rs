use std::path::PathBuf;

use thiserror::Error;

pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Config(String),

    #[error("No way to focus {target}. Set {options}.")]
    NoFocusMethod { target: &'static str, options: String },

    #[error("Image template not found: {}", .0.display())]
    TemplateMissing(PathBuf),

    #[error("{0}")]
    Usage(String),

    #[error("No window found with title containing: {0:?}")]
    WindowNotFound(String),

    #[error("Failed to activate window after {attempts} attempt(s): {last}")]
    Activation { attempts: u32, last: String },

    #[error("Could not focus {target}: {details}")]
    FocusFailed { target: &'static str, details: String },

    #[error("Command failed with exit code {code}\n\n{output}")]
    CommandFailed { code: i32, output: String },

    #[error("Command timed out after {secs}s\n\n{output}")]
    CommandTimedOut { secs: u64, output: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("platform call failed: {0}")]
    Platform(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform(message.into())
    }

    /// Errors the chat bridge may retry: the desktop may simply not be ready yet.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WindowNotFound(_)
                | Self::Activation { .. }
                | Self::FocusFailed { .. }
                | Self::Platform(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AgentError::WindowNotFound("Code".into()).is_transient());
        assert!(AgentError::FocusFailed { target: "input", details: "no match".into() }.is_transient());
        assert!(!AgentError::config("missing").is_transient());
        assert!(!AgentError::NoFocusMethod { target: "input", options: "X".into() }.is_transient());
        assert!(!AgentError::CommandFailed { code: 1, output: String::new() }.is_transient());
    }

    #[test]
    fn command_failure_message_carries_exit_code() {
        let err = AgentError::CommandFailed { code: 7, output: "boom".into() };
        assert_eq!(err.to_string(), "Command failed with exit code 7\n\nboom");
    }
}
