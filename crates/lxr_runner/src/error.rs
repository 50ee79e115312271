//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for tool invocations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors that can occur while invoking `pct` or `pveam`.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Required tool not found on PATH: {tool}")]
    NotFound { tool: String },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {exit_code}: {}", last_line(.stderr))]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("`{command}` did not finish within {seconds} seconds")]
    Timeout { command: String, seconds: u64 },

    #[error("Malformed {listing} line: {line:?}")]
    MalformedListing { listing: &'static str, line: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Exit code of the failed command, when it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

fn last_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no diagnostic output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_message_uses_last_stderr_line() {
        let err = ToolError::Failed {
            command: "pct create 100".to_string(),
            exit_code: 255,
            stderr: "warning: something\nCT 100 already exists\n\n".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("code 255"));
        assert!(msg.ends_with("CT 100 already exists"));
        assert_eq!(err.exit_code(), Some(255));
    }

    #[test]
    fn test_failed_message_without_stderr() {
        let err = ToolError::Failed {
            command: "pveam download local x".to_string(),
            exit_code: 1,
            stderr: String::new(),
        };

        assert!(err.to_string().contains("no diagnostic output"));
    }
}
