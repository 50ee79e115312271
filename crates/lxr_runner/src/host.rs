//! Host tool trait and types.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ToolError, ToolResult};

/// Result of one external tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Rendered command line (secrets redacted)
    pub command: String,
    /// Process exit code (-1 when killed by a signal)
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Invocation start time
    pub started_at: DateTime<Utc>,
    /// Invocation end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ToolOutput {
    /// Build an output record for an invocation that finished just now.
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`ToolError::Failed`].
    pub fn check(self) -> ToolResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                command: self.command,
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Ownership and mode applied to a file pushed into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOptions {
    pub perms: String,
    pub user: String,
    pub group: String,
}

impl PushOptions {
    /// Root-owned executable (`0755 root:root`).
    pub fn executable() -> Self {
        Self {
            perms: "0755".to_string(),
            user: "root".to_string(),
            group: "root".to_string(),
        }
    }
}

impl Default for PushOptions {
    fn default() -> Self {
        Self::executable()
    }
}

/// The container and image tools of a Proxmox host.
///
/// Each method maps to exactly one external command. Methods returning `()`
/// or listing text fail with [`ToolError::Failed`] on a non-zero exit; `status`
/// and `exec` hand the raw [`ToolOutput`] back because their exit code carries
/// meaning for the caller.
#[async_trait]
pub trait HostTools: Send + Sync {
    /// `pct create <id> <image_key> <options...>`
    async fn create(&self, id: u32, image_key: &str, options: &[String]) -> ToolResult<()>;

    /// `pct start <id>`
    async fn start(&self, id: u32) -> ToolResult<()>;

    /// `pct stop <id>`
    async fn stop(&self, id: u32) -> ToolResult<()>;

    /// `pct destroy <id>`
    async fn destroy(&self, id: u32) -> ToolResult<()>;

    /// `pct status <id>`
    async fn status(&self, id: u32) -> ToolResult<ToolOutput>;

    /// `pct list`, returned as the raw table.
    async fn list(&self) -> ToolResult<String>;

    /// `pct push <id> <local> <remote> --perms --user --group`
    async fn push(
        &self,
        id: u32,
        local: &Path,
        remote: &str,
        options: &PushOptions,
    ) -> ToolResult<()>;

    /// `pct exec <id> -- <command...>`
    async fn exec(&self, id: u32, command: &[String]) -> ToolResult<ToolOutput>;

    /// `pveam list <storage>`, returned as the raw table.
    async fn image_list(&self, storage: &str) -> ToolResult<String>;

    /// `pveam available --section <section>`, returned as the raw table.
    async fn image_list_online(&self, section: &str) -> ToolResult<String>;

    /// `pveam download <storage> <template>`
    async fn image_download(&self, storage: &str, template: &str) -> ToolResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_passes_success_through() {
        let output = ToolOutput::new("pct status 100", 0, "status: running\n", "");
        let checked = output.check().unwrap();
        assert_eq!(checked.stdout, "status: running\n");
    }

    #[test]
    fn test_check_converts_non_zero_exit() {
        let output = ToolOutput::new("pct start 100", 2, "", "CT 100 does not exist\n");
        match output.check() {
            Err(ToolError::Failed {
                command,
                exit_code,
                stderr,
            }) => {
                assert_eq!(command, "pct start 100");
                assert_eq!(exit_code, 2);
                assert!(stderr.contains("does not exist"));
            }
            other => panic!("Expected Failed error, got {:?}", other),
        }
    }
}
