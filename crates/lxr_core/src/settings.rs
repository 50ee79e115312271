//! Host-level settings.
//!
//! Settings describe the Proxmox host rather than the job: where root
//! filesystems live, which bridge to attach, how long to wait. They load from
//! an optional TOML file; every key has a default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Settings file consulted when no path is given explicitly.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/lxc-runner/config.toml";

/// Provisioning script looked up next to the binary when not configured.
pub const PROVISION_SCRIPT_NAME: &str = "provisioning.sh";

/// All settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub container: ContainerSettings,
    pub readiness: ReadinessSettings,
    pub stages: StageSettings,
    pub tools: ToolSettings,
    pub cleanup: CleanupSettings,
}

/// Defaults applied to every container this host creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Storage holding container root filesystems
    pub rootfs_storage: String,
    /// Value of `--net0`
    pub network: String,
    pub hostname_prefix: String,
    /// Substring identifying containers created by this runner
    pub name_marker: String,
    pub default_image: String,
    pub default_storage: String,
    pub disk_gb: u32,
    pub timezone: String,
    pub nesting: bool,
    pub unprivileged: bool,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            rootfs_storage: "local-zfs".to_string(),
            network: "name=eth0,bridge=vmbr0,ip=dhcp".to_string(),
            hostname_prefix: "lxc-runner-".to_string(),
            name_marker: "lxc-runner".to_string(),
            default_image: "ubuntu-22.04-standard_22.04-1_amd64.tar.zst".to_string(),
            default_storage: "local".to_string(),
            disk_gb: 10,
            timezone: "host".to_string(),
            nesting: true,
            unprivileged: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    /// systemd target that signals a booted container
    pub target: String,
    /// Number of checks before giving up
    pub timeout_secs: u32,
    pub interval_ms: u64,
    /// Deadline for a single check
    pub check_timeout_secs: u64,
    /// Abort `prepare` when the target never becomes active
    pub fail_on_timeout: bool,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            target: "multi-user.target".to_string(),
            timeout_secs: 60,
            interval_ms: 1000,
            check_timeout_secs: 10,
            fail_on_timeout: true,
        }
    }
}

impl ReadinessSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Directory inside the container that holds stage scripts
    pub directory: String,
    pub provision_script: Option<PathBuf>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            directory: "/usr/local/bin".to_string(),
            provision_script: None,
        }
    }
}

impl StageSettings {
    /// Configured provisioning script, or `provisioning.sh` next to the binary.
    pub fn provision_script(&self) -> OrchestratorResult<PathBuf> {
        if let Some(path) = &self.provision_script {
            return Ok(path.clone());
        }
        let exe = std::env::current_exe().map_err(|e| {
            OrchestratorError::InvalidConfig(format!("cannot locate own executable: {}", e))
        })?;
        let dir = exe.parent().ok_or_else(|| {
            OrchestratorError::InvalidConfig(format!("{} has no parent directory", exe.display()))
        })?;
        Ok(dir.join(PROVISION_SCRIPT_NAME))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Deadline for `pct`/`pveam` commands (0 = none)
    pub command_timeout_secs: u64,
    /// Deadline for `pct exec` (0 = none)
    pub exec_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: 300,
            exec_timeout_secs: 0,
        }
    }
}

impl ToolSettings {
    pub fn command_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.command_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.exec_timeout_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    /// Extra attempts for `pct destroy` after a failure
    pub destroy_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            destroy_retries: 0,
            retry_delay_ms: 2000,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(content: &str, origin: &Path) -> OrchestratorResult<Self> {
        toml::from_str(content).map_err(|e| OrchestratorError::Settings {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read settings from a file.
    pub fn from_file(path: &Path) -> OrchestratorResult<Self> {
        debug!("Reading settings from {:?}", path);
        let content = fs::read_to_string(path).map_err(|e| OrchestratorError::Settings {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content, path)
    }

    /// Load from `path` if given, else from the default location when it
    /// exists, else fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> OrchestratorResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_SETTINGS_PATH);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    debug!("No settings file found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }
}
