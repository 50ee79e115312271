//! Container specification and its resolution from flags and job context.
//!
//! Each field resolves independently: an explicit flag wins, then the job's
//! `CUSTOM_ENV_*` variable (unless suppressed), then the host default.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::settings::ContainerSettings;

/// Job context variables, as GitLab exposes them to a custom executor.
pub mod vars {
    pub const JOB_ID: &str = "CUSTOM_ENV_CI_JOB_ID";
    pub const JOB_IMAGE: &str = "CUSTOM_ENV_CI_JOB_IMAGE";
    /// `storage:` from the job's variables.
    pub const STORAGE: &str = "CUSTOM_ENV_storage";
    /// Fallback for [`STORAGE`], consulted only when it is unset.
    pub const LXC_STORAGE: &str = "CUSTOM_ENV_LXC_STORAGE";
    pub const CORES: &str = "CUSTOM_ENV_LXC_CORES";
    pub const MEMORY: &str = "CUSTOM_ENV_LXC_MEMORY";
    pub const PASSWORD: &str = "CUSTOM_ENV_LXC_PASSWORD";
    pub const JOB_URL: &str = "CUSTOM_ENV_CI_JOB_URL";
    pub const PIPELINE_URL: &str = "CUSTOM_ENV_CI_PIPELINE_URL";
    pub const PROJECT_URL: &str = "CUSTOM_ENV_CI_PROJECT_URL";
    pub const MR_PROJECT_URL: &str = "CUSTOM_ENV_CI_MERGE_REQUEST_PROJECT_URL";
    pub const MR_IID: &str = "CUSTOM_ENV_CI_MERGE_REQUEST_IID";
}

/// Directory segment under which storages keep container templates.
pub const TEMPLATE_SEGMENT: &str = "vztmpl";

/// A snapshot of environment variables.
#[derive(Debug, Clone, Default)]
pub struct JobEnv {
    vars: HashMap<String, String>,
}

impl JobEnv {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of `name`; empty values count as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str) -> OrchestratorResult<Option<T>> {
        self.get(name)
            .map(|raw| {
                raw.parse().map_err(|_| {
                    OrchestratorError::InvalidConfig(format!("{}={:?} is not a number", name, raw))
                })
            })
            .transpose()
    }
}

/// Links describing the job that owns a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobContext {
    pub job_id: Option<String>,
    pub job_url: Option<String>,
    pub pipeline_url: Option<String>,
    pub project_url: Option<String>,
    pub merge_request_url: Option<String>,
}

impl JobContext {
    pub fn from_env(env: &JobEnv) -> Self {
        let owned = |name: &str| env.get(name).map(str::to_string);
        let merge_request_url = match (env.get(vars::MR_PROJECT_URL), env.get(vars::MR_IID)) {
            (Some(project), Some(iid)) => Some(format!(
                "{}/-/merge_requests/{}",
                project.trim_end_matches('/'),
                iid
            )),
            _ => None,
        };

        Self {
            job_id: owned(vars::JOB_ID),
            job_url: owned(vars::JOB_URL),
            pipeline_url: owned(vars::PIPELINE_URL),
            project_url: owned(vars::PROJECT_URL),
            merge_request_url,
        }
    }

    /// Container description: a title line followed by one line per known link.
    pub fn describe(&self, id: u32) -> String {
        let mut lines = vec![format!("GitLab LXC Runner {}", id)];
        let links = [
            ("Job", &self.job_url),
            ("Pipeline", &self.pipeline_url),
            ("Project", &self.project_url),
            ("Merge request", &self.merge_request_url),
        ];
        for (label, url) in links {
            if let Some(url) = url {
                lines.push(format!("{}: {}", label, url));
            }
        }
        lines.join("\n")
    }
}

/// A template in a storage, addressed as `storage:vztmpl/template`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub storage: String,
    pub template: String,
}

impl ImageReference {
    pub fn new(storage: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            storage: storage.into(),
            template: template.into(),
        }
    }

    /// Fully qualified key as listed by `pveam list`.
    pub fn key(&self) -> String {
        format!("{}:{}/{}", self.storage, TEMPLATE_SEGMENT, self.template)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Root password that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct RootPassword(String);

impl RootPassword {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RootPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootPassword(********)")
    }
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub id: u32,
    pub image: ImageReference,
    pub hostname: String,
    pub cores: Option<u32>,
    pub memory_mb: Option<u32>,
    pub disk_gb: u32,
    pub password: Option<RootPassword>,
    pub timezone: String,
    pub nesting: bool,
    pub unprivileged: bool,
    pub description: String,
    pub rootfs_storage: String,
    pub network: String,
}

impl ContainerSpec {
    /// Storage bucket the image is taken from.
    pub fn storage(&self) -> &str {
        &self.image.storage
    }

    /// Options for `pct create`, omitting every field that was not resolved.
    pub fn create_options(&self) -> Vec<String> {
        let flag = |on: bool| if on { "1" } else { "0" };
        let mut options = vec![
            "--hostname".to_string(),
            self.hostname.clone(),
            "--description".to_string(),
            self.description.clone(),
            "--rootfs".to_string(),
            format!("volume={}:{}", self.rootfs_storage, self.disk_gb),
            "--net0".to_string(),
            self.network.clone(),
            "--unprivileged".to_string(),
            flag(self.unprivileged).to_string(),
            "--features".to_string(),
            format!("nesting={}", flag(self.nesting)),
            "--timezone".to_string(),
            self.timezone.clone(),
        ];

        if let Some(cores) = self.cores {
            options.push("--cores".to_string());
            options.push(cores.to_string());
        }
        if let Some(memory) = self.memory_mb {
            options.push("--memory".to_string());
            options.push(memory.to_string());
        }
        if let Some(password) = &self.password {
            options.push("--password".to_string());
            options.push(password.expose().to_string());
        }

        options
    }
}

/// Explicit command-line values for `prepare`.
#[derive(Debug, Clone, Default)]
pub struct PrepareFlags {
    pub id: Option<u32>,
    pub storage: Option<String>,
    pub image: Option<String>,
    /// Ignore the job's image and storage variables
    pub no_image_env: bool,
    pub cores: Option<u32>,
    pub memory_mb: Option<u32>,
    pub disk_gb: Option<u32>,
    pub hostname_prefix: Option<String>,
    pub password: Option<String>,
}

/// Merges flags, job environment and host defaults into a [`ContainerSpec`].
pub struct ConfigResolver<'a> {
    defaults: &'a ContainerSettings,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(defaults: &'a ContainerSettings) -> Self {
        Self { defaults }
    }

    /// The container identifier from `--id` or the job id variable.
    pub fn resolve_id(flag: Option<u32>, env: &JobEnv) -> OrchestratorResult<u32> {
        let id = match flag {
            Some(id) => id,
            None => {
                let raw = env.get(vars::JOB_ID).ok_or_else(|| {
                    OrchestratorError::ConfigUnresolved(format!(
                        "provide --id or set {}",
                        vars::JOB_ID
                    ))
                })?;
                raw.parse().map_err(|_| {
                    OrchestratorError::ConfigUnresolved(format!(
                        "{}={:?} is not a valid container id",
                        vars::JOB_ID,
                        raw
                    ))
                })?
            }
        };

        if id == 0 {
            return Err(OrchestratorError::ConfigUnresolved(
                "container id must be positive".to_string(),
            ));
        }
        Ok(id)
    }

    /// Resolve the full container specification.
    pub fn resolve(&self, flags: &PrepareFlags, env: &JobEnv) -> OrchestratorResult<ContainerSpec> {
        let id = Self::resolve_id(flags.id, env)?;
        let image_env = |name: &str| {
            if flags.no_image_env {
                None
            } else {
                env.get(name).map(str::to_string)
            }
        };

        let storage = flags
            .storage
            .clone()
            .or_else(|| image_env(vars::STORAGE))
            .or_else(|| image_env(vars::LXC_STORAGE))
            .unwrap_or_else(|| self.defaults.default_storage.clone());

        let template = match flags.image.clone().or_else(|| image_env(vars::JOB_IMAGE)) {
            Some(template) => template,
            None => {
                warn!("Using default image {}", self.defaults.default_image);
                self.defaults.default_image.clone()
            }
        };

        let cores = match flags.cores {
            Some(cores) => Some(cores),
            None => env.parse(vars::CORES)?,
        };
        let memory_mb = match flags.memory_mb {
            Some(memory) => Some(memory),
            None => env.parse(vars::MEMORY)?,
        };
        let password = flags
            .password
            .clone()
            .or_else(|| env.get(vars::PASSWORD).map(str::to_string))
            .map(RootPassword::new);

        let prefix = flags
            .hostname_prefix
            .as_deref()
            .unwrap_or(&self.defaults.hostname_prefix);

        Ok(ContainerSpec {
            id,
            image: ImageReference::new(storage, template),
            hostname: format!("{}{}", prefix, id),
            cores,
            memory_mb,
            disk_gb: flags.disk_gb.unwrap_or(self.defaults.disk_gb),
            password,
            timezone: self.defaults.timezone.clone(),
            nesting: self.defaults.nesting,
            unprivileged: self.defaults.unprivileged,
            description: JobContext::from_env(env).describe(id),
            rootfs_storage: self.defaults.rootfs_storage.clone(),
            network: self.defaults.network.clone(),
        })
    }
}
