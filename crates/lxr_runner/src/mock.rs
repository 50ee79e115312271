//! Mock host for testing.
//!
//! Simulates the container registry and template storage of a Proxmox host
//! in memory, so lifecycle code can be exercised without `pct`/`pveam`.
//! Every call is captured for later verification.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{ToolError, ToolResult};
use crate::host::{HostTools, PushOptions, ToolOutput};

/// Exit code `pct` uses when a container does not exist.
const MISSING_EXIT_CODE: i32 = 2;

/// A simulated container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContainer {
    pub name: String,
    pub running: bool,
    pub lock: Option<String>,
}

impl MockContainer {
    pub fn stopped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: false,
            lock: None,
        }
    }

    pub fn running(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: true,
            lock: None,
        }
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCall {
    pub method: String,
    pub id: Option<u32>,
    pub args: Vec<String>,
}

/// A pushed file as seen inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedFile {
    pub local: PathBuf,
    pub options: PushOptions,
}

/// In-memory stand-in for the host tools.
#[derive(Clone, Default)]
pub struct MockHost {
    containers: Arc<RwLock<BTreeMap<u32, MockContainer>>>,
    /// storage -> fully qualified keys
    images: Arc<RwLock<BTreeMap<String, BTreeSet<String>>>>,
    catalog: Arc<RwLock<Vec<(String, String)>>>,
    /// Number of failed readiness checks before the target turns active.
    /// `None` means it never does.
    ready_after: Arc<RwLock<Option<u32>>>,
    /// Readiness checks never return.
    readiness_hangs: Arc<RwLock<bool>>,
    readiness_checks: Arc<RwLock<HashMap<u32, u32>>>,
    pushed: Arc<RwLock<HashMap<(u32, String), PushedFile>>>,
    /// remote path -> exit code of running it
    script_exit_codes: Arc<RwLock<HashMap<String, i32>>>,
    /// (method, id) pairs that fail; `None` fails every id
    failures: Arc<RwLock<Vec<(String, Option<u32>)>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
}

impl MockHost {
    /// Create an empty host whose containers become ready immediately.
    pub fn new() -> Self {
        let host = Self::default();
        *host.ready_after.write() = Some(0);
        host
    }

    /// Add an existing container.
    pub fn with_container(self, id: u32, container: MockContainer) -> Self {
        self.containers.write().insert(id, container);
        self
    }

    /// Add a template already cached in `storage`.
    pub fn with_local_image(self, storage: &str, template: &str) -> Self {
        self.images
            .write()
            .entry(storage.to_string())
            .or_default()
            .insert(format!("{}:vztmpl/{}", storage, template));
        self
    }

    /// Add a template to the online catalog.
    pub fn with_catalog_entry(self, section: &str, template: &str) -> Self {
        self.catalog
            .write()
            .push((section.to_string(), template.to_string()));
        self
    }

    /// Readiness checks fail `checks` times before succeeding.
    pub fn ready_after(self, checks: u32) -> Self {
        *self.ready_after.write() = Some(checks);
        self
    }

    /// Readiness checks never succeed.
    pub fn never_ready(self) -> Self {
        *self.ready_after.write() = None;
        self
    }

    /// Readiness checks block forever, like `pct exec` on a wedged container.
    pub fn hang_readiness(self) -> Self {
        *self.readiness_hangs.write() = true;
        self
    }

    /// Running `remote_path` inside any container exits with `code`.
    pub fn script_exit_code(self, remote_path: &str, code: i32) -> Self {
        self.script_exit_codes
            .write()
            .insert(remote_path.to_string(), code);
        self
    }

    /// Make `method` fail for `id` (or for every id with `None`).
    pub fn fail_on(self, method: &str, id: Option<u32>) -> Self {
        self.failures.write().push((method.to_string(), id));
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls
            .read()
            .iter()
            .any(|c| c.method == method)
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Snapshot of a container's simulated state.
    pub fn container(&self, id: u32) -> Option<MockContainer> {
        self.containers.read().get(&id).cloned()
    }

    /// Whether `template` is cached in `storage`.
    pub fn has_image(&self, storage: &str, template: &str) -> bool {
        self.images
            .read()
            .get(storage)
            .is_some_and(|keys| keys.contains(&format!("{}:vztmpl/{}", storage, template)))
    }

    /// The file pushed to `remote` in container `id`, if any.
    pub fn pushed_file(&self, id: u32, remote: &str) -> Option<PushedFile> {
        self.pushed.read().get(&(id, remote.to_string())).cloned()
    }

    /// Number of readiness checks made against container `id`.
    pub fn readiness_checks(&self, id: u32) -> u32 {
        self.readiness_checks.read().get(&id).copied().unwrap_or(0)
    }

    fn record_call(&self, method: &str, id: Option<u32>, args: Vec<String>) {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            id,
            args,
        });
    }

    fn check_failure(&self, method: &str, id: Option<u32>) -> ToolResult<()> {
        let fails = self
            .failures
            .read()
            .iter()
            .any(|(m, target)| m == method && (target.is_none() || *target == id));
        if fails {
            return Err(ToolError::Failed {
                command: command_line(method, id),
                exit_code: 255,
                stderr: format!("simulated {} failure", method),
            });
        }
        Ok(())
    }

    fn missing(method: &str, id: u32) -> ToolError {
        ToolError::Failed {
            command: command_line(method, Some(id)),
            exit_code: MISSING_EXIT_CODE,
            stderr: format!("Configuration file 'nodes/pve/lxc/{}.conf' does not exist", id),
        }
    }
}

fn command_line(method: &str, id: Option<u32>) -> String {
    match id {
        Some(id) => format!("mock {} {}", method, id),
        None => format!("mock {}", method),
    }
}

fn option_value(options: &[String], name: &str) -> Option<String> {
    options
        .iter()
        .position(|o| o == name)
        .and_then(|i| options.get(i + 1))
        .cloned()
}

#[async_trait]
impl HostTools for MockHost {
    async fn create(&self, id: u32, image_key: &str, options: &[String]) -> ToolResult<()> {
        let mut args = vec![image_key.to_string()];
        args.extend(options.iter().cloned());
        self.record_call("create", Some(id), args);
        self.check_failure("create", Some(id))?;

        if self.containers.read().contains_key(&id) {
            return Err(ToolError::Failed {
                command: command_line("create", Some(id)),
                exit_code: 255,
                stderr: format!("CT {} already exists on node 'pve'", id),
            });
        }

        let image_known = self
            .images
            .read()
            .values()
            .any(|keys| keys.contains(image_key));
        if !image_known {
            return Err(ToolError::Failed {
                command: command_line("create", Some(id)),
                exit_code: 255,
                stderr: format!("volume '{}' does not exist", image_key),
            });
        }

        let name = option_value(options, "--hostname").unwrap_or_else(|| format!("CT{}", id));
        self.containers
            .write()
            .insert(id, MockContainer::stopped(name));
        Ok(())
    }

    async fn start(&self, id: u32) -> ToolResult<()> {
        self.record_call("start", Some(id), Vec::new());
        self.check_failure("start", Some(id))?;

        match self.containers.write().get_mut(&id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(Self::missing("start", id)),
        }
    }

    async fn stop(&self, id: u32) -> ToolResult<()> {
        self.record_call("stop", Some(id), Vec::new());
        self.check_failure("stop", Some(id))?;

        match self.containers.write().get_mut(&id) {
            Some(container) => {
                container.running = false;
                Ok(())
            }
            None => Err(Self::missing("stop", id)),
        }
    }

    async fn destroy(&self, id: u32) -> ToolResult<()> {
        self.record_call("destroy", Some(id), Vec::new());
        self.check_failure("destroy", Some(id))?;

        let mut containers = self.containers.write();
        match containers.get(&id) {
            Some(container) if container.running => Err(ToolError::Failed {
                command: command_line("destroy", Some(id)),
                exit_code: 255,
                stderr: format!("CT {} is running - destroy failed", id),
            }),
            Some(_) => {
                containers.remove(&id);
                self.readiness_checks.write().remove(&id);
                Ok(())
            }
            None => Err(Self::missing("destroy", id)),
        }
    }

    async fn status(&self, id: u32) -> ToolResult<ToolOutput> {
        self.record_call("status", Some(id), Vec::new());
        self.check_failure("status", Some(id))?;

        let command = command_line("status", Some(id));
        Ok(match self.containers.read().get(&id) {
            Some(c) if c.running => ToolOutput::new(command, 0, "status: running\n", ""),
            Some(_) => ToolOutput::new(command, 0, "status: stopped\n", ""),
            None => {
                let err = Self::missing("status", id);
                ToolOutput::new(command, MISSING_EXIT_CODE, "", err.to_string())
            }
        })
    }

    async fn list(&self) -> ToolResult<String> {
        self.record_call("list", None, Vec::new());
        self.check_failure("list", None)?;

        let mut out = String::from("VMID       Status     Lock         Name\n");
        for (id, c) in self.containers.read().iter() {
            let status = if c.running { "running" } else { "stopped" };
            out.push_str(&format!(
                "{:<10} {:<10} {:<12} {}\n",
                id,
                status,
                c.lock.as_deref().unwrap_or(""),
                c.name
            ));
        }
        Ok(out)
    }

    async fn push(
        &self,
        id: u32,
        local: &Path,
        remote: &str,
        options: &PushOptions,
    ) -> ToolResult<()> {
        self.record_call(
            "push",
            Some(id),
            vec![local.to_string_lossy().into_owned(), remote.to_string()],
        );
        self.check_failure("push", Some(id))?;

        match self.containers.read().get(&id) {
            Some(c) if c.running => {}
            Some(_) => {
                return Err(ToolError::Failed {
                    command: command_line("push", Some(id)),
                    exit_code: 255,
                    stderr: format!("CT {} not running", id),
                })
            }
            None => return Err(Self::missing("push", id)),
        }
        if !local.is_file() {
            return Err(ToolError::Failed {
                command: command_line("push", Some(id)),
                exit_code: 2,
                stderr: format!("can't open '{}'", local.display()),
            });
        }

        self.pushed.write().insert(
            (id, remote.to_string()),
            PushedFile {
                local: local.to_path_buf(),
                options: options.clone(),
            },
        );
        Ok(())
    }

    async fn exec(&self, id: u32, command: &[String]) -> ToolResult<ToolOutput> {
        self.record_call("exec", Some(id), command.to_vec());
        self.check_failure("exec", Some(id))?;

        let rendered = command_line("exec", Some(id));
        match self.containers.read().get(&id) {
            Some(c) if c.running => {}
            Some(_) => {
                return Ok(ToolOutput::new(rendered, 255, "", format!("CT {} not running", id)))
            }
            None => return Err(Self::missing("exec", id)),
        }

        if command.first().map(String::as_str) == Some("systemctl") {
            let ready = {
                let mut checks = self.readiness_checks.write();
                let attempt = checks.entry(id).or_insert(0);
                let ready = matches!(*self.ready_after.read(), Some(n) if *attempt >= n);
                *attempt += 1;
                ready
            };
            if *self.readiness_hangs.read() {
                std::future::pending::<()>().await;
            }
            let code = if ready { 0 } else { 3 };
            return Ok(ToolOutput::new(rendered, code, "", ""));
        }

        let path = command.first().cloned().unwrap_or_default();
        if !self.pushed.read().contains_key(&(id, path.clone())) {
            return Ok(ToolOutput::new(
                rendered,
                127,
                "",
                format!("{}: not found", path),
            ));
        }
        let code = self
            .script_exit_codes
            .read()
            .get(&path)
            .copied()
            .unwrap_or(0);
        Ok(ToolOutput::new(rendered, code, "", ""))
    }

    async fn image_list(&self, storage: &str) -> ToolResult<String> {
        self.record_call("image_list", None, vec![storage.to_string()]);
        self.check_failure("image_list", None)?;

        let mut out = String::from("NAME                                                         SIZE\n");
        if let Some(keys) = self.images.read().get(storage) {
            for key in keys {
                out.push_str(&format!("{:<60} 120.29MB\n", key));
            }
        }
        Ok(out)
    }

    async fn image_list_online(&self, section: &str) -> ToolResult<String> {
        self.record_call("image_list_online", None, vec![section.to_string()]);
        self.check_failure("image_list_online", None)?;

        let mut out = String::from("SECTION    TEMPLATE\n");
        for (s, template) in self.catalog.read().iter().filter(|(s, _)| s == section) {
            out.push_str(&format!("{:<10} {}\n", s, template));
        }
        Ok(out)
    }

    async fn image_download(&self, storage: &str, template: &str) -> ToolResult<()> {
        self.record_call(
            "image_download",
            None,
            vec![storage.to_string(), template.to_string()],
        );
        self.check_failure("image_download", None)?;

        self.images
            .write()
            .entry(storage.to_string())
            .or_default()
            .insert(format!("{}:vztmpl/{}", storage, template));
        Ok(())
    }
}
