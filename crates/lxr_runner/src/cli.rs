//! CLI-based host tools backed by `pct` and `pveam`.
//!
//! Tool locations are resolved once into [`ToolPaths`] and handed to
//! [`PveCli`]. Every invocation runs under a deadline and reports failures as
//! a single [`ToolError`] carrying the rendered command, exit code and stderr.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ToolError, ToolResult};
use crate::host::{HostTools, PushOptions, ToolOutput};

/// Upper bound on captured output per stream; older output is dropped first.
const CAPTURE_LIMIT: usize = 64 * 1024;

/// Options whose values must never reach logs or error messages.
const SECRET_OPTIONS: &[&str] = &["--password"];

/// Locations of the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub pct: PathBuf,
    pub pveam: PathBuf,
}

impl ToolPaths {
    /// Look up `pct` and `pveam` on `PATH`.
    pub fn resolve() -> ToolResult<Self> {
        Ok(Self {
            pct: find_tool("pct")?,
            pveam: find_tool("pveam")?,
        })
    }
}

/// Find an executable by name on `PATH`.
pub fn find_tool(name: &str) -> ToolResult<PathBuf> {
    let not_found = || ToolError::NotFound {
        tool: name.to_string(),
    };
    let path = std::env::var_os("PATH").ok_or_else(not_found)?;

    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_found)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Output stream of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// CLI-based host tool options.
#[derive(Debug, Clone)]
pub struct PveCliOptions {
    /// Deadline for every command except `pct exec` (None = wait forever)
    pub command_timeout: Option<Duration>,
    /// Deadline for `pct exec` (None = wait forever)
    pub exec_timeout: Option<Duration>,
    /// Forward `pct exec` output to our own stdout/stderr while it runs
    pub stream_exec: bool,
}

impl Default for PveCliOptions {
    fn default() -> Self {
        Self {
            command_timeout: Some(Duration::from_secs(300)),
            exec_timeout: None,
            stream_exec: true,
        }
    }
}

impl PveCliOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn exec_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn stream_exec(mut self, enabled: bool) -> Self {
        self.stream_exec = enabled;
        self
    }
}

/// Host tools implemented by shelling out to `pct` and `pveam`.
pub struct PveCli {
    paths: ToolPaths,
    options: PveCliOptions,
}

impl PveCli {
    pub fn new(paths: ToolPaths, options: PveCliOptions) -> Self {
        info!(
            "Using pct at {} and pveam at {}",
            paths.pct.display(),
            paths.pveam.display()
        );
        Self { paths, options }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    async fn pct(&self, args: Vec<String>) -> ToolResult<ToolOutput> {
        run_tool(&self.paths.pct, &args, self.options.command_timeout, false).await
    }

    async fn pveam(&self, args: Vec<String>) -> ToolResult<ToolOutput> {
        run_tool(&self.paths.pveam, &args, self.options.command_timeout, false).await
    }
}

fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[async_trait]
impl HostTools for PveCli {
    async fn create(&self, id: u32, image_key: &str, options: &[String]) -> ToolResult<()> {
        let mut cmd = args(["create".to_string(), id.to_string(), image_key.to_string()]);
        cmd.extend(options.iter().cloned());
        self.pct(cmd).await?.check()?;
        Ok(())
    }

    async fn start(&self, id: u32) -> ToolResult<()> {
        self.pct(args(["start".to_string(), id.to_string()]))
            .await?
            .check()?;
        Ok(())
    }

    async fn stop(&self, id: u32) -> ToolResult<()> {
        self.pct(args(["stop".to_string(), id.to_string()]))
            .await?
            .check()?;
        Ok(())
    }

    async fn destroy(&self, id: u32) -> ToolResult<()> {
        self.pct(args(["destroy".to_string(), id.to_string()]))
            .await?
            .check()?;
        Ok(())
    }

    async fn status(&self, id: u32) -> ToolResult<ToolOutput> {
        self.pct(args(["status".to_string(), id.to_string()])).await
    }

    async fn list(&self) -> ToolResult<String> {
        Ok(self.pct(args(["list"])).await?.check()?.stdout)
    }

    async fn push(
        &self,
        id: u32,
        local: &Path,
        remote: &str,
        options: &PushOptions,
    ) -> ToolResult<()> {
        let cmd = args([
            "push".to_string(),
            id.to_string(),
            local.to_string_lossy().into_owned(),
            remote.to_string(),
            "--perms".to_string(),
            options.perms.clone(),
            "--user".to_string(),
            options.user.clone(),
            "--group".to_string(),
            options.group.clone(),
        ]);
        self.pct(cmd).await?.check()?;
        Ok(())
    }

    async fn exec(&self, id: u32, command: &[String]) -> ToolResult<ToolOutput> {
        let mut cmd = args(["exec".to_string(), id.to_string(), "--".to_string()]);
        cmd.extend(command.iter().cloned());
        run_tool(
            &self.paths.pct,
            &cmd,
            self.options.exec_timeout,
            self.options.stream_exec,
        )
        .await
    }

    async fn image_list(&self, storage: &str) -> ToolResult<String> {
        Ok(self.pveam(args(["list", storage])).await?.check()?.stdout)
    }

    async fn image_list_online(&self, section: &str) -> ToolResult<String> {
        Ok(self
            .pveam(args(["available", "--section", section]))
            .await?
            .check()?
            .stdout)
    }

    async fn image_download(&self, storage: &str, template: &str) -> ToolResult<()> {
        info!("Downloading template {} into {}", template, storage);
        self.pveam(args(["download", storage, template]))
            .await?
            .check()?;
        Ok(())
    }
}

/// Render a command line for logs and errors, redacting secret option values.
pub fn render_command(program: &Path, args: &[String]) -> String {
    let mut words = vec![program.to_string_lossy().into_owned()];
    let mut redact_next = false;
    for arg in args {
        if redact_next {
            words.push("********".to_string());
            redact_next = false;
        } else {
            redact_next = SECRET_OPTIONS.contains(&arg.as_str());
            words.push(arg.clone());
        }
    }
    shell_words::join(words)
}

/// Run one external command to completion under an optional deadline.
///
/// The child is killed when the deadline passes or the future is dropped.
/// With `stream` set, output lines are echoed to our stdout/stderr as they
/// arrive; either way the tail of each stream is captured.
pub async fn run_tool(
    program: &Path,
    args: &[String],
    deadline: Option<Duration>,
    stream: bool,
) -> ToolResult<ToolOutput> {
    let command = render_command(program, args);
    debug!("Executing: {}", command);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            command: command.clone(),
            source,
        })?;

    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(capture(out, stream.then_some(LogStream::Stdout))));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(capture(err, stream.then_some(LogStream::Stderr))));

    let started_at = Utc::now();
    let clock = Instant::now();

    let status = match deadline {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!("Killing `{}` after {}s", command, limit.as_secs());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill `{}`: {}", command, e);
                }
                return Err(ToolError::Timeout {
                    command,
                    seconds: limit.as_secs(),
                });
            }
        },
        None => child.wait().await?,
    };

    let stdout = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    let exit_code = status.code().unwrap_or(-1);
    debug!("`{}` exited with {} after {:?}", command, exit_code, clock.elapsed());

    Ok(ToolOutput {
        command,
        exit_code,
        stdout,
        stderr,
        started_at,
        finished_at: Utc::now(),
        duration_ms: clock.elapsed().as_millis() as u64,
    })
}

async fn capture<R>(reader: R, echo: Option<LogStream>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    let mut captured = String::new();

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&raw);
                let text: &str = &text;
                let line = text.strip_suffix('\n').unwrap_or(text);
                let line = line.strip_suffix('\r').unwrap_or(line);
                match echo {
                    Some(LogStream::Stdout) => println!("{}", line),
                    Some(LogStream::Stderr) => eprintln!("{}", line),
                    None => {}
                }
                captured.push_str(line);
                captured.push('\n');
                truncate_front(&mut captured, CAPTURE_LIMIT);
            }
            Err(e) => {
                // Keep the pipe open until EOF so the child never sees EPIPE.
                debug!("Reading child output failed: {}", e);
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    debug!("Draining child output failed: {}", e);
                }
                break;
            }
        }
    }

    captured
}

fn truncate_front(buffer: &mut String, limit: usize) {
    if buffer.len() <= limit {
        return;
    }
    let excess = buffer.len() - limit;
    let cut = buffer
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= excess)
        .unwrap_or(buffer.len());
    buffer.drain(..cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_command_redacts_password() {
        let rendered = render_command(
            Path::new("/usr/sbin/pct"),
            &args([
                "create",
                "100",
                "local:vztmpl/x.tar.zst",
                "--password",
                "hunter2",
                "--hostname",
                "lxc-runner-100",
            ]),
        );

        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("--password '********'") || rendered.contains("--password ********"));
        assert!(rendered.contains("--hostname lxc-runner-100"));
    }

    #[test]
    fn test_render_command_quotes_spaces() {
        let rendered = render_command(
            Path::new("pct"),
            &args(["create", "1", "k", "--description", "GitLab LXC Runner 1"]),
        );
        assert_eq!(
            rendered,
            "pct create 1 k --description 'GitLab LXC Runner 1'"
        );
    }

    #[test]
    fn test_truncate_front_keeps_tail() {
        let mut buffer = "abcdefghij".to_string();
        truncate_front(&mut buffer, 4);
        assert_eq!(buffer, "ghij");

        let mut short = "abc".to_string();
        truncate_front(&mut short, 4);
        assert_eq!(short, "abc");
    }

    #[test]
    fn test_truncate_front_respects_char_boundaries() {
        let mut buffer = "ééé".to_string(); // 6 bytes
        truncate_front(&mut buffer, 3);
        assert_eq!(buffer, "é");
    }

    #[test]
    fn test_find_tool_missing() {
        match find_tool("definitely-not-a-real-tool-lxr") {
            Err(ToolError::NotFound { tool }) => assert_eq!(tool, "definitely-not-a-real-tool-lxr"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_find_tool_on_path() {
        let sh = find_tool("sh").unwrap();
        assert!(sh.ends_with("sh"));
    }

    #[test]
    fn test_options_builder() {
        let options = PveCliOptions::new()
            .command_timeout(Some(Duration::from_secs(10)))
            .exec_timeout(Some(Duration::from_secs(3600)))
            .stream_exec(false);

        assert_eq!(options.command_timeout, Some(Duration::from_secs(10)));
        assert_eq!(options.exec_timeout, Some(Duration::from_secs(3600)));
        assert!(!options.stream_exec);
    }
}
