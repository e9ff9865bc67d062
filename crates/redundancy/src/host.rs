//! Process and service control on the router host.
//!
//! Everything the controller does to the operating system goes through
//! [`HostControl`], so transitions can be exercised against a recording
//! double in tests.

use async_trait::async_trait;
use common::{Error, Result};
use std::fmt;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// Init-system action on a named service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Reload => "reload",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, None when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful, silent run
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    /// A failed run with the given code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Operations the controller needs from the host
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostControl: Send + Sync {
    /// Run a program to completion and capture its output.
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Apply an init-system action to a service.
    async fn service(&self, name: &str, action: ServiceAction) -> Result<CommandOutput>;

    /// Whether a process whose command line matches `pattern` is running.
    async fn process_running(&self, pattern: &str) -> bool;

    /// Mount a tmpfs on `path` unless something is already mounted there.
    async fn mount_tmpfs(&self, path: &Path) -> Result<CommandOutput>;

    /// Unmount the tmpfs on `path`; a no-op when nothing is mounted.
    async fn umount_tmpfs(&self, path: &Path) -> Result<CommandOutput>;

    /// Create a directory (and parents) with the given mode.
    async fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Remove a file; a missing file is not an error.
    async fn remove_file(&self, path: &Path) -> Result<()>;
}

/// [`HostControl`] backed by the real system tools
#[derive(Debug, Clone)]
pub struct SystemHost {
    /// Path of the mount table used to detect existing mounts
    mounts_file: String,

    /// Size option passed to the tmpfs mount
    tmpfs_size: String,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self {
            mounts_file: String::from("/proc/mounts"),
            tmpfs_size: String::from("512k"),
        }
    }
}

impl SystemHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tmpfs size option (e.g. "1m")
    pub fn with_tmpfs_size(mut self, size: impl Into<String>) -> Self {
        self.tmpfs_size = size.into();
        self
    }

    async fn is_mounted(&self, path: &Path) -> bool {
        let Ok(mounts) = tokio::fs::read_to_string(&self.mounts_file).await else {
            return false;
        };
        let target = path.to_string_lossy();
        mounts
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|mount_point| mount_point == target)
    }
}

#[async_trait]
impl HostControl for SystemHost {
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(program, ?args, "Executing command");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::command(format!("failed to spawn {}: {}", program, e)))?;

        let output = CommandOutput::from(output);
        if !output.success() {
            debug!(program, code = ?output.code, stderr = %output.stderr.trim(), "Command failed");
        }
        Ok(output)
    }

    async fn service(&self, name: &str, action: ServiceAction) -> Result<CommandOutput> {
        self.execute("systemctl", &[action.to_string(), name.to_string()])
            .await
    }

    async fn process_running(&self, pattern: &str) -> bool {
        match self
            .execute("pgrep", &["-f".to_string(), pattern.to_string()])
            .await
        {
            Ok(output) => output.success(),
            Err(e) => {
                warn!(pattern, error = %e, "Unable to query process table");
                false
            }
        }
    }

    async fn mount_tmpfs(&self, path: &Path) -> Result<CommandOutput> {
        if self.is_mounted(path).await {
            debug!(path = %path.display(), "tmpfs already mounted");
            return Ok(CommandOutput::ok());
        }
        self.execute(
            "mount",
            &[
                "-t".to_string(),
                "tmpfs".to_string(),
                "-o".to_string(),
                format!("size={}", self.tmpfs_size),
                "tmpfs".to_string(),
                path.to_string_lossy().into_owned(),
            ],
        )
        .await
    }

    async fn umount_tmpfs(&self, path: &Path) -> Result<CommandOutput> {
        if !self.is_mounted(path).await {
            return Ok(CommandOutput::ok());
        }
        self.execute("umount", &[path.to_string_lossy().into_owned()])
            .await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        match std::fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
