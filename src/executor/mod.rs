// file: src/executor/mod.rs
// version: 2.0.0
// guid: exec0001-2345-6789-abcd-ef0123456789

//! External process execution
//!
//! Every tool the installer drives (`sgdisk`, `zpool`, `zfs`, `debootstrap`,
//! `rsync`, `chroot`, ...) is reached through [`CommandExecutor`]. The
//! installer logic only decides *what* runs, in *which* order and with
//! *which* arguments; the executor decides how.

pub mod cmd;
pub mod local;
pub mod recording;
pub mod secret;

pub use cmd::Cmd;
pub use local::LocalExecutor;
pub use recording::RecordingExecutor;
pub use secret::Secret;

use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output carrying `stdout`
    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for running external programs and touching files on the installer host
#[async_trait::async_trait]
pub trait CommandExecutor: Send {
    /// Run a command to completion and report its status without judging it
    async fn run_unchecked(&mut self, cmd: &Cmd) -> Result<CommandOutput>;

    /// Run a command, feeding every stdout line (split on `\n` and `\r`) to `on_line`
    async fn run_streaming(
        &mut self,
        cmd: &Cmd,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<()>;

    /// Start a command in the background; it is reaped by [`Self::terminate_background`]
    async fn spawn_background(&mut self, cmd: &Cmd) -> Result<()>;

    /// Kill every background command still running, returning how many were stopped
    async fn terminate_background(&mut self) -> Result<usize>;

    /// Read a text file, `None` when it does not exist
    async fn read_file(&mut self, path: &Path) -> Result<Option<String>>;

    /// Create or replace a text file, creating parent directories as needed
    async fn write_file(&mut self, path: &Path, contents: &str) -> Result<()>;

    /// Sorted entry names of a directory
    async fn list_dir(&mut self, path: &Path) -> Result<Vec<String>>;

    /// Resolve symlinks
    async fn canonicalize(&mut self, path: &Path) -> Result<PathBuf>;

    async fn path_exists(&mut self, path: &Path) -> Result<bool>;

    /// Run a command and turn a non-zero exit into [`crate::AutoInstallError::ProcessError`]
    async fn run(&mut self, cmd: &Cmd) -> Result<CommandOutput> {
        let output = self.run_unchecked(cmd).await?;

        if !output.success() {
            error!("Command failed with exit code {}: {}", output.exit_code, cmd);
            if !output.stdout.trim().is_empty() {
                error!("STDOUT: {}", output.stdout.trim());
            }
            if !output.stderr.trim().is_empty() {
                error!("STDERR: {}", output.stderr.trim());
            }

            return Err(crate::error::AutoInstallError::ProcessError {
                command: cmd.to_string(),
                exit_code: Some(output.exit_code),
                stderr: if output.stderr.trim().is_empty() {
                    output.stdout.clone()
                } else {
                    output.stderr.clone()
                },
            });
        }

        Ok(output)
    }

    /// Run a command whose failure must not abort the installation
    async fn run_best_effort(&mut self, cmd: &Cmd) -> bool {
        match self.run_unchecked(cmd).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!(
                    "Ignoring failure of `{}` (exit code {}): {}",
                    cmd,
                    output.exit_code,
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("Ignoring failure of `{}`: {}", cmd, e);
                false
            }
        }
    }

    /// Append a line to a text file, creating it if needed
    async fn append_line(&mut self, path: &Path, line: &str) -> Result<()> {
        let mut contents = self.read_file(path).await?.unwrap_or_default();
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(line);
        contents.push('\n');
        self.write_file(path, &contents).await
    }
}
