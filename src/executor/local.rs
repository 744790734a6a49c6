// file: src/executor/local.rs
// version: 2.0.0
// guid: local001-2345-6789-abcd-ef0123456789

//! Local command execution on the installer host

use super::{Cmd, CommandExecutor, CommandOutput};
use crate::error::AutoInstallError;
use crate::Result;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Executor that spawns real processes with `tokio::process`
#[derive(Default)]
pub struct LocalExecutor {
    background: Vec<(String, Child)>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(cmd: &Cmd) -> Command {
        let mut command = Command::new(cmd.program());
        command
            .args(cmd.get_args())
            .envs(cmd.get_env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if cmd.get_stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn spawn(cmd: &Cmd) -> Result<Child> {
        Self::build(cmd)
            .spawn()
            .map_err(|e| AutoInstallError::ProcessError {
                command: cmd.to_string(),
                exit_code: None,
                stderr: format!("Failed to execute command: {}", e),
            })
    }

    /// Write the secret to the child's stdin and close it so the reader sees EOF
    async fn feed_stdin(child: &mut Child, cmd: &Cmd) -> Result<()> {
        if let (Some(secret), Some(mut stdin)) = (cmd.get_stdin(), child.stdin.take()) {
            stdin.write_all(secret.expose().as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandExecutor for LocalExecutor {
    async fn run_unchecked(&mut self, cmd: &Cmd) -> Result<CommandOutput> {
        debug!("Executing: {}", cmd);

        let mut child = Self::spawn(cmd)?;
        Self::feed_stdin(&mut child, cmd).await?;
        let output = child.wait_with_output().await?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!("Exit code {} from {}", result.exit_code, cmd.program());
        Ok(result)
    }

    async fn run_streaming(
        &mut self,
        cmd: &Cmd,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<()> {
        debug!("Executing (streaming): {}", cmd);

        let mut child = Self::spawn(cmd)?;
        Self::feed_stdin(&mut child, cmd).await?;

        let mut stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        if let Some(stdout) = child.stdout.take() {
            // rsync's progress output rewrites the same line with carriage returns
            let mut segments = BufReader::new(stdout).split(b'\r');
            while let Some(segment) = segments.next_segment().await? {
                let text = String::from_utf8_lossy(&segment);
                for line in text.split('\n').filter(|l| !l.trim().is_empty()) {
                    on_line(line);
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(AutoInstallError::ProcessError {
                command: cmd.to_string(),
                exit_code: status.code(),
                stderr,
            });
        }
        Ok(())
    }

    async fn spawn_background(&mut self, cmd: &Cmd) -> Result<()> {
        info!("Starting in background: {}", cmd);
        let child = Self::spawn(cmd)?;
        self.background.push((cmd.to_string(), child));
        Ok(())
    }

    async fn terminate_background(&mut self) -> Result<usize> {
        let mut stopped = 0;
        for (description, mut child) in self.background.drain(..) {
            if child.try_wait()?.is_none() {
                debug!("Stopping background command: {}", description);
                child.start_kill()?;
                let _ = child.wait().await;
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    async fn read_file(&mut self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        debug!("Writing {}", path.display());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn list_dir(&mut self, path: &Path) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn canonicalize(&mut self, path: &Path) -> Result<PathBuf> {
        Ok(tokio::fs::canonicalize(path).await?)
    }

    async fn path_exists(&mut self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}
