// file: src/executor/recording.rs
// version: 1.0.0
// guid: 9e8d7c6b-5a49-4382-a1b0-c9d8e7f6a5b4

//! In-memory executor that records commands instead of running them
//!
//! Used by `plan --preview` to print the destructive command list, and by the
//! test-suite to drive whole installations without touching a disk. Responses
//! are scripted with rules: a rule matches a command when every one of its
//! tokens appears in the command's argv. Later rules take precedence.

use super::{Cmd, CommandExecutor, CommandOutput};
use crate::error::AutoInstallError;
use crate::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct Rule {
    tokens: Vec<String>,
    output: CommandOutput,
    lines: Vec<String>,
    writes: Vec<(PathBuf, String)>,
}

impl Rule {
    fn matches(&self, cmd: &Cmd) -> bool {
        self.tokens.iter().all(|t| cmd.has_token(t))
    }
}

/// Executor backed by an in-memory filesystem and scripted command results
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    commands: Vec<Cmd>,
    rules: Vec<Rule>,
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeMap<PathBuf, Vec<String>>,
    links: BTreeMap<PathBuf, PathBuf>,
    background: Vec<Cmd>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(&mut self, tokens: &[&str], output: CommandOutput) -> &mut Rule {
        self.rules.push(Rule {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            output,
            lines: Vec::new(),
            writes: Vec::new(),
        });
        self.rules.last_mut().expect("rule was just pushed")
    }

    /// Commands containing all `tokens` succeed and print `stdout`
    pub fn respond(&mut self, tokens: &[&str], stdout: &str) -> &mut Self {
        self.push_rule(tokens, CommandOutput::with_stdout(stdout));
        self
    }

    /// Commands containing all `tokens` exit with `exit_code`
    pub fn fail(&mut self, tokens: &[&str], exit_code: i32, stderr: &str) -> &mut Self {
        self.push_rule(
            tokens,
            CommandOutput {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
        self
    }

    /// Streaming commands containing all `tokens` emit `lines`
    pub fn stream(&mut self, tokens: &[&str], lines: &[&str]) -> &mut Self {
        let rule = self.push_rule(tokens, CommandOutput::default());
        rule.lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Running a command containing all `tokens` writes `contents` to `path`
    pub fn on_run_write(&mut self, tokens: &[&str], path: &str, contents: &str) -> &mut Self {
        let rule = self.push_rule(tokens, CommandOutput::default());
        rule.writes.push((PathBuf::from(path), contents.to_string()));
        self
    }

    pub fn add_file(&mut self, path: &str, contents: &str) -> &mut Self {
        self.files.insert(PathBuf::from(path), contents.to_string());
        self
    }

    pub fn add_dir(&mut self, path: &str, entries: &[&str]) -> &mut Self {
        self.dirs.insert(
            PathBuf::from(path),
            entries.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    pub fn add_link(&mut self, path: &str, target: &str) -> &mut Self {
        self.links.insert(PathBuf::from(path), PathBuf::from(target));
        self
    }

    /// Every command run so far, in order
    pub fn commands(&self) -> &[Cmd] {
        &self.commands
    }

    /// Rendered command lines, in order
    pub fn command_lines(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.to_string()).collect()
    }

    /// Index of the first command containing all `tokens`
    pub fn position(&self, tokens: &[&str]) -> Option<usize> {
        self.commands
            .iter()
            .position(|c| tokens.iter().all(|t| c.has_token(t)))
    }

    /// Commands containing all `tokens`
    pub fn matching(&self, tokens: &[&str]) -> Vec<&Cmd> {
        self.commands
            .iter()
            .filter(|c| tokens.iter().all(|t| c.has_token(t)))
            .collect()
    }

    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(Path::new(path)).map(String::as_str)
    }

    pub fn background_commands(&self) -> &[Cmd] {
        &self.background
    }

    fn record(&mut self, cmd: &Cmd) -> Option<Rule> {
        self.commands.push(cmd.clone());
        let rule = self.rules.iter().rev().find(|r| r.matches(cmd)).cloned();
        if let Some(rule) = &rule {
            for (path, contents) in &rule.writes {
                self.files.insert(path.clone(), contents.clone());
            }
        }
        rule
    }
}

#[async_trait::async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run_unchecked(&mut self, cmd: &Cmd) -> Result<CommandOutput> {
        Ok(self.record(cmd).map(|r| r.output).unwrap_or_default())
    }

    async fn run_streaming(
        &mut self,
        cmd: &Cmd,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<()> {
        let Some(rule) = self.record(cmd) else {
            return Ok(());
        };
        for line in &rule.lines {
            on_line(line);
        }
        if !rule.output.success() {
            return Err(AutoInstallError::ProcessError {
                command: cmd.to_string(),
                exit_code: Some(rule.output.exit_code),
                stderr: rule.output.stderr,
            });
        }
        Ok(())
    }

    async fn spawn_background(&mut self, cmd: &Cmd) -> Result<()> {
        self.record(cmd);
        self.background.push(cmd.clone());
        Ok(())
    }

    async fn terminate_background(&mut self) -> Result<usize> {
        let stopped = self.background.len();
        self.background.clear();
        Ok(stopped)
    }

    async fn read_file(&mut self, path: &Path) -> Result<Option<String>> {
        Ok(self.files.get(path).cloned())
    }

    async fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        self.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    async fn list_dir(&mut self, path: &Path) -> Result<Vec<String>> {
        let mut entries = self.dirs.get(path).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )
        })?;
        entries.sort();
        Ok(entries)
    }

    async fn canonicalize(&mut self, path: &Path) -> Result<PathBuf> {
        match self.links.get(path) {
            Some(target) => Ok(target.clone()),
            None if self.files.contains_key(path) || self.dirs.contains_key(path) => {
                Ok(path.to_path_buf())
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )
            .into()),
        }
    }

    async fn path_exists(&mut self, path: &Path) -> Result<bool> {
        Ok(self.files.contains_key(path)
            || self.dirs.contains_key(path)
            || self.links.contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_later_rules_take_precedence() {
        let mut exec = RecordingExecutor::new();
        exec.respond(&["zfs", "--version"], "zfs-2.1.5")
            .respond(&["zfs", "--version"], "zfs-2.2.2");

        let out = exec
            .run(&Cmd::new("zfs").arg("--version"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "zfs-2.2.2");
        assert_eq!(exec.command_lines(), vec!["zfs --version"]);
    }

    #[tokio::test]
    async fn test_failure_rule_surfaces_process_error() {
        let mut exec = RecordingExecutor::new();
        exec.fail(&["zpool", "create"], 1, "pool exists");

        let err = exec
            .run(&Cmd::new("zpool").args(["create", "rpool"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AutoInstallError::ProcessError { .. }));
    }

    #[tokio::test]
    async fn test_side_effect_writes_file() {
        let mut exec = RecordingExecutor::new();
        exec.on_run_write(&["canmount=on"], "/mnt/etc/zfs/zfs-list.cache/rpool", "rpool\t/mnt\n");

        exec.run(&Cmd::new("zfs").args(["set", "canmount=on", "rpool"]))
            .await
            .unwrap();
        assert_eq!(
            exec.file("/mnt/etc/zfs/zfs-list.cache/rpool"),
            Some("rpool\t/mnt\n")
        );
    }

    #[tokio::test]
    async fn test_links_and_dirs() {
        let mut exec = RecordingExecutor::new();
        exec.add_dir("/dev/disk/by-id", &["b", "a"])
            .add_link("/dev/disk/by-id/a", "/dev/sda");

        assert_eq!(
            exec.list_dir(Path::new("/dev/disk/by-id")).await.unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(
            exec.canonicalize(Path::new("/dev/disk/by-id/a")).await.unwrap(),
            PathBuf::from("/dev/sda")
        );
        assert!(exec.list_dir(Path::new("/nope")).await.is_err());
    }
}
