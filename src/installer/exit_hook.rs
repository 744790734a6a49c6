// file: src/installer/exit_hook.rs
// version: 1.0.0
// guid: 0d2f4a6c-8e1b-4c3d-9f5a-7b9d1e3f5a7c

//! End-of-run hook
//!
//! Runs once on every way out of an installation: success, failure or
//! interrupt. It stops leftover background helpers and prints the replay
//! transcript of everything collected so far.

use crate::collector::SharedTranscript;
use crate::executor::CommandExecutor;
use crate::Result;
use colored::Colorize;
use tracing::{error, info, warn};

pub struct ExitHook {
    transcript: SharedTranscript,
    reveal_secrets: bool,
}

impl ExitHook {
    pub fn new(transcript: SharedTranscript, reveal_secrets: bool) -> Self {
        Self {
            transcript,
            reveal_secrets,
        }
    }

    /// Render the transcript as it stands right now
    pub fn render(&self) -> String {
        // A poisoned lock still holds every answer recorded before the panic
        let transcript = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
        transcript.render(self.reveal_secrets)
    }

    /// Clean up and print the replay transcript, returning what was printed
    pub async fn run(&self, executor: &mut dyn CommandExecutor, outcome: &Result<()>) -> String {
        match executor.terminate_background().await {
            Ok(0) => {}
            Ok(n) => info!("Stopped {} background process(es)", n),
            Err(e) => warn!("Failed to stop background processes: {}", e),
        }

        let text = self.render();
        if text.trim().is_empty() {
            info!("No configuration was collected; nothing to replay");
        } else {
            println!("# Replay this installation with the following environment:");
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
        }

        match outcome {
            Ok(()) => info!("Installation finished successfully"),
            Err(e) => {
                eprintln!("{} {}", "[FAILED]".red().bold(), e.to_string().red());
                error!("Installation failed (exit code {}): {}", e.exit_code(), e);
            }
        }

        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{env, Transcript};
    use crate::error::AutoInstallError;
    use crate::executor::{Cmd, RecordingExecutor};
    use std::sync::{Arc, Mutex};

    fn hook(reveal: bool) -> (ExitHook, SharedTranscript) {
        let mut transcript = Transcript::new();
        transcript.record(env::ZFS_HOSTNAME, "box", false);
        transcript.record(env::ZFS_USER_PASSWORD, "hunter22", true);
        let shared: SharedTranscript = Arc::new(Mutex::new(transcript));
        (ExitHook::new(shared.clone(), reveal), shared)
    }

    #[tokio::test]
    async fn test_run_stops_background_and_prints_partial_transcript() {
        let (hook, _) = hook(false);
        let mut exec = RecordingExecutor::new();
        exec.spawn_background(&Cmd::new("zed").arg("-F")).await.unwrap();

        let outcome = Err(AutoInstallError::Interrupted);
        let text = hook.run(&mut exec, &outcome).await;

        assert_eq!(exec.terminate_background().await.unwrap(), 0);
        assert!(text.contains("export ZFS_HOSTNAME='box'"));
        assert!(!text.contains("hunter22"));
    }

    #[tokio::test]
    async fn test_reveal_secrets_prints_passwords() {
        let (hook, _) = hook(true);
        let mut exec = RecordingExecutor::new();
        let text = hook.run(&mut exec, &Ok(())).await;
        assert!(text.contains("export ZFS_USER_PASSWORD='hunter22'"));
    }

    #[tokio::test]
    async fn test_render_sees_answers_recorded_after_construction() {
        let (hook, shared) = hook(false);
        shared
            .lock()
            .unwrap()
            .record(env::ZFS_TIMEZONE, "Europe/Berlin", false);
        assert!(hook.render().contains("ZFS_TIMEZONE='Europe/Berlin'"));
    }
}
