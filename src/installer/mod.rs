// file: src/installer/mod.rs
// version: 2.0.0
// guid: g7h8i9j0-k1l2-3456-7890-abcdef123456

//! Installation orchestrator
//!
//! The installer walks a fixed sequence of phases:
//!
//! `Surveying → Configuring → Partitioning → PoolBuilding → BaseInstalling →
//! Migrating → ChrootConfiguring → Exiting`, ending in `Completed` or
//! `Aborted`. A phase is never re-entered once left. Every run, successful or
//! not, goes through [`ExitHook`] on its way to a terminal phase.

pub mod base_system;
pub mod chroot;
pub mod exit_hook;
pub mod migration;
pub mod partition;
pub mod preconditions;
pub mod steps;
pub mod zfs;

pub use exit_hook::ExitHook;
pub use preconditions::PrerequisiteReport;
pub use steps::{InstallStep, StepContext, StepRegistry};

use crate::config::{InstallationPlan, InstallerSettings};
use crate::error::AutoInstallError;
use crate::executor::CommandExecutor;
use crate::logging::{phase_banner, with_async_operation_span};
use crate::survey::{HardwareSurveyor, SurveyReport};
use crate::Result;
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Major phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Surveying,
    Configuring,
    Partitioning,
    PoolBuilding,
    BaseInstalling,
    Migrating,
    ChrootConfiguring,
    Exiting,
    Completed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }

    /// Banner text
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Surveying => "Surveying hardware and disks",
            Phase::Configuring => "Collecting configuration",
            Phase::Partitioning => "Partitioning disks",
            Phase::PoolBuilding => "Creating ZFS pools and datasets",
            Phase::BaseInstalling => "Installing base system",
            Phase::Migrating => "Migrating system onto ZFS",
            Phase::ChrootConfiguring => "Configuring installed system",
            Phase::Exiting => "Exiting",
            Phase::Completed => "Completed",
            Phase::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Enforces forward-only phase transitions
#[derive(Debug, Default)]
pub struct PhaseTracker {
    history: Vec<Phase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Phase> {
        self.history.last().copied()
    }

    /// Every phase entered so far, in order
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    /// Move to `next`; returns `false` when already there
    pub fn advance(&mut self, next: Phase) -> Result<bool> {
        match self.current() {
            Some(current) if current == next => return Ok(false),
            Some(current) if current.is_terminal() => {
                return Err(AutoInstallError::installation(format!(
                    "run already ended in phase {:?}",
                    current
                )))
            }
            Some(current) if next < current => {
                return Err(AutoInstallError::installation(format!(
                    "phase {:?} cannot follow {:?}",
                    next, current
                )))
            }
            current => {
                if next.is_terminal() && current != Some(Phase::Exiting) {
                    return Err(AutoInstallError::installation(format!(
                        "phase {:?} must be reached through {:?}",
                        next,
                        Phase::Exiting
                    )));
                }
            }
        }
        self.history.push(next);
        Ok(true)
    }
}

/// Main installer orchestrator
pub struct Installer<'a> {
    executor: &'a mut dyn CommandExecutor,
    settings: &'a InstallerSettings,
    tracker: PhaseTracker,
}

impl<'a> Installer<'a> {
    pub fn new(executor: &'a mut dyn CommandExecutor, settings: &'a InstallerSettings) -> Self {
        Self {
            executor,
            settings,
            tracker: PhaseTracker::new(),
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        self.tracker.current()
    }

    pub fn history(&self) -> &[Phase] {
        self.tracker.history()
    }

    pub fn executor(&mut self) -> &mut dyn CommandExecutor {
        &mut *self.executor
    }

    /// Enter `phase`, printing its banner the first time
    pub fn enter(&mut self, phase: Phase) -> Result<()> {
        if self.tracker.advance(phase)? && !phase.is_terminal() {
            phase_banner(phase.label());
        }
        Ok(())
    }

    /// Discover candidate disks and the hardware profile
    pub async fn survey(&mut self) -> Result<SurveyReport> {
        self.enter(Phase::Surveying)?;
        HardwareSurveyor::new(&mut *self.executor, self.settings)
            .survey()
            .await
    }

    /// Run every step selected for `plan`
    pub async fn install(&mut self, plan: &InstallationPlan) -> Result<()> {
        let steps = StepRegistry::for_plan(plan)?.resolve();
        self.execute_steps(plan, &steps).await
    }

    /// Execute `steps` in order, stopping at the first failure
    pub async fn execute_steps(
        &mut self,
        plan: &InstallationPlan,
        steps: &[Box<dyn InstallStep>],
    ) -> Result<()> {
        info!("Starting installation with {} steps", steps.len());

        for (i, step) in steps.iter().enumerate() {
            self.enter(step.phase())?;
            info!(
                "Executing step {}/{}: {}",
                i + 1,
                steps.len(),
                step.description()
            );

            let context = StepContext {
                plan,
                settings: self.settings,
                step_number: i + 1,
                total_steps: steps.len(),
            };
            let started = Instant::now();
            let running = step.execute(&mut *self.executor, &context);
            if let Err(e) = with_async_operation_span(step.name(), || running).await {
                error!("Step {} failed: {}", step.name(), e);
                return Err(e);
            }
            debug!("Step {} completed in {:?}", step.name(), started.elapsed());
        }

        info!("All installation steps completed");
        Ok(())
    }

    /// Run the exit hook and settle on a terminal phase
    pub async fn finish(&mut self, outcome: &Result<()>, hook: &ExitHook) -> String {
        if let Err(e) = self.enter(Phase::Exiting) {
            warn!("{}", e);
        }
        let transcript = hook.run(&mut *self.executor, outcome).await;

        let terminal = if outcome.is_ok() {
            Phase::Completed
        } else {
            Phase::Aborted
        };
        if let Err(e) = self.enter(terminal) {
            warn!("{}", e);
        }
        transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::SharedTranscript;
    use crate::config::plan::tests::sample_plan;
    use crate::config::Transcript;
    use crate::executor::RecordingExecutor;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_tracker_moves_forward_only() {
        let mut tracker = PhaseTracker::new();
        assert!(tracker.advance(Phase::Surveying).unwrap());
        assert!(tracker.advance(Phase::Partitioning).unwrap());
        assert!(!tracker.advance(Phase::Partitioning).unwrap());
        assert!(tracker.advance(Phase::Configuring).is_err());
        assert!(tracker.advance(Phase::Completed).is_err());
        assert!(tracker.advance(Phase::Exiting).unwrap());
        assert!(tracker.advance(Phase::Aborted).unwrap());
        assert!(tracker.advance(Phase::Completed).is_err());
        assert_eq!(
            tracker.history(),
            &[
                Phase::Surveying,
                Phase::Partitioning,
                Phase::Exiting,
                Phase::Aborted
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_aborts_through_exit_hook() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.respond(&["blockdev"], "107374182400")
            .fail(&["zpool", "create", "rpool"], 1, "cannot create 'rpool'");
        let transcript: SharedTranscript = Arc::new(Mutex::new(Transcript::from_plan(&plan)));
        let hook = ExitHook::new(transcript, false);

        let mut installer = Installer::new(&mut exec, &settings);
        let outcome = installer.install(&plan).await;
        assert_eq!(outcome.as_ref().unwrap_err().exit_code(), 4);
        let text = installer.finish(&outcome, &hook).await;

        assert!(text.contains("export ZFS_RPOOL_NAME='rpool'"));
        assert_eq!(
            installer.history(),
            &[
                Phase::Partitioning,
                Phase::PoolBuilding,
                Phase::Exiting,
                Phase::Aborted
            ]
        );
        assert!(exec.matching(&["debootstrap"]).is_empty());
    }
}
