// file: src/installer/steps.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-bcdef2345678

//! Installation steps and the registry that orders them
//!
//! Every step has a stable name. The registry starts from the default
//! sequence; an override registered under the same name replaces the default
//! in place. The registry is resolved once into the list the installer runs.

use super::base_system::BaseSystemInstaller;
use super::chroot::ChrootConfigurator;
use super::migration::MigrationEngine;
use super::partition::DiskPartitioner;
use super::zfs::PoolBuilder;
use super::Phase;
use crate::config::{Bootloader, InstallMethod, InstallationPlan, InstallerSettings};
use crate::error::AutoInstallError;
use crate::executor::CommandExecutor;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Context passed to each installation step
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub plan: &'a InstallationPlan,
    pub settings: &'a InstallerSettings,

    /// Current step number (1-based)
    pub step_number: usize,

    pub total_steps: usize,
}

/// Trait for installation steps
#[async_trait]
pub trait InstallStep: Send + Sync {
    /// Stable identifier, also the key overrides are registered under
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Phase the step belongs to
    fn phase(&self) -> Phase;

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()>;
}

/// Default step sequence plus overrides, resolved once
pub struct StepRegistry {
    defaults: Vec<Box<dyn InstallStep>>,
    overrides: HashMap<String, Box<dyn InstallStep>>,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        let defaults: Vec<Box<dyn InstallStep>> = vec![
            Box::new(PrepareDisksStep),
            Box::new(CreatePoolsStep),
            Box::new(DebootstrapStep),
            Box::new(MigrateSystemStep),
            Box::new(ReclaimPartitionStep),
            Box::new(PrepareChrootStep),
            Box::new(InstallPackagesStep),
            Box::new(InstallZfsPackagesStep),
            Box::new(ConfigureFstabStep),
            Box::new(GrubStep),
            Box::new(SyncEfiStep),
            Box::new(InitramfsStep),
            Box::new(RepairZfsCacheStep),
            Box::new(FinalizeStep),
        ];
        Self {
            defaults,
            overrides: HashMap::new(),
        }
    }

    /// Registry with the overrides selected by `plan`
    pub fn for_plan(plan: &InstallationPlan) -> Result<Self> {
        let mut registry = Self::new();
        if plan.install_method == InstallMethod::TimeshiftRestore {
            registry.register_override(Box::new(TimeshiftRestoreStep))?;
        }
        if plan.bootloader == Bootloader::ZfsBootMenu {
            registry.register_override(Box::new(ZfsBootMenuStep))?;
        }
        Ok(registry)
    }

    /// Replace the default step of the same name
    pub fn register_override(&mut self, step: Box<dyn InstallStep>) -> Result<()> {
        let name = step.name().to_string();
        if !self.defaults.iter().any(|s| s.name() == name) {
            return Err(AutoInstallError::installation(format!(
                "no default step named '{}' to override",
                name
            )));
        }
        debug!("Registering override for step {}", name);
        self.overrides.insert(name, step);
        Ok(())
    }

    /// Final ordered step list
    pub fn resolve(self) -> Vec<Box<dyn InstallStep>> {
        let mut overrides = self.overrides;
        self.defaults
            .into_iter()
            .map(|step| overrides.remove(step.name()).unwrap_or(step))
            .collect()
    }
}

pub struct PrepareDisksStep;

#[async_trait]
impl InstallStep for PrepareDisksStep {
    fn name(&self) -> &str {
        "prepare-disks"
    }

    fn description(&self) -> &str {
        "Wipe and partition the target disks"
    }

    fn phase(&self) -> Phase {
        Phase::Partitioning
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        DiskPartitioner::new(executor, context.plan, context.settings)
            .prepare_disks()
            .await
    }
}

pub struct CreatePoolsStep;

#[async_trait]
impl InstallStep for CreatePoolsStep {
    fn name(&self) -> &str {
        "create-pools"
    }

    fn description(&self) -> &str {
        "Create the root and boot pools and their datasets"
    }

    fn phase(&self) -> Phase {
        Phase::PoolBuilding
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        PoolBuilder::new(executor, context.plan, context.settings)
            .build()
            .await
    }
}

pub struct DebootstrapStep;

#[async_trait]
impl InstallStep for DebootstrapStep {
    fn name(&self) -> &str {
        "install-base-system"
    }

    fn description(&self) -> &str {
        "Install the base system with debootstrap"
    }

    fn phase(&self) -> Phase {
        Phase::BaseInstalling
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        BaseSystemInstaller::new(executor, context.plan, context.settings)
            .debootstrap()
            .await
    }
}

/// Override of `install-base-system` restoring a Timeshift snapshot
pub struct TimeshiftRestoreStep;

#[async_trait]
impl InstallStep for TimeshiftRestoreStep {
    fn name(&self) -> &str {
        "install-base-system"
    }

    fn description(&self) -> &str {
        "Restore the newest Timeshift snapshot"
    }

    fn phase(&self) -> Phase {
        Phase::BaseInstalling
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        BaseSystemInstaller::new(executor, context.plan, context.settings)
            .timeshift_restore()
            .await
    }
}

pub struct MigrateSystemStep;

#[async_trait]
impl InstallStep for MigrateSystemStep {
    fn name(&self) -> &str {
        "migrate-system"
    }

    fn description(&self) -> &str {
        "Copy the installed system onto the ZFS datasets"
    }

    fn phase(&self) -> Phase {
        Phase::Migrating
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        MigrationEngine::new(executor, context.plan, context.settings)
            .migrate()
            .await
    }
}

pub struct ReclaimPartitionStep;

#[async_trait]
impl InstallStep for ReclaimPartitionStep {
    fn name(&self) -> &str {
        "reclaim-temporary-partition"
    }

    fn description(&self) -> &str {
        "Remove the temporary partition and grow the root pool"
    }

    fn phase(&self) -> Phase {
        Phase::Migrating
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        MigrationEngine::new(executor, context.plan, context.settings)
            .reclaim_temporary_partition()
            .await
    }
}

pub struct PrepareChrootStep;

#[async_trait]
impl InstallStep for PrepareChrootStep {
    fn name(&self) -> &str {
        "prepare-chroot"
    }

    fn description(&self) -> &str {
        "Bind virtual filesystems and configure DNS in the jail"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .prepare_chroot()
            .await
    }
}

pub struct InstallPackagesStep;

#[async_trait]
impl InstallStep for InstallPackagesStep {
    fn name(&self) -> &str {
        "install-packages"
    }

    fn description(&self) -> &str {
        "Install rsync and the bootloader packages"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .install_packages()
            .await
    }
}

pub struct InstallZfsPackagesStep;

#[async_trait]
impl InstallStep for InstallZfsPackagesStep {
    fn name(&self) -> &str {
        "install-zfs-packages"
    }

    fn description(&self) -> &str {
        "Install ZFS userspace tools"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .install_zfs_packages()
            .await
    }
}

pub struct ConfigureFstabStep;

#[async_trait]
impl InstallStep for ConfigureFstabStep {
    fn name(&self) -> &str {
        "configure-fstab"
    }

    fn description(&self) -> &str {
        "Write /etc/fstab"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .configure_fstab()
            .await
    }
}

pub struct GrubStep;

#[async_trait]
impl InstallStep for GrubStep {
    fn name(&self) -> &str {
        "install-bootloader"
    }

    fn description(&self) -> &str {
        "Install and configure GRUB"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .install_grub()
            .await
    }
}

/// Override of `install-bootloader` provisioning ZFSBootMenu
pub struct ZfsBootMenuStep;

#[async_trait]
impl InstallStep for ZfsBootMenuStep {
    fn name(&self) -> &str {
        "install-bootloader"
    }

    fn description(&self) -> &str {
        "Provision ZFSBootMenu"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .install_zfsbootmenu()
            .await
    }
}

pub struct SyncEfiStep;

#[async_trait]
impl InstallStep for SyncEfiStep {
    fn name(&self) -> &str {
        "sync-efi-partitions"
    }

    fn description(&self) -> &str {
        "Mirror the EFI partition onto secondary disks"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .sync_efi_partitions()
            .await
    }
}

pub struct InitramfsStep;

#[async_trait]
impl InstallStep for InitramfsStep {
    fn name(&self) -> &str {
        "regenerate-initramfs"
    }

    fn description(&self) -> &str {
        "Regenerate the initramfs images"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .regenerate_initramfs()
            .await
    }
}

pub struct RepairZfsCacheStep;

#[async_trait]
impl InstallStep for RepairZfsCacheStep {
    fn name(&self) -> &str {
        "repair-zfs-cache"
    }

    fn description(&self) -> &str {
        "Populate the ZFS mount-ordering caches"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .repair_zfs_cache()
            .await
    }
}

pub struct FinalizeStep;

#[async_trait]
impl InstallStep for FinalizeStep {
    fn name(&self) -> &str {
        "finalize"
    }

    fn description(&self) -> &str {
        "Release the jail mounts and export the pools"
    }

    fn phase(&self) -> Phase {
        Phase::ChrootConfiguring
    }

    async fn execute(
        &self,
        executor: &mut dyn CommandExecutor,
        context: &StepContext<'_>,
    ) -> Result<()> {
        ChrootConfigurator::new(executor, context.plan, context.settings)
            .finalize()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::plan::tests::sample_plan;

    fn names(steps: &[Box<dyn InstallStep>]) -> Vec<&str> {
        steps.iter().map(|s| s.name()).collect()
    }

    #[test]
    fn test_default_order() {
        let steps = StepRegistry::for_plan(&sample_plan()).unwrap().resolve();
        assert_eq!(
            names(&steps),
            vec![
                "prepare-disks",
                "create-pools",
                "install-base-system",
                "migrate-system",
                "reclaim-temporary-partition",
                "prepare-chroot",
                "install-packages",
                "install-zfs-packages",
                "configure-fstab",
                "install-bootloader",
                "sync-efi-partitions",
                "regenerate-initramfs",
                "repair-zfs-cache",
                "finalize",
            ]
        );
        assert_eq!(steps[9].description(), "Install and configure GRUB");
    }

    #[test]
    fn test_overrides_replace_in_place() {
        let mut plan = sample_plan();
        plan.bootloader = Bootloader::ZfsBootMenu;
        plan.install_method = InstallMethod::TimeshiftRestore;
        let steps = StepRegistry::for_plan(&plan).unwrap().resolve();

        assert_eq!(steps.len(), 14);
        assert_eq!(steps[2].description(), "Restore the newest Timeshift snapshot");
        assert_eq!(steps[9].description(), "Provision ZFSBootMenu");
    }

    #[test]
    fn test_phases_never_go_backwards() {
        let steps = StepRegistry::new().resolve();
        let phases: Vec<Phase> = steps.iter().map(|s| s.phase()).collect();
        assert!(phases.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_unknown_override_rejected() {
        struct Stray;

        #[async_trait]
        impl InstallStep for Stray {
            fn name(&self) -> &str {
                "stray"
            }
            fn description(&self) -> &str {
                "not part of the sequence"
            }
            fn phase(&self) -> Phase {
                Phase::Partitioning
            }
            async fn execute(
                &self,
                _executor: &mut dyn CommandExecutor,
                _context: &StepContext<'_>,
            ) -> Result<()> {
                Ok(())
            }
        }

        let mut registry = StepRegistry::new();
        assert!(registry.register_override(Box::new(Stray)).is_err());
    }
}
