// file: src/installer/partition.rs
// version: 1.1.0
// guid: 2c4e6a8b-0d1f-4e3a-b5c7-9d1e3f5a7b9c

//! Disk partitioning
//!
//! Every target disk gets the same four GPT partitions:
//!
//! | # | type | size |
//! |---|------|------|
//! | 1 | EF00 (EFI) | `efi_partition_mib` |
//! | 2 | BF01 (boot pool) | boot partition size |
//! | 3 | BF01 (root pool) | everything else |
//! | 4 | 8300 (temporary) | `max(free tail, temporary minimum)` |

use crate::config::{InstallationPlan, InstallerSettings};
use crate::error::AutoInstallError;
use crate::executor::{Cmd, CommandExecutor, CommandOutput};
use crate::Result;
use std::path::Path;
use tracing::{debug, info, warn};

const MIB: u64 = 1024 * 1024;
const GIB_IN_MIB: u64 = 1024;

/// Path of partition `number` of a `/dev/disk/by-id` disk
pub fn partition_path(disk: &str, number: u8) -> String {
    format!("{}-part{}", disk, number)
}

/// Partition sizes of one disk, in MiB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    pub efi_mib: u64,
    pub boot_mib: u64,
    pub root_mib: u64,
    pub temp_mib: u64,
}

impl PartitionLayout {
    /// Size the partitions of a disk of `disk_bytes`
    pub fn compute(
        disk_bytes: u64,
        plan: &InstallationPlan,
        settings: &InstallerSettings,
    ) -> Result<Self> {
        let efi_mib = settings.efi_partition_mib;
        let boot_mib = plan.sizing.boot_partition_mib;
        let disk_mib = disk_bytes / MIB;
        let out_of_range = || {
            AutoInstallError::validation(format!(
                "partition sizes do not fit any disk ({} MiB EFI, {} MiB boot, {} GiB free tail)",
                efi_mib, boot_mib, plan.sizing.free_tail_gib
            ))
        };

        let temp_mib = plan
            .sizing
            .free_tail_gib
            .max(settings.temp_volume_min_gib)
            .checked_mul(GIB_IN_MIB)
            .ok_or_else(out_of_range)?;
        let reserved = efi_mib
            .checked_add(boot_mib)
            .and_then(|mib| mib.checked_add(temp_mib))
            .ok_or_else(out_of_range)?;
        if disk_mib <= reserved {
            return Err(AutoInstallError::validation(format!(
                "disk of {} MiB cannot hold {} MiB EFI + {} MiB boot + {} MiB temporary partitions",
                disk_mib, efi_mib, boot_mib, temp_mib
            )));
        }

        Ok(Self {
            efi_mib,
            boot_mib,
            root_mib: disk_mib - reserved,
            temp_mib,
        })
    }

    /// `sgdisk` argument groups creating the four partitions, in order
    pub fn sgdisk_args(&self) -> Vec<Vec<String>> {
        vec![
            vec![format!("-n1:1M:+{}M", self.efi_mib), "-t1:EF00".to_string()],
            vec![format!("-n2:0:+{}M", self.boot_mib), "-t2:BF01".to_string()],
            vec![format!("-n3:0:-{}M", self.temp_mib), "-t3:BF01".to_string()],
            vec!["-n4:0:0".to_string(), "-t4:8300".to_string()],
        ]
    }
}

/// Wipes, partitions and formats the target disks
pub struct DiskPartitioner<'a> {
    executor: &'a mut dyn CommandExecutor,
    plan: &'a InstallationPlan,
    settings: &'a InstallerSettings,
}

impl<'a> DiskPartitioner<'a> {
    pub fn new(
        executor: &'a mut dyn CommandExecutor,
        plan: &'a InstallationPlan,
        settings: &'a InstallerSettings,
    ) -> Self {
        Self {
            executor,
            plan,
            settings,
        }
    }

    /// Prepare every target disk
    pub async fn prepare_disks(&mut self) -> Result<()> {
        let plan = self.plan;
        info!(
            "Starting disk preparation for {} disk(s)",
            plan.target_disks.len()
        );

        let mut layouts = Vec::with_capacity(plan.target_disks.len());
        for disk in &plan.target_disks {
            let size = self.disk_size(disk).await?;
            let layout = PartitionLayout::compute(size, plan, self.settings)?;
            debug!("Layout for {}: {:?}", disk, layout);
            layouts.push(layout);
        }

        self.release_stale_pools().await?;

        for (disk, layout) in plan.target_disks.iter().zip(&layouts) {
            self.wipe_disk(disk).await?;
            self.create_partitions(disk, layout).await?;
        }

        self.log_and_execute("Re-read partition tables", Cmd::new("partprobe"))
            .await?;
        self.log_and_execute(
            "Wait for partition links",
            Cmd::new("udevadm").arg("settle"),
        )
        .await?;

        for disk in &plan.target_disks {
            self.log_and_execute(
                "Format EFI partition",
                Cmd::new("mkfs.fat")
                    .args(["-F", "32", "-n", "EFI"])
                    .arg(partition_path(disk, 1)),
            )
            .await?;
        }

        info!("Disk preparation completed successfully");
        Ok(())
    }

    async fn disk_size(&mut self, disk: &str) -> Result<u64> {
        let output = self
            .log_and_execute(
                "Query disk size",
                Cmd::new("blockdev").arg("--getsize64").arg(disk),
            )
            .await?;
        output.stdout.trim().parse().map_err(|_| {
            AutoInstallError::installation(format!(
                "unexpected size '{}' reported for {}",
                output.stdout.trim(),
                disk
            ))
        })
    }

    /// Export pools left imported by an earlier, interrupted run
    async fn release_stale_pools(&mut self) -> Result<()> {
        let output = self
            .executor
            .run_unchecked(&Cmd::new("zpool").args(["list", "-H", "-o", "name"]))
            .await?;
        let imported: Vec<&str> = output.stdout.lines().map(str::trim).collect();

        for pool in [&self.plan.pools.boot, &self.plan.pools.root] {
            if imported.contains(&pool.as_str()) {
                warn!("Pool {} is already imported, exporting it", pool);
                let cmd = Cmd::new("zpool").args(["export", "-f"]).arg(pool.as_str());
                self.executor.run_best_effort(&cmd).await;
            }
        }
        Ok(())
    }

    async fn wipe_disk(&mut self, disk: &str) -> Result<()> {
        info!("Wiping {}", disk);

        for number in 1..=4 {
            let part = partition_path(disk, number);
            if self.executor.path_exists(Path::new(&part)).await? {
                let cmd = Cmd::new("zpool").args(["labelclear", "-f"]).arg(&part);
                self.executor.run_best_effort(&cmd).await;
            }
        }

        self.log_and_execute(
            "Clear filesystem signatures",
            Cmd::new("wipefs").args(["--all", "--force"]).arg(disk),
        )
        .await?;
        self.log_and_execute(
            "Destroy partition table",
            Cmd::new("sgdisk").arg("--zap-all").arg(disk),
        )
        .await?;
        Ok(())
    }

    async fn create_partitions(&mut self, disk: &str, layout: &PartitionLayout) -> Result<()> {
        for args in layout.sgdisk_args() {
            self.log_and_execute(
                "Create partition",
                Cmd::new("sgdisk").args(args).arg(disk),
            )
            .await?;
        }
        Ok(())
    }

    async fn log_and_execute(&mut self, description: &str, cmd: Cmd) -> Result<CommandOutput> {
        info!("Executing: {} -> {}", description, cmd);
        self.executor.run(&cmd).await
    }
}
