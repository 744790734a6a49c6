// file: src/installer/zfs.rs
// version: 1.0.0
// guid: 8e0a2c4e-6b8d-4f1a-93c5-7e9b1d3f5a7c

//! ZFS pool and dataset creation

use super::partition::partition_path;
use crate::config::{DatasetLayout, InstallationPlan, InstallerSettings};
use crate::executor::{Cmd, CommandExecutor, CommandOutput};
use crate::Result;
use tracing::info;

/// Host path of the pool cache file written by `zpool`
pub const ZPOOL_CACHE_FILE: &str = "/etc/zfs/zpool.cache";

const ENCRYPTION_OPTIONS: [&str; 6] = [
    "-O",
    "encryption=aes-256-gcm",
    "-O",
    "keylocation=prompt",
    "-O",
    "keyformat=passphrase",
];

/// Name of the swap volume in the root pool
pub fn swap_volume(root_pool: &str) -> String {
    format!("{}/swap", root_pool)
}

/// Device node of the swap volume
pub fn swap_device(root_pool: &str) -> String {
    format!("/dev/zvol/{}", swap_volume(root_pool))
}

/// Creates the root and boot pools with their datasets
pub struct PoolBuilder<'a> {
    executor: &'a mut dyn CommandExecutor,
    plan: &'a InstallationPlan,
    settings: &'a InstallerSettings,
}

impl<'a> PoolBuilder<'a> {
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

    /// Create both pools, their datasets and the swap volume
    pub async fn build(&mut self) -> Result<()> {
        let plan = self.plan;
        let layout = plan.dataset_layout()?;
        let boot_layout = plan.boot_dataset_layout()?;
        let bootfs = plan.bootfs_dataset()?;

        self.create_root_pool().await?;
        self.create_datasets(&plan.pools.root, &layout).await?;

        self.create_boot_pool().await?;
        self.create_datasets(&plan.pools.boot, &boot_layout).await?;

        self.log_and_execute(
            "Mark bootable dataset",
            Cmd::new("zpool")
                .arg("set")
                .arg(format!("bootfs={}", bootfs))
                .arg(&plan.pools.root),
        )
        .await?;

        for pool in [&plan.pools.root, &plan.pools.boot] {
            self.log_and_execute(
                "Record pool in cache file",
                Cmd::new("zpool")
                    .arg("set")
                    .arg(format!("cachefile={}", ZPOOL_CACHE_FILE))
                    .arg(pool.as_str()),
            )
            .await?;
        }

        if plan.sizing.swap_gib > 0 {
            self.create_swap().await?;
        }

        info!("ZFS pools created successfully");
        Ok(())
    }

    /// `zpool create` invocation for the root pool
    pub fn root_pool_command(&self) -> Cmd {
        let mut cmd = Cmd::new("zpool").arg("create");
        if self.plan.encrypted() {
            cmd = cmd.args(ENCRYPTION_OPTIONS).stdin_secret(&self.plan.passphrase);
        }
        cmd.args(self.plan.rpool_options.iter().map(String::as_str))
            .args(["-O", "canmount=off", "-O", "mountpoint=/", "-R"])
            .arg(self.settings.zfs_mount())
            .arg("-f")
            .arg(&self.plan.pools.root)
            .args(
                self.plan
                    .vdev_topology
                    .zpool_args(&self.plan.target_disks, "-part3"),
            )
    }

    /// `zpool create` invocation for the boot pool
    pub fn boot_pool_command(&self) -> Cmd {
        Cmd::new("zpool")
            .arg("create")
            .args(self.plan.bpool_options.iter().map(String::as_str))
            .args(["-O", "canmount=off", "-O", "mountpoint=/boot", "-R"])
            .arg(self.settings.zfs_mount())
            .arg("-f")
            .arg(&self.plan.pools.boot)
            .args(
                self.plan
                    .vdev_topology
                    .zpool_args(&self.plan.target_disks, "-part2"),
            )
    }

    async fn create_root_pool(&mut self) -> Result<()> {
        info!(
            "Creating root pool {} ({})",
            self.plan.pools.root,
            if self.plan.encrypted() {
                "encrypted"
            } else {
                "unencrypted"
            }
        );
        let cmd = self.root_pool_command();
        self.log_and_execute("Create root pool", cmd).await?;
        Ok(())
    }

    async fn create_boot_pool(&mut self) -> Result<()> {
        info!("Creating boot pool {}", self.plan.pools.boot);
        let cmd = self.boot_pool_command();
        self.log_and_execute("Create boot pool", cmd).await?;
        Ok(())
    }

    async fn create_datasets(&mut self, pool: &str, layout: &DatasetLayout) -> Result<()> {
        for entry in layout.entries() {
            self.log_and_execute(
                "Create dataset",
                Cmd::new("zfs").args(entry.create_args(pool)),
            )
            .await?;
        }
        Ok(())
    }

    async fn create_swap(&mut self) -> Result<()> {
        let volume = swap_volume(&self.plan.pools.root);
        self.log_and_execute(
            "Create swap volume",
            Cmd::new("zfs")
                .args(["create", "-V"])
                .arg(format!("{}G", self.plan.sizing.swap_gib))
                .args([
                    "-b",
                    "4096",
                    "-o",
                    "compression=zle",
                    "-o",
                    "logbias=throughput",
                    "-o",
                    "sync=always",
                    "-o",
                    "primarycache=metadata",
                    "-o",
                    "secondarycache=none",
                    "-o",
                    "com.sun:auto-snapshot=false",
                ])
                .arg(&volume),
        )
        .await?;
        self.log_and_execute("Wait for swap device", Cmd::new("udevadm").arg("settle"))
            .await?;
        self.log_and_execute(
            "Format swap",
            Cmd::new("mkswap")
                .arg("-f")
                .arg(swap_device(&self.plan.pools.root)),
        )
        .await?;
        Ok(())
    }

    async fn log_and_execute(&mut self, description: &str, cmd: Cmd) -> Result<CommandOutput> {
        info!("Executing: {} -> {}", description, cmd);
        self.executor.run(&cmd).await
    }
}

/// Vdev members of the root pool, as `-part3` paths
pub fn root_pool_members(plan: &InstallationPlan) -> Vec<String> {
    plan.target_disks
        .iter()
        .map(|disk| partition_path(disk, 3))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::plan::tests::sample_plan;
    use crate::config::{VdevGroup, VdevKind, VdevTopology};
    use crate::executor::{RecordingExecutor, Secret};

    #[tokio::test]
    async fn test_unencrypted_single_disk() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();

        PoolBuilder::new(&mut exec, &plan, &settings)
            .build()
            .await
            .unwrap();

        let create = &exec.matching(&["zpool", "create", "rpool"])[0];
        assert!(!create.has_token("encryption=aes-256-gcm"));
        assert!(create.get_stdin().is_none());
        assert_eq!(
            create.get_args().last().map(String::as_str),
            Some("/dev/disk/by-id/ata-X-part3")
        );

        let bpool = &exec.matching(&["zpool", "create", "bpool"])[0];
        assert!(bpool.has_token("compatibility=grub2"));
        assert!(bpool.has_token("/dev/disk/by-id/ata-X-part2"));

        let lines = exec.command_lines();
        assert!(lines.contains(&"zpool set bootfs=rpool/ROOT/box rpool".to_string()));
        assert!(lines.contains(&"zfs create -o mountpoint=/boot bpool/BOOT/box".to_string()));
        assert!(lines.contains(&"mkswap -f /dev/zvol/rpool/swap".to_string()));

        let rpool = exec.position(&["zpool", "create", "rpool"]).unwrap();
        let root_ds = exec.position(&["zfs", "create", "rpool/ROOT/box"]).unwrap();
        let bpool_pos = exec.position(&["zpool", "create", "bpool"]).unwrap();
        let bootfs = exec.position(&["zpool", "set", "bootfs=rpool/ROOT/box"]).unwrap();
        assert!(rpool < root_ds && root_ds < bpool_pos && bpool_pos < bootfs);
    }

    #[tokio::test]
    async fn test_encrypted_mirror_feeds_passphrase_on_stdin() {
        let mut plan = sample_plan();
        plan.target_disks = vec!["/dev/disk/by-id/a".into(), "/dev/disk/by-id/b".into()];
        plan.vdev_topology = VdevTopology::new(vec![VdevGroup::new(VdevKind::Mirror, vec![0, 1])]);
        plan.passphrase = Secret::new("correct horse");
        plan.sizing.swap_gib = 0;
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();

        PoolBuilder::new(&mut exec, &plan, &settings)
            .build()
            .await
            .unwrap();

        let create = &exec.matching(&["zpool", "create", "rpool"])[0];
        assert_eq!(create.get_stdin(), Some(&Secret::new("correct horse")));
        assert!(!create.to_string().contains("correct horse"));
        let argv = create.argv();
        assert_eq!(&argv[2..8], &ENCRYPTION_OPTIONS);
        let tail = &argv[argv.len() - 3..];
        assert_eq!(
            tail,
            &["mirror", "/dev/disk/by-id/a-part3", "/dev/disk/by-id/b-part3"]
        );
        assert!(exec.matching(&["mkswap"]).is_empty());
    }

    #[tokio::test]
    async fn test_pool_creation_failure_stops_datasets() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.fail(&["zpool", "create", "rpool"], 1, "cannot create 'rpool'");

        let err = PoolBuilder::new(&mut exec, &plan, &settings)
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(exec.matching(&["zfs", "create"]).is_empty());
    }

    #[test]
    fn test_root_pool_members() {
        let plan = sample_plan();
        assert_eq!(root_pool_members(&plan), vec!["/dev/disk/by-id/ata-X-part3"]);
    }
}
