// file: src/installer/migration.rs
// version: 1.0.0
// guid: 7c9e1b3d-5f7a-4c0b-82d4-6a8c0e2b4d6f

//! Copy of the temporary system onto the ZFS datasets, and reclaim of the
//! temporary partition afterwards

use super::partition::partition_path;
use super::zfs::{root_pool_members, ZPOOL_CACHE_FILE};
use crate::config::{InstallationPlan, InstallerSettings};
use crate::executor::{Cmd, CommandExecutor, CommandOutput};
use crate::Result;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};

const STUB_RESOLV_DIR: &str = "run/systemd/resolve";
const STUB_RESOLV_FILE: &str = "run/systemd/resolve/stub-resolv.conf";

/// Percentage reported by an `rsync --info=progress2` line
pub fn parse_progress(line: &str) -> Option<u64> {
    let re = Regex::new(r"(\d+)%").expect("Invalid progress regex");
    re.captures(line)
        .and_then(|c| c[1].parse::<u64>().ok())
        .map(|p| p.min(100))
}

/// Mount points strictly below `root`, deepest first
pub fn submounts(findmnt_output: &str, root: &str) -> Vec<String> {
    let prefix = format!("{}/", root.trim_end_matches('/'));
    let mut mounts: Vec<String> = findmnt_output
        .lines()
        .map(str::trim)
        .filter(|m| m.starts_with(&prefix))
        .map(str::to_string)
        .collect();
    mounts.sort();
    mounts.reverse();
    mounts
}

/// How the temporary partition is disposed of after migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailDisposition {
    /// Delete it and grow the root partition, keeping `free_tail_gib` free
    Reclaim { free_tail_gib: u64 },
    /// Wipe it and leave the space unallocated
    Release,
}

impl TailDisposition {
    pub fn for_plan(plan: &InstallationPlan, settings: &InstallerSettings) -> Self {
        if plan.sizing.free_tail_gib < settings.temp_volume_min_gib {
            Self::Reclaim {
                free_tail_gib: plan.sizing.free_tail_gib,
            }
        } else {
            Self::Release
        }
    }
}

/// Moves the installed system into the pools
pub struct MigrationEngine<'a> {
    executor: &'a mut dyn CommandExecutor,
    plan: &'a InstallationPlan,
    settings: &'a InstallerSettings,
}

impl<'a> MigrationEngine<'a> {
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

    /// Copy the temporary system onto the mounted datasets
    pub async fn migrate(&mut self) -> Result<()> {
        let source = self.settings.temp_mount();
        let destination = self.settings.zfs_mount();

        self.unmount_below(&source).await?;

        info!("Copying {} to {}", source, destination);
        let cmd = Cmd::new("rsync")
            .args([
                "-aAX",
                "--exclude=/run/*",
                "--exclude=/proc/*",
                "--exclude=/sys/*",
                "--exclude=/dev/*",
                "--info=progress2",
                "--no-inc-recursive",
                "--human-readable",
            ])
            .arg(format!("{}/", source))
            .arg(&destination);

        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message("copying system");
        let mut on_line = |line: &str| {
            if let Some(percent) = parse_progress(line) {
                bar.set_position(percent);
            }
        };
        let copied = self.executor.run_streaming(&cmd, &mut on_line).await;
        match &copied {
            Ok(()) => bar.finish_with_message("system copied"),
            Err(_) => bar.abandon_with_message("copy failed"),
        }
        copied?;

        self.restage_resolver().await?;
        info!("System copied to {}", destination);
        Ok(())
    }

    /// Dispose of the temporary partition and grow the root pool if needed
    pub async fn reclaim_temporary_partition(&mut self) -> Result<()> {
        let temp = self.settings.temp_mount();
        self.executor
            .run_best_effort(&Cmd::new("umount").arg("-R").arg(&temp))
            .await;

        match TailDisposition::for_plan(self.plan, self.settings) {
            TailDisposition::Reclaim { free_tail_gib } => self.reclaim(free_tail_gib).await,
            TailDisposition::Release => self.release().await,
        }
    }

    async fn reclaim(&mut self, free_tail_gib: u64) -> Result<()> {
        let plan = self.plan;
        info!(
            "Reclaiming temporary partition, leaving {} GiB unallocated",
            free_tail_gib
        );

        for pool in [&plan.pools.boot, &plan.pools.root] {
            self.log_and_execute(
                "Export pool",
                Cmd::new("zpool").arg("export").arg(pool.as_str()),
            )
            .await?;
        }

        let end = if free_tail_gib > 0 {
            format!("-n3:0:-{}G", free_tail_gib)
        } else {
            "-n3:0:0".to_string()
        };
        for disk in &plan.target_disks {
            for number in ["-d4", "-d3"] {
                self.log_and_execute(
                    "Delete partition",
                    Cmd::new("sgdisk").arg(number).arg(disk),
                )
                .await?;
            }
            self.log_and_execute(
                "Recreate root partition",
                Cmd::new("sgdisk")
                    .arg(&end)
                    .arg("-t3:BF01")
                    .arg(disk),
            )
            .await?;
        }
        self.log_and_execute("Re-read partition tables", Cmd::new("partprobe"))
            .await?;
        self.log_and_execute(
            "Wait for partition links",
            Cmd::new("udevadm").arg("settle"),
        )
        .await?;

        self.import_pools().await?;

        for member in root_pool_members(plan) {
            self.log_and_execute(
                "Expand root pool member",
                Cmd::new("zpool")
                    .args(["online", "-e"])
                    .arg(&plan.pools.root)
                    .arg(member),
            )
            .await?;
        }

        let size = self
            .log_and_execute(
                "Report root pool size",
                Cmd::new("zpool")
                    .args(["list", "-H", "-o", "size"])
                    .arg(&plan.pools.root),
            )
            .await?;
        info!(
            "Root pool {} now has {}",
            plan.pools.root,
            size.stdout.trim()
        );
        Ok(())
    }

    async fn import_pools(&mut self) -> Result<()> {
        let plan = self.plan;
        let mount = self.settings.zfs_mount();

        let mut root = Cmd::new("zpool").arg("import");
        if plan.encrypted() {
            root = root.arg("-l").stdin_secret(&plan.passphrase);
        }
        let root = root.arg("-R").arg(&mount).arg(&plan.pools.root);
        self.log_and_execute("Import root pool", root).await?;

        self.log_and_execute(
            "Import boot pool",
            Cmd::new("zpool")
                .arg("import")
                .arg("-R")
                .arg(&mount)
                .arg(&plan.pools.boot),
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
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        let plan = self.plan;
        info!("Releasing temporary partition as unallocated space");
        for disk in &plan.target_disks {
            let volume = partition_path(disk, 4);
            if self.executor.path_exists(Path::new(&volume)).await? {
                self.log_and_execute(
                    "Wipe temporary partition",
                    Cmd::new("wipefs").args(["--all", "--force"]).arg(&volume),
                )
                .await?;
            }
            self.log_and_execute("Delete temporary partition", Cmd::new("sgdisk").arg("-d4").arg(disk))
                .await?;
        }
        self.log_and_execute("Re-read partition tables", Cmd::new("partprobe"))
            .await?;
        Ok(())
    }

    async fn unmount_below(&mut self, root: &str) -> Result<()> {
        let output = self
            .executor
            .run_unchecked(&Cmd::new("findmnt").args(["-rn", "-o", "TARGET"]))
            .await?;
        for mount in submounts(&output.stdout, root) {
            debug!("Unmounting {}", mount);
            self.executor
                .run_best_effort(&Cmd::new("umount").arg("-l").arg(&mount))
                .await;
        }
        Ok(())
    }

    /// Make the resolver stub available to commands run inside the new system
    async fn restage_resolver(&mut self) -> Result<()> {
        let mount = &self.settings.zfs_mount_dir;
        let stub_dir = mount.join(STUB_RESOLV_DIR);
        let stub = mount.join(STUB_RESOLV_FILE);

        let host_stub = Path::new("/").join(STUB_RESOLV_FILE);
        let source = if self.executor.path_exists(&host_stub).await? {
            host_stub
        } else {
            Path::new("/etc/resolv.conf").to_path_buf()
        };

        self.log_and_execute(
            "Create resolver directory",
            Cmd::new("mkdir")
                .arg("-p")
                .arg(stub_dir.to_string_lossy().to_string()),
        )
        .await?;
        self.log_and_execute(
            "Copy resolver configuration",
            Cmd::new("cp")
                .arg("-L")
                .arg(source.to_string_lossy().to_string())
                .arg(stub.to_string_lossy().to_string()),
        )
        .await?;
        Ok(())
    }

    async fn log_and_execute(&mut self, description: &str, cmd: Cmd) -> Result<CommandOutput> {
        info!("Executing: {} -> {}", description, cmd);
        self.executor.run(&cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::plan::tests::sample_plan;
    use crate::executor::{RecordingExecutor, Secret};

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            parse_progress("    1.23G  42%  100.00MB/s    0:00:12 (xfr#10, to-chk=5/100)"),
            Some(42)
        );
        assert_eq!(parse_progress("sending incremental file list"), None);
    }

    #[test]
    fn test_submounts_deepest_first() {
        let findmnt = "/\n/target\n/target/dev\n/target/dev/pts\n/target/proc\n/targetx\n";
        assert_eq!(
            submounts(findmnt, "/target"),
            vec!["/target/proc", "/target/dev/pts", "/target/dev"]
        );
    }

    #[test]
    fn test_tail_disposition() {
        let settings = InstallerSettings::default();
        let mut plan = sample_plan();
        assert_eq!(
            TailDisposition::for_plan(&plan, &settings),
            TailDisposition::Reclaim { free_tail_gib: 0 }
        );
        plan.sizing.free_tail_gib = 12;
        assert_eq!(
            TailDisposition::for_plan(&plan, &settings),
            TailDisposition::Release
        );
    }

    #[tokio::test]
    async fn test_migrate_streams_progress_and_restages_resolver() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.respond(&["findmnt"], "/\n/target\n/target/dev\n")
            .stream(&["rsync"], &["  10%", "  55%", " 100%"])
            .add_file("/run/systemd/resolve/stub-resolv.conf", "nameserver 127.0.0.53\n");

        MigrationEngine::new(&mut exec, &plan, &settings)
            .migrate()
            .await
            .unwrap();

        let umount = exec.position(&["umount", "/target/dev"]).unwrap();
        let rsync = exec.position(&["rsync"]).unwrap();
        assert!(umount < rsync);
        assert!(exec.commands()[rsync].has_token("--exclude=/proc/*"));
        assert!(exec.command_lines().contains(
            &"cp -L /run/systemd/resolve/stub-resolv.conf /mnt/run/systemd/resolve/stub-resolv.conf"
                .to_string()
        ));
    }

    #[tokio::test]
    async fn test_reclaim_grows_root_partition() {
        let mut plan = sample_plan();
        plan.passphrase = Secret::new("correct horse");
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.respond(&["zpool", "list"], "96G\n");

        MigrationEngine::new(&mut exec, &plan, &settings)
            .reclaim_temporary_partition()
            .await
            .unwrap();

        let disk = "/dev/disk/by-id/ata-X";
        let export = exec.position(&["zpool", "export", "rpool"]).unwrap();
        let delete = exec.position(&["sgdisk", "-d3"]).unwrap();
        let grow = exec.position(&["sgdisk", "-n3:0:0"]).unwrap();
        let import = exec.position(&["zpool", "import", "rpool"]).unwrap();
        let online = exec.position(&["zpool", "online", "-e"]).unwrap();
        assert!(export < delete && delete < grow && grow < import && import < online);

        let import_cmd = &exec.commands()[import];
        assert!(import_cmd.has_token("-l"));
        assert!(import_cmd.get_stdin().is_some());
        assert!(exec
            .command_lines()
            .contains(&format!("zpool online -e rpool {}-part3", disk)));
    }

    #[tokio::test]
    async fn test_reclaim_keeps_requested_tail() {
        let mut plan = sample_plan();
        plan.sizing.free_tail_gib = 4;
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();

        MigrationEngine::new(&mut exec, &plan, &settings)
            .reclaim_temporary_partition()
            .await
            .unwrap();

        assert!(exec.position(&["sgdisk", "-n3:0:-4G"]).is_some());
        let import = &exec.matching(&["zpool", "import", "rpool"])[0];
        assert!(!import.has_token("-l"));
    }

    #[tokio::test]
    async fn test_large_tail_is_only_released() {
        let mut plan = sample_plan();
        plan.sizing.free_tail_gib = 20;
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.add_file("/dev/disk/by-id/ata-X-part4", "");

        MigrationEngine::new(&mut exec, &plan, &settings)
            .reclaim_temporary_partition()
            .await
            .unwrap();

        assert!(exec.position(&["wipefs", "/dev/disk/by-id/ata-X-part4"]).is_some());
        assert!(exec.position(&["sgdisk", "-d4"]).is_some());
        assert!(exec.matching(&["zpool", "export"]).is_empty());
        assert!(exec.matching(&["sgdisk", "-d3"]).is_empty());
    }
}
