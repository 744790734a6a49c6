// file: src/installer/chroot.rs
// version: 1.0.0
// guid: 9e1b3d5f-7a9c-4e2d-b4f6-8c0e2b4d6f8a

//! Configuration of the migrated system from inside a chroot jail

use super::base_system::VIRTUAL_FILESYSTEMS;
use super::partition::partition_path;
use super::zfs::{swap_device, ZPOOL_CACHE_FILE};
use crate::config::{Bootloader, InstallationPlan, InstallerSettings};
use crate::error::AutoInstallError;
use crate::executor::{Cmd, CommandExecutor, CommandOutput};
use crate::utils::{poll_until, RetryPolicy};
use crate::Result;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const ZFS_PACKAGES: [&str; 3] = ["zfsutils-linux", "zfs-initramfs", "zfs-zed"];
const EFI_MOUNT_OPTIONS: &str =
    "nofail,x-systemd.requires=zfs-mount.service,x-systemd.device-timeout=10";
const ZFS_LIST_CACHE_DIR: &str = "etc/zfs/zfs-list.cache";
const GRUB_LOADER: &str = r"\EFI\ubuntu\shimx64.efi";
const ZFSBOOTMENU_LOADER: &str = r"\EFI\ZBM\VMLINUZ.EFI";
const ZFSBOOTMENU_IMAGE: &str = "/boot/efi/EFI/ZBM/VMLINUZ.EFI";

/// Mount point of the EFI partition of the `index`th target disk
pub fn efi_mount_point(index: usize) -> String {
    if index == 0 {
        "/boot/efi".to_string()
    } else {
        format!("/boot/efi{}", index + 1)
    }
}

/// Packages installed next to rsync for the chosen bootloader
pub fn bootloader_packages(bootloader: Bootloader) -> &'static [&'static str] {
    match bootloader {
        Bootloader::Grub => &["grub-efi-amd64-signed", "shim-signed", "efibootmgr"],
        Bootloader::ZfsBootMenu => &["efibootmgr", "curl"],
    }
}

/// Candidate version from `apt-cache policy` output
pub fn parse_candidate(policy: &str) -> Option<String> {
    policy
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Candidate:"))
        .map(str::trim)
        .find(|v| !v.is_empty() && *v != "(none)")
        .map(str::to_string)
}

/// `/etc/fstab` for the installed system
pub fn render_fstab(efi_uuids: &[String], swap: Option<&str>) -> String {
    let mut fstab = String::from("# <file system> <mount point> <type> <options> <dump> <pass>\n");
    for (index, uuid) in efi_uuids.iter().enumerate() {
        fstab.push_str(&format!(
            "UUID={} {} vfat {} 0 0\n",
            uuid,
            efi_mount_point(index),
            EFI_MOUNT_OPTIONS
        ));
    }
    if let Some(device) = swap {
        fstab.push_str(&format!("{} none swap discard 0 0\n", device));
    }
    fstab
}

/// Make the boot menu visible and the boot verbose
pub fn patch_grub_defaults(contents: &str) -> String {
    let mut lines = Vec::new();
    let mut has_timeout = false;
    let mut has_os_prober = false;

    for line in contents.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("GRUB_TIMEOUT_STYLE=hidden") || trimmed.starts_with("GRUB_HIDDEN_")
        {
            lines.push(format!("#{}", line));
        } else if let Some(value) = trimmed.strip_prefix("GRUB_TIMEOUT=") {
            has_timeout = true;
            if value.trim_matches('"') == "0" {
                lines.push("GRUB_TIMEOUT=5".to_string());
            } else {
                lines.push(line.to_string());
            }
        } else if let Some(value) = trimmed.strip_prefix("GRUB_CMDLINE_LINUX_DEFAULT=") {
            let words: Vec<&str> = value
                .trim_matches('"')
                .split_whitespace()
                .filter(|w| *w != "quiet" && *w != "splash")
                .collect();
            lines.push(format!("GRUB_CMDLINE_LINUX_DEFAULT=\"{}\"", words.join(" ")));
        } else if trimmed == "#GRUB_TERMINAL=console" {
            lines.push("GRUB_TERMINAL=console".to_string());
        } else if trimmed.starts_with("GRUB_DISABLE_OS_PROBER=") {
            has_os_prober = true;
            lines.push("GRUB_DISABLE_OS_PROBER=true".to_string());
        } else {
            lines.push(line.to_string());
        }
    }

    if !has_timeout {
        lines.push("GRUB_TIMEOUT=5".to_string());
    }
    if !has_os_prober {
        lines.push("GRUB_DISABLE_OS_PROBER=true".to_string());
    }
    let mut patched = lines.join("\n");
    patched.push('\n');
    patched
}

/// Drop the installer's mount prefix from the mountpoint column of a ZFS list cache
pub fn strip_mount_prefix(cache: &str, prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let mut out = String::with_capacity(cache.len());
    for line in cache.lines() {
        let mut columns: Vec<String> = line.split('\t').map(str::to_string).collect();
        if let Some(mountpoint) = columns.get_mut(1) {
            if mountpoint.as_str() == prefix {
                *mountpoint = "/".to_string();
            } else if let Some(rest) = mountpoint.strip_prefix(&format!("{}/", prefix)) {
                *mountpoint = format!("/{}", rest);
            }
        }
        out.push_str(&columns.join("\t"));
        out.push('\n');
    }
    out
}

/// State polled while waiting for ZED to fill the list caches
struct CacheProbe<'e> {
    executor: &'e mut dyn CommandExecutor,
    files: Vec<PathBuf>,
}

impl CacheProbe<'_> {
    async fn populated(&mut self) -> Result<bool> {
        for file in &self.files {
            let contents = self.executor.read_file(file).await?;
            if contents.map_or(true, |c| c.trim().is_empty()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Runs the in-target configuration steps
pub struct ChrootConfigurator<'a> {
    executor: &'a mut dyn CommandExecutor,
    plan: &'a InstallationPlan,
    settings: &'a InstallerSettings,
}

impl<'a> ChrootConfigurator<'a> {
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

    fn root(&self) -> String {
        self.settings.zfs_mount()
    }

    /// Host path of `path` inside the jail
    fn jail_path(&self, path: &str) -> PathBuf {
        self.settings
            .zfs_mount_dir
            .join(path.trim_start_matches('/'))
    }

    fn chroot(&self, program: &str) -> Cmd {
        Cmd::chroot(self.root(), program)
    }

    /// Bind the virtual filesystems and give the jail a resolver
    pub async fn prepare_chroot(&mut self) -> Result<()> {
        let root = self.root();
        for fs in VIRTUAL_FILESYSTEMS {
            self.log_and_execute(
                "Bind virtual filesystem",
                Cmd::new("mount")
                    .arg("--rbind")
                    .arg(format!("/{}", fs))
                    .arg(format!("{}/{}", root, fs)),
            )
            .await?;
        }

        let resolv = self.jail_path("/etc/resolv.conf");
        let line = format!("nameserver {}", self.settings.chroot_nameserver);
        self.executor.append_line(&resolv, &line).await?;
        Ok(())
    }

    /// rsync and the bootloader packages
    pub async fn install_packages(&mut self) -> Result<()> {
        self.apt_get(&["update"]).await?;
        let mut args = vec!["install", "-y", "rsync"];
        args.extend(bootloader_packages(self.plan.bootloader));
        self.apt_get(&args).await?;
        Ok(())
    }

    /// ZFS userspace from the distribution, or from the PPA when too old
    pub async fn install_zfs_packages(&mut self) -> Result<()> {
        let policy = self
            .log_and_execute(
                "Query ZFS package candidate",
                self.chroot("apt-cache").args(["policy", "zfsutils-linux"]),
            )
            .await?;
        let candidate = parse_candidate(&policy.stdout);

        match candidate {
            Some(version) if self.settings.zfs_version_adequate(&version) => {
                info!("Using distribution ZFS packages ({})", version);
            }
            other => {
                info!(
                    "Distribution ZFS version {} is below {}, adding {}",
                    other.as_deref().unwrap_or("(none)"),
                    self.settings.zfs_min_version,
                    self.settings.zfs_ppa
                );
                self.apt_get(&["install", "-y", "software-properties-common"])
                    .await?;
                let ppa = self.settings.zfs_ppa.clone();
                self.log_and_execute(
                    "Add ZFS PPA",
                    self.chroot("add-apt-repository").arg("--yes").arg(ppa),
                )
                .await?;
                self.apt_get(&["update"]).await?;
            }
        }

        let mut args = vec!["install", "-y"];
        args.extend(ZFS_PACKAGES);
        self.apt_get(&args).await?;
        Ok(())
    }

    /// One EFI entry per disk plus the swap volume
    pub async fn configure_fstab(&mut self) -> Result<()> {
        let plan = self.plan;
        let mut uuids = Vec::with_capacity(plan.target_disks.len());
        for disk in &plan.target_disks {
            let part = partition_path(disk, 1);
            let output = self
                .log_and_execute(
                    "Read EFI partition UUID",
                    Cmd::new("blkid").args(["-s", "UUID", "-o", "value"]).arg(&part),
                )
                .await?;
            let uuid = output.stdout.trim().to_string();
            if uuid.is_empty() {
                return Err(AutoInstallError::installation(format!(
                    "no filesystem UUID on {}",
                    part
                )));
            }
            uuids.push(uuid);
        }

        let swap = (plan.sizing.swap_gib > 0).then(|| swap_device(&plan.pools.root));
        let fstab = render_fstab(&uuids, swap.as_deref());
        debug!("fstab:\n{}", fstab);
        let path = self.jail_path("/etc/fstab");
        self.executor.write_file(&path, &fstab).await?;
        Ok(())
    }

    /// Install GRUB on the primary EFI partition and generate its menu
    pub async fn install_grub(&mut self) -> Result<()> {
        self.mount_primary_efi().await?;
        self.log_and_execute(
            "Install GRUB",
            self.chroot("grub-install").args([
                "--target=x86_64-efi",
                "--efi-directory=/boot/efi",
                "--bootloader-id=ubuntu",
                "--recheck",
                "--no-floppy",
            ]),
        )
        .await?;

        let defaults = self.jail_path("/etc/default/grub");
        let current = self.executor.read_file(&defaults).await?.unwrap_or_default();
        self.executor
            .write_file(&defaults, &patch_grub_defaults(&current))
            .await?;

        let update = self.chroot("update-grub");
        self.executor.run_best_effort(&update).await;
        Ok(())
    }

    /// Provision the ZFSBootMenu EFI image and its boot entry
    pub async fn install_zfsbootmenu(&mut self) -> Result<()> {
        let first_disk = self.first_disk()?;
        self.mount_primary_efi().await?;

        let image_dir = self.jail_path("/boot/efi/EFI/ZBM");
        self.log_and_execute(
            "Create ZFSBootMenu directory",
            Cmd::new("mkdir")
                .arg("-p")
                .arg(image_dir.to_string_lossy().to_string()),
        )
        .await?;
        let url = self.settings.zfsbootmenu_url.clone();
        self.log_and_execute(
            "Download ZFSBootMenu",
            self.chroot("curl")
                .args(["-fsSL", "-o", ZFSBOOTMENU_IMAGE])
                .arg(url),
        )
        .await?;
        self.log_and_execute(
            "Register ZFSBootMenu",
            boot_entry(&first_disk, "ZFSBootMenu", ZFSBOOTMENU_LOADER),
        )
        .await?;
        Ok(())
    }

    /// Mirror the primary EFI partition onto every other disk
    pub async fn sync_efi_partitions(&mut self) -> Result<()> {
        let plan = self.plan;
        let loader = match plan.bootloader {
            Bootloader::Grub => GRUB_LOADER,
            Bootloader::ZfsBootMenu => ZFSBOOTMENU_LOADER,
        };
        let primary = self.jail_path(&efi_mount_point(0));

        for (index, disk) in plan.target_disks.iter().enumerate().skip(1) {
            let mount_point = self.jail_path(&efi_mount_point(index));
            let mount_point = mount_point.to_string_lossy().to_string();
            info!("Synchronising EFI partition of {}", disk);

            let commands = [
                Cmd::new("mkdir").arg("-p").arg(&mount_point),
                Cmd::new("mount").arg(partition_path(disk, 1)).arg(&mount_point),
                Cmd::new("rsync")
                    .arg("-a")
                    .arg(format!("{}/", primary.display()))
                    .arg(format!("{}/", mount_point)),
                boot_entry(disk, &format!("ubuntu ({})", index + 1), loader),
            ];
            for cmd in &commands {
                if !self.executor.run_best_effort(cmd).await {
                    warn!("EFI synchronisation of {} incomplete", disk);
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn regenerate_initramfs(&mut self) -> Result<()> {
        self.log_and_execute(
            "Regenerate initramfs",
            self.chroot("update-initramfs").args(["-u", "-k", "all"]),
        )
        .await?;
        Ok(())
    }

    /// Populate the ZFS mount-ordering caches through a transient ZED
    pub async fn repair_zfs_cache(&mut self) -> Result<()> {
        let plan = self.plan;
        let cache_dir = self.jail_path(ZFS_LIST_CACHE_DIR);
        self.log_and_execute(
            "Create list cache directory",
            Cmd::new("mkdir")
                .arg("-p")
                .arg(cache_dir.to_string_lossy().to_string()),
        )
        .await?;

        let files: Vec<PathBuf> = [&plan.pools.boot, &plan.pools.root]
            .iter()
            .map(|pool| cache_dir.join(pool.as_str()))
            .collect();
        for file in &files {
            if !self.executor.path_exists(file).await? {
                self.executor.write_file(file, "").await?;
            }
        }

        let zed = self.chroot("zed").arg("-F");
        info!("Starting transient ZED: {}", zed);
        self.executor.spawn_background(&zed).await?;

        let outcome = self.wait_for_cache(&files).await;
        let stopped = self.executor.terminate_background().await?;
        debug!("Stopped {} background process(es)", stopped);
        outcome?;

        let prefix = self.root();
        for file in &files {
            let contents = self.executor.read_file(file).await?.unwrap_or_default();
            self.executor
                .write_file(file, &strip_mount_prefix(&contents, &prefix))
                .await?;
        }

        let cache_target = self.jail_path(ZPOOL_CACHE_FILE);
        self.log_and_execute(
            "Copy pool cache",
            Cmd::new("cp")
                .arg(ZPOOL_CACHE_FILE)
                .arg(cache_target.to_string_lossy().to_string()),
        )
        .await?;
        Ok(())
    }

    async fn wait_for_cache(&mut self, files: &[PathBuf]) -> Result<()> {
        let plan = self.plan;
        let policy = RetryPolicy::new(
            self.settings.zed_poll_interval(),
            self.settings.zed_deadline(),
        );

        let mut probe = CacheProbe {
            executor: &mut *self.executor,
            files: files.to_vec(),
        };
        if probe.populated().await? {
            return Ok(());
        }

        info!("ZFS list caches are empty, toggling canmount to trigger ZED");
        for dataset in [plan.boot_dataset()?, plan.bootfs_dataset()?] {
            let cmd = Cmd::new("zfs").args(["set", "canmount=on"]).arg(dataset);
            info!("Executing: Trigger ZED -> {}", cmd);
            probe.executor.run(&cmd).await?;
        }

        poll_until(&mut probe, policy, "ZFS list cache population", |probe| {
            Box::pin(probe.populated())
        })
        .await
        .map_err(|e| match e {
            AutoInstallError::TimeoutError(msg) => AutoInstallError::CacheIntegrityError(format!(
                "ZED never populated {}: {}",
                files
                    .iter()
                    .map(|f| f.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                msg
            )),
            other => other,
        })
    }

    /// Release every mount of the jail and export both pools
    pub async fn finalize(&mut self) -> Result<()> {
        let plan = self.plan;
        let root = self.root();

        for index in (0..plan.target_disks.len()).rev() {
            let mount_point = self.jail_path(&efi_mount_point(index));
            let cmd = Cmd::new("umount").arg(mount_point.to_string_lossy().to_string());
            self.executor.run_best_effort(&cmd).await;
        }
        for fs in VIRTUAL_FILESYSTEMS.iter().rev() {
            let cmd = Cmd::new("umount").arg("-Rl").arg(format!("{}/{}", root, fs));
            self.executor.run_best_effort(&cmd).await;
        }

        for pool in [&plan.pools.boot, &plan.pools.root] {
            self.log_and_execute(
                "Export pool",
                Cmd::new("zpool").arg("export").arg(pool.as_str()),
            )
            .await?;
        }
        info!("Pools exported, the system is ready to boot");
        Ok(())
    }

    fn first_disk(&self) -> Result<String> {
        self.plan
            .target_disks
            .first()
            .cloned()
            .ok_or_else(|| AutoInstallError::installation("no target disk selected"))
    }

    async fn mount_primary_efi(&mut self) -> Result<()> {
        let first_disk = self.first_disk()?;
        let mount_point = self.jail_path(&efi_mount_point(0));
        let mount_point = mount_point.to_string_lossy().to_string();
        self.log_and_execute(
            "Create EFI mount point",
            Cmd::new("mkdir").arg("-p").arg(&mount_point),
        )
        .await?;
        self.log_and_execute(
            "Mount EFI partition",
            Cmd::new("mount")
                .arg(partition_path(&first_disk, 1))
                .arg(&mount_point),
        )
        .await?;
        Ok(())
    }

    async fn apt_get(&mut self, args: &[&str]) -> Result<CommandOutput> {
        let cmd = self
            .chroot("apt-get")
            .args(args.iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive");
        self.log_and_execute("Run apt-get", cmd).await
    }

    async fn log_and_execute(&mut self, description: &str, cmd: Cmd) -> Result<CommandOutput> {
        info!("Executing: {} -> {}", description, cmd);
        self.executor.run(&cmd).await
    }
}

fn boot_entry(disk: &str, label: &str, loader: &str) -> Cmd {
    Cmd::new("efibootmgr")
        .args(["--create", "--disk"])
        .arg(disk)
        .args(["--part", "1", "--label"])
        .arg(label)
        .arg("--loader")
        .arg(loader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::plan::tests::sample_plan;
    use crate::executor::RecordingExecutor;

    const RPOOL_CACHE: &str = "/mnt/etc/zfs/zfs-list.cache/rpool";
    const BPOOL_CACHE: &str = "/mnt/etc/zfs/zfs-list.cache/bpool";

    #[test]
    fn test_patch_grub_defaults() {
        let original = "\
GRUB_DEFAULT=0
GRUB_TIMEOUT_STYLE=hidden
GRUB_TIMEOUT=0
GRUB_CMDLINE_LINUX_DEFAULT=\"quiet splash\"
GRUB_CMDLINE_LINUX=\"\"
#GRUB_TERMINAL=console
";
        let patched = patch_grub_defaults(original);
        assert!(patched.contains("#GRUB_TIMEOUT_STYLE=hidden\n"));
        assert!(patched.contains("GRUB_TIMEOUT=5\n"));
        assert!(patched.contains("GRUB_CMDLINE_LINUX_DEFAULT=\"\"\n"));
        assert!(patched.contains("\nGRUB_TERMINAL=console\n"));
        assert!(patched.ends_with("GRUB_DISABLE_OS_PROBER=true\n"));
        assert_eq!(patch_grub_defaults(&patched), patched);
    }

    #[test]
    fn test_strip_mount_prefix_only_touches_mountpoints() {
        let cache = "rpool/ROOT/box\t/mnt\ton\ton\nrpool/ROOT/box/var\t/mnt/var\toff\ton\nrpool/USERDATA\t/mntx\toff\n";
        assert_eq!(
            strip_mount_prefix(cache, "/mnt"),
            "rpool/ROOT/box\t/\ton\ton\nrpool/ROOT/box/var\t/var\toff\ton\nrpool/USERDATA\t/mntx\toff\n"
        );
    }

    #[test]
    fn test_parse_candidate() {
        let policy = "zfsutils-linux:\n  Installed: (none)\n  Candidate: 2.2.2-0ubuntu9\n";
        assert_eq!(parse_candidate(policy), Some("2.2.2-0ubuntu9".to_string()));
        assert_eq!(parse_candidate("  Candidate: (none)\n"), None);
    }

    #[test]
    fn test_render_fstab() {
        let fstab = render_fstab(
            &["AAAA-1111".to_string(), "BBBB-2222".to_string()],
            Some("/dev/zvol/rpool/swap"),
        );
        assert!(fstab.contains(&format!("UUID=AAAA-1111 /boot/efi vfat {} 0 0\n", EFI_MOUNT_OPTIONS)));
        assert!(fstab.contains("UUID=BBBB-2222 /boot/efi2 vfat"));
        assert!(fstab.ends_with("/dev/zvol/rpool/swap none swap discard 0 0\n"));
    }

    #[tokio::test]
    async fn test_old_zfs_uses_ppa() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.respond(&["apt-cache", "policy"], "  Candidate: 0.8.3-1ubuntu12\n");

        ChrootConfigurator::new(&mut exec, &plan, &settings)
            .install_zfs_packages()
            .await
            .unwrap();

        let ppa = exec.position(&["add-apt-repository", "ppa:jonathonf/zfs"]).unwrap();
        let install = exec.position(&["apt-get", "zfsutils-linux"]).unwrap();
        assert!(ppa < install);
    }

    #[tokio::test]
    async fn test_recent_zfs_uses_distribution() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.respond(&["apt-cache", "policy"], "  Candidate: 2.2.2-0ubuntu9\n");

        ChrootConfigurator::new(&mut exec, &plan, &settings)
            .install_zfs_packages()
            .await
            .unwrap();

        assert!(exec.matching(&["add-apt-repository"]).is_empty());
        assert!(exec.position(&["apt-get", "zfs-zed"]).is_some());
    }

    #[tokio::test]
    async fn test_grub_installation_patches_defaults() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.add_file("/mnt/etc/default/grub", "GRUB_TIMEOUT=0\n")
            .fail(&["update-grub"], 1, "warning: os-prober disabled");

        ChrootConfigurator::new(&mut exec, &plan, &settings)
            .install_grub()
            .await
            .unwrap();

        let mount = exec
            .position(&["mount", "/dev/disk/by-id/ata-X-part1", "/mnt/boot/efi"])
            .unwrap();
        let install = exec.position(&["grub-install"]).unwrap();
        assert!(mount < install);
        assert!(exec
            .file("/mnt/etc/default/grub")
            .unwrap()
            .contains("GRUB_DISABLE_OS_PROBER=true"));
    }

    #[tokio::test]
    async fn test_zfsbootmenu_provisioning() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();

        ChrootConfigurator::new(&mut exec, &plan, &settings)
            .install_zfsbootmenu()
            .await
            .unwrap();

        assert!(exec.matching(&["grub-install"]).is_empty());
        assert!(exec
            .position(&["curl", "https://get.zfsbootmenu.org/efi"])
            .is_some());
        let entry = &exec.matching(&["efibootmgr"])[0];
        assert!(entry.has_token(ZFSBOOTMENU_LOADER));
    }

    #[tokio::test]
    async fn test_secondary_efi_failures_are_tolerated() {
        let mut plan = sample_plan();
        plan.target_disks = vec!["/dev/disk/by-id/a".into(), "/dev/disk/by-id/b".into()];
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.fail(&["rsync"], 23, "partial transfer");

        ChrootConfigurator::new(&mut exec, &plan, &settings)
            .sync_efi_partitions()
            .await
            .unwrap();

        assert!(exec
            .position(&["mount", "/dev/disk/by-id/b-part1", "/mnt/boot/efi2"])
            .is_some());
        assert!(exec.matching(&["efibootmgr"]).is_empty());
    }

    #[tokio::test]
    async fn test_fstab_lists_efi_and_swap() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.respond(&["blkid"], "ABCD-1234\n");

        ChrootConfigurator::new(&mut exec, &plan, &settings)
            .configure_fstab()
            .await
            .unwrap();

        let fstab = exec.file("/mnt/etc/fstab").unwrap();
        assert!(fstab.contains("UUID=ABCD-1234 /boot/efi vfat"));
        assert!(fstab.contains("/dev/zvol/rpool/swap none swap"));
    }

    #[tokio::test]
    async fn test_fstab_requires_uuid() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();

        let err = ChrootConfigurator::new(&mut exec, &plan, &settings)
            .configure_fstab()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ata-X-part1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_repair_toggles_canmount_and_rewrites_paths() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.on_run_write(
            &["canmount=on", "bpool/BOOT/box"],
            BPOOL_CACHE,
            "bpool/BOOT/box\t/mnt/boot\ton\n",
        )
        .on_run_write(
            &["canmount=on", "rpool/ROOT/box"],
            RPOOL_CACHE,
            "rpool/ROOT/box\t/mnt\ton\n",
        );

        ChrootConfigurator::new(&mut exec, &plan, &settings)
            .repair_zfs_cache()
            .await
            .unwrap();

        assert_eq!(exec.background_commands().len(), 0);
        assert_eq!(exec.matching(&["zed", "-F"]).len(), 1);
        assert_eq!(exec.file(BPOOL_CACHE), Some("bpool/BOOT/box\t/boot\ton\n"));
        assert_eq!(exec.file(RPOOL_CACHE), Some("rpool/ROOT/box\t/\ton\n"));
        assert!(exec
            .command_lines()
            .contains(&"cp /etc/zfs/zpool.cache /mnt/etc/zfs/zpool.cache".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_never_populated_is_integrity_error() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();

        let err = ChrootConfigurator::new(&mut exec, &plan, &settings)
            .repair_zfs_cache()
            .await
            .unwrap_err();

        assert!(matches!(err, AutoInstallError::CacheIntegrityError(_)));
        assert_eq!(err.exit_code(), 5);
        assert_eq!(exec.background_commands().len(), 0);
        assert!(exec.matching(&["cp"]).is_empty());
    }

    #[tokio::test]
    async fn test_finalize_exports_pools() {
        let plan = sample_plan();
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();

        ChrootConfigurator::new(&mut exec, &plan, &settings)
            .finalize()
            .await
            .unwrap();

        let umount = exec.position(&["umount", "/mnt/boot/efi"]).unwrap();
        let export = exec.position(&["zpool", "export", "rpool"]).unwrap();
        assert!(umount < export);
    }
}
