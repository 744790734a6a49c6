// file: src/installer/base_system.rs
// version: 1.0.0
// guid: 5a7c9e1b-3d5f-4b8a-a0c2-4e6a8c0e2b4d

//! Base system installation on the temporary partition
//!
//! The system is first installed on partition 4 of the first target disk,
//! mounted at `temp_mount_dir`, and later copied onto the ZFS datasets.

use super::partition::partition_path;
use crate::config::{InstallationPlan, InstallerSettings, UbuntuRelease};
use crate::error::AutoInstallError;
use crate::executor::{Cmd, CommandExecutor, CommandOutput, Secret};
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Pseudo filesystems bound into a jail before running commands in it
pub const VIRTUAL_FILESYSTEMS: [&str; 3] = ["dev", "proc", "sys"];

const UBUNTU_KEYRING: &str = "/usr/share/keyrings/ubuntu-archive-keyring.gpg";
const COMPONENTS: &str = "main restricted universe multiverse";

/// Contents of `/etc/hosts` for `hostname`
pub fn hosts_file(hostname: &str) -> String {
    format!(
        "127.0.0.1\tlocalhost\n\
         127.0.1.1\t{hostname}\n\
         \n\
         ::1\tip6-localhost ip6-loopback\n\
         ff02::1\tip6-allnodes\n\
         ff02::2\tip6-allrouters\n"
    )
}

/// APT source configuration: `(path relative to the jail, contents)`
pub fn apt_sources(release: UbuntuRelease, mirror: &str) -> (&'static str, String) {
    let codename = release.codename();
    let suites = [
        codename.to_string(),
        format!("{}-updates", codename),
        format!("{}-backports", codename),
        format!("{}-security", codename),
    ];

    if release.uses_deb822_sources() {
        let contents = format!(
            "Types: deb\nURIs: {}\nSuites: {}\nComponents: {}\nSigned-By: {}\n",
            mirror,
            suites.join(" "),
            COMPONENTS,
            UBUNTU_KEYRING
        );
        ("etc/apt/sources.list.d/ubuntu.sources", contents)
    } else {
        let contents: String = suites
            .iter()
            .map(|suite| format!("deb {} {} {}\n", mirror, suite, COMPONENTS))
            .collect();
        ("etc/apt/sources.list", contents)
    }
}

/// Contents of `/etc/default/keyboard`
pub fn keyboard_file(layout: &str) -> String {
    format!(
        "XKBMODEL=\"pc105\"\nXKBLAYOUT=\"{}\"\nXKBVARIANT=\"\"\nXKBOPTIONS=\"\"\nBACKSPACE=\"guess\"\n",
        layout
    )
}

/// Installs the base system with `debootstrap` or restores it from Timeshift
pub struct BaseSystemInstaller<'a> {
    executor: &'a mut dyn CommandExecutor,
    plan: &'a InstallationPlan,
    settings: &'a InstallerSettings,
}

impl<'a> BaseSystemInstaller<'a> {
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

    fn target(&self) -> String {
        self.settings.temp_mount()
    }

    fn target_path(&self, relative: &str) -> PathBuf {
        self.settings.temp_mount_dir.join(relative)
    }

    /// Bootstrap a fresh system and configure its identity
    pub async fn debootstrap(&mut self) -> Result<()> {
        let plan = self.plan;
        let target = self.target();
        info!(
            "Installing Ubuntu {} ({}) with debootstrap",
            plan.os.release.version(),
            plan.os.release.codename()
        );

        self.prepare_temporary_volume().await?;
        self.log_and_execute(
            "Bootstrap base system",
            Cmd::new("debootstrap")
                .arg(plan.os.release.codename())
                .arg(&target)
                .arg(&self.settings.ubuntu_mirror),
        )
        .await?;

        self.bind_virtual_filesystems().await?;
        self.write_identity_files().await?;

        let (sources_path, sources) = apt_sources(plan.os.release, &self.settings.ubuntu_mirror);
        let sources_path = self.target_path(sources_path);
        self.executor.write_file(&sources_path, &sources).await?;
        self.apt_get(&["update"]).await?;

        self.create_user().await?;
        self.configure_locale().await?;

        let mut packages = vec!["linux-generic", "locales", "console-setup", "sudo"];
        if let Some(meta) = plan.desktop.meta_package() {
            packages.push(meta);
        }
        if plan.enable_ssh {
            packages.push("openssh-server");
        }
        let mut args = vec!["install", "-y"];
        args.extend(packages);
        self.apt_get(&args).await?;

        if plan.enable_ssh {
            self.log_and_execute(
                "Enable SSH server",
                Cmd::chroot(&target, "systemctl").args(["enable", "ssh"]),
            )
            .await?;
        }

        self.unbind_virtual_filesystems().await;
        info!("Base system installed in {}", target);
        Ok(())
    }

    /// Copy the newest Timeshift snapshot onto the temporary volume
    pub async fn timeshift_restore(&mut self) -> Result<()> {
        let plan = self.plan;
        let backup_root = plan.timeshift_path.as_deref().ok_or_else(|| {
            AutoInstallError::NoSnapshotFoundError("no Timeshift backup path was given".to_string())
        })?;
        let snapshot = self.latest_snapshot(backup_root).await?;
        info!("Restoring Timeshift snapshot {}", snapshot.display());

        self.prepare_temporary_volume().await?;
        let source = format!("{}/localhost/", snapshot.display());
        self.log_and_execute(
            "Restore snapshot",
            Cmd::new("rsync")
                .arg("-aAX")
                .arg(source)
                .arg(format!("{}/", self.target())),
        )
        .await?;

        let hostname_path = self.target_path("etc/hostname");
        let current = self.executor.read_file(&hostname_path).await?;
        if current.as_deref().map(str::trim) != Some(plan.os.hostname.as_str()) {
            info!("Renaming restored system to {}", plan.os.hostname);
            let hosts_path = self.target_path("etc/hosts");
            self.executor
                .write_file(&hostname_path, &format!("{}\n", plan.os.hostname))
                .await?;
            self.executor
                .write_file(&hosts_path, &hosts_file(&plan.os.hostname))
                .await?;
        }
        Ok(())
    }

    /// Newest entry of `<backup_root>/timeshift/snapshots`
    pub async fn latest_snapshot(&mut self, backup_root: &str) -> Result<PathBuf> {
        if !self.executor.path_exists(Path::new(backup_root)).await? {
            return Err(AutoInstallError::NoSnapshotFoundError(format!(
                "backup path {} does not exist",
                backup_root
            )));
        }
        let snapshots = Path::new(backup_root).join("timeshift").join("snapshots");
        let entries = if self.executor.path_exists(&snapshots).await? {
            self.executor.list_dir(&snapshots).await?
        } else {
            Vec::new()
        };
        // Timeshift names snapshots by timestamp, so the last entry is the newest
        entries
            .last()
            .map(|name| snapshots.join(name))
            .ok_or_else(|| {
                AutoInstallError::NoSnapshotFoundError(format!(
                    "no snapshots under {}",
                    snapshots.display()
                ))
            })
    }

    async fn prepare_temporary_volume(&mut self) -> Result<()> {
        let first_disk = self
            .plan
            .target_disks
            .first()
            .ok_or_else(|| AutoInstallError::installation("no target disk selected"))?;
        let volume = partition_path(first_disk, 4);
        let target = self.target();
        self.log_and_execute(
            "Format temporary volume",
            Cmd::new("mkfs.ext4").arg("-F").arg(&volume),
        )
        .await?;
        self.log_and_execute("Create mount point", Cmd::new("mkdir").arg("-p").arg(&target))
            .await?;
        self.log_and_execute(
            "Mount temporary volume",
            Cmd::new("mount").arg(&volume).arg(&target),
        )
        .await?;
        Ok(())
    }

    async fn bind_virtual_filesystems(&mut self) -> Result<()> {
        let target = self.target();
        for fs in VIRTUAL_FILESYSTEMS {
            self.log_and_execute(
                "Bind virtual filesystem",
                Cmd::new("mount")
                    .arg("--rbind")
                    .arg(format!("/{}", fs))
                    .arg(format!("{}/{}", target, fs)),
            )
            .await?;
        }
        Ok(())
    }

    async fn unbind_virtual_filesystems(&mut self) {
        let target = self.target();
        for fs in VIRTUAL_FILESYSTEMS.iter().rev() {
            let cmd = Cmd::new("umount").arg("-Rl").arg(format!("{}/{}", target, fs));
            self.executor.run_best_effort(&cmd).await;
        }
    }

    async fn write_identity_files(&mut self) -> Result<()> {
        let hostname = &self.plan.os.hostname;
        let hostname_path = self.target_path("etc/hostname");
        let hosts_path = self.target_path("etc/hosts");
        self.executor
            .write_file(&hostname_path, &format!("{}\n", hostname))
            .await?;
        self.executor
            .write_file(&hosts_path, &hosts_file(hostname))
            .await?;
        Ok(())
    }

    async fn create_user(&mut self) -> Result<()> {
        let plan = self.plan;
        let os = &plan.os;
        let target = self.target();
        info!("Creating user {}", os.username);

        self.log_and_execute(
            "Create user",
            Cmd::chroot(&target, "useradd")
                .args(["-m", "-s", "/bin/bash", "-G", "sudo", "-c"])
                .arg(&os.full_name)
                .arg(&os.username),
        )
        .await?;

        let credentials = Secret::new(format!("{}:{}", os.username, os.password.expose()));
        self.log_and_execute(
            "Set user password",
            Cmd::chroot(&target, "chpasswd").stdin_secret(&credentials),
        )
        .await?;
        Ok(())
    }

    async fn configure_locale(&mut self) -> Result<()> {
        let plan = self.plan;
        let os = &plan.os;
        let target = self.target();
        let timezone_path = self.target_path("etc/timezone");
        let locale_path = self.target_path("etc/default/locale");
        let keyboard_path = self.target_path("etc/default/keyboard");

        self.log_and_execute(
            "Set timezone",
            Cmd::chroot(&target, "ln")
                .arg("-sf")
                .arg(format!("/usr/share/zoneinfo/{}", os.timezone))
                .arg("/etc/localtime"),
        )
        .await?;
        self.executor
            .write_file(&timezone_path, &format!("{}\n", os.timezone))
            .await?;

        if let Err(e) = self
            .log_and_execute(
                "Generate locale",
                Cmd::chroot(&target, "locale-gen").arg(&os.locale),
            )
            .await
        {
            warn!("Locale generation failed, continuing: {}", e);
        }
        self.executor
            .write_file(&locale_path, &format!("LANG={}\n", os.locale))
            .await?;
        self.executor
            .write_file(&keyboard_path, &keyboard_file(&os.keyboard_layout))
            .await?;
        Ok(())
    }

    async fn apt_get(&mut self, args: &[&str]) -> Result<CommandOutput> {
        let cmd = Cmd::chroot(self.target(), "apt-get")
            .args(args.iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive");
        self.log_and_execute("Run apt-get", cmd).await
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
    use crate::config::{DesktopEnvironment, InstallMethod};
    use crate::executor::RecordingExecutor;

    #[test]
    fn test_sources_format_follows_release() {
        let (path, contents) = apt_sources(UbuntuRelease::Noble, "http://mirror");
        assert_eq!(path, "etc/apt/sources.list.d/ubuntu.sources");
        assert!(contents.contains("Suites: noble noble-updates noble-backports noble-security"));

        let (path, contents) = apt_sources(UbuntuRelease::Jammy, "http://mirror");
        assert_eq!(path, "etc/apt/sources.list");
        assert!(contents.starts_with("deb http://mirror jammy main restricted universe multiverse\n"));
    }

    #[tokio::test]
    async fn test_debootstrap_installs_and_configures() {
        let mut plan = sample_plan();
        plan.desktop = DesktopEnvironment::Kde;
        plan.enable_ssh = true;
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();

        BaseSystemInstaller::new(&mut exec, &plan, &settings)
            .debootstrap()
            .await
            .unwrap();

        let lines = exec.command_lines();
        assert!(lines.contains(&"mkfs.ext4 -F /dev/disk/by-id/ata-X-part4".to_string()));
        assert!(lines.contains(
            &"debootstrap noble /target http://archive.ubuntu.com/ubuntu".to_string()
        ));
        assert_eq!(exec.file("/target/etc/hostname"), Some("box\n"));
        assert!(exec
            .file("/target/etc/apt/sources.list.d/ubuntu.sources")
            .is_some());

        let chpasswd = &exec.matching(&["chpasswd"])[0];
        assert_eq!(chpasswd.get_stdin().map(Secret::expose), Some("jane:hunter22"));

        let install = &exec.matching(&["apt-get", "install"])[0];
        assert!(install.has_token("kubuntu-desktop"));
        assert!(install.has_token("openssh-server"));
        assert!(exec.position(&["systemctl", "enable", "ssh"]).is_some());

        let mount = exec.position(&["mount", "/target"]).unwrap();
        let bootstrap = exec.position(&["debootstrap"]).unwrap();
        let bind = exec.position(&["mount", "--rbind", "/dev"]).unwrap();
        assert!(mount < bootstrap && bootstrap < bind);
    }

    #[tokio::test]
    async fn test_timeshift_picks_newest_snapshot() {
        let mut plan = sample_plan();
        plan.install_method = InstallMethod::TimeshiftRestore;
        plan.timeshift_path = Some("/media/backup".to_string());
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.add_dir("/media/backup", &["timeshift"])
            .add_dir(
                "/media/backup/timeshift/snapshots",
                &["2024-05-01_10-00-00", "2024-06-01_10-00-00", "2024-01-01_10-00-00"],
            )
            .add_file("/target/etc/hostname", "oldbox\n");

        BaseSystemInstaller::new(&mut exec, &plan, &settings)
            .timeshift_restore()
            .await
            .unwrap();

        let lines = exec.command_lines();
        assert!(lines.contains(
            &"rsync -aAX /media/backup/timeshift/snapshots/2024-06-01_10-00-00/localhost/ /target/"
                .to_string()
        ));
        assert_eq!(exec.file("/target/etc/hostname"), Some("box\n"));
        assert!(exec.matching(&["debootstrap"]).is_empty());
    }

    #[tokio::test]
    async fn test_timeshift_without_snapshots_fails() {
        let mut plan = sample_plan();
        plan.timeshift_path = Some("/media/backup".to_string());
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.add_dir("/media/backup", &[]);

        let err = BaseSystemInstaller::new(&mut exec, &plan, &settings)
            .timeshift_restore()
            .await
            .unwrap_err();
        assert!(matches!(err, AutoInstallError::NoSnapshotFoundError(_)));
        assert_eq!(err.exit_code(), 4);
        assert!(exec.matching(&["mkfs.ext4"]).is_empty());
    }

    #[tokio::test]
    async fn test_timeshift_missing_path_fails() {
        let mut plan = sample_plan();
        plan.timeshift_path = Some("/nowhere".to_string());
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();

        let err = BaseSystemInstaller::new(&mut exec, &plan, &settings)
            .timeshift_restore()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nowhere"));
    }
}
