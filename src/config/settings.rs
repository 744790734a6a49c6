// file: src/config/settings.rs
// version: 1.0.0
// guid: 5a7c9e1b-3d5f-4a8c-b0e2-4d6f8a0c2e4b

//! Installer policy settings loaded from TOML
//!
//! Every field has a default, so an empty or partial file is valid.

use crate::error::AutoInstallError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Settings file read when `--settings` is not given
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/zfs-root-installer.toml";

/// How ZFS package versions are compared against the minimum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionComparison {
    /// Dot-separated components compared as integers
    Numeric,
    /// Plain string comparison
    Lexical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Where the ZFS pools are mounted during installation
    pub zfs_mount_dir: PathBuf,
    /// Where the temporary base system is installed
    pub temp_mount_dir: PathBuf,
    pub efi_partition_mib: u64,
    /// Smallest temporary partition able to hold a base system
    pub temp_volume_min_gib: u64,
    pub dns_probe_address: String,
    pub chroot_nameserver: String,
    pub ubuntu_mirror: String,
    pub zfs_min_version: String,
    pub zfs_version_comparison: VersionComparison,
    pub zfs_ppa: String,
    pub zed_poll_interval_ms: u64,
    pub zed_deadline_ms: u64,
    pub zfsbootmenu_url: String,
    pub exclude_removable: bool,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            zfs_mount_dir: PathBuf::from("/mnt"),
            temp_mount_dir: PathBuf::from("/target"),
            efi_partition_mib: 512,
            temp_volume_min_gib: 12,
            dns_probe_address: "8.8.8.8".to_string(),
            chroot_nameserver: "8.8.8.8".to_string(),
            ubuntu_mirror: "http://archive.ubuntu.com/ubuntu".to_string(),
            zfs_min_version: "2.1.0".to_string(),
            zfs_version_comparison: VersionComparison::Numeric,
            zfs_ppa: "ppa:jonathonf/zfs".to_string(),
            zed_poll_interval_ms: 250,
            zed_deadline_ms: 5000,
            zfsbootmenu_url: "https://get.zfsbootmenu.org/efi".to_string(),
            exclude_removable: true,
        }
    }
}

impl InstallerSettings {
    /// Load from `path`, or from the default location when it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_SETTINGS_PATH);
                if !default.exists() {
                    debug!("No settings file at {}, using defaults", default.display());
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            AutoInstallError::ConfigError(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        let settings: Self = toml::from_str(&content)?;
        settings.validate()?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.efi_partition_mib == 0 {
            return Err(AutoInstallError::config("efi_partition_mib must be positive"));
        }
        if self.temp_volume_min_gib == 0 {
            return Err(AutoInstallError::config("temp_volume_min_gib must be positive"));
        }
        if self.zed_poll_interval_ms == 0 || self.zed_deadline_ms < self.zed_poll_interval_ms {
            return Err(AutoInstallError::config(
                "zed_deadline_ms must be at least zed_poll_interval_ms, and both positive",
            ));
        }
        if self.zfs_mount_dir == self.temp_mount_dir {
            return Err(AutoInstallError::config(
                "zfs_mount_dir and temp_mount_dir must differ",
            ));
        }
        Ok(())
    }

    pub fn zed_poll_interval(&self) -> Duration {
        Duration::from_millis(self.zed_poll_interval_ms)
    }

    pub fn zed_deadline(&self) -> Duration {
        Duration::from_millis(self.zed_deadline_ms)
    }

    /// `zfs_mount_dir` as a string for command arguments
    pub fn zfs_mount(&self) -> String {
        self.zfs_mount_dir.to_string_lossy().to_string()
    }

    /// `temp_mount_dir` as a string for command arguments
    pub fn temp_mount(&self) -> String {
        self.temp_mount_dir.to_string_lossy().to_string()
    }

    /// Whether a packaged ZFS `candidate` version meets the minimum
    pub fn zfs_version_adequate(&self, candidate: &str) -> bool {
        let candidate = upstream_version(candidate);
        let minimum = upstream_version(&self.zfs_min_version);
        let ordering = match self.zfs_version_comparison {
            VersionComparison::Lexical => candidate.cmp(minimum),
            VersionComparison::Numeric => compare_numeric(candidate, minimum),
        };
        ordering != Ordering::Less
    }
}

/// Strip a Debian epoch and revision: `1:2.1.5-1ubuntu6` becomes `2.1.5`
fn upstream_version(version: &str) -> &str {
    let version = version.trim();
    let version = version.split_once(':').map_or(version, |(_, v)| v);
    version.split_once('-').map_or(version, |(v, _)| v)
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let parts = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|p| {
                p.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let (a, b) = (parts(a), parts(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
