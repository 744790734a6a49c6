// file: src/survey/mod.rs
// version: 1.0.0
// guid: 8e0a2c4d-6f8b-4d1e-a3c5-7e9b1d3f5a7c

//! Hardware & disk survey
//!
//! Candidate disks are reported by their `/dev/disk/by-id` name, which stays
//! stable across reboots, never by the kernel-assigned node.

pub mod hardware;
pub mod lsblk;

pub use hardware::HardwareProfile;
pub use lsblk::BlockDevice;

use crate::config::InstallerSettings;
use crate::error::AutoInstallError;
use crate::executor::{Cmd, CommandExecutor};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

pub const DISK_BY_ID_DIR: &str = "/dev/disk/by-id";

/// A disk the installer may use
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskCandidate {
    /// Stable identifier, e.g. `/dev/disk/by-id/ata-Samsung_SSD_860_S3Z9NB0K`
    pub by_id: String,
    /// Kernel node it currently resolves to, e.g. `/dev/sda`
    pub device: String,
    pub size_bytes: u64,
    pub model: Option<String>,
}

impl fmt::Display for DiskCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {:.1} GiB{})",
            self.by_id,
            self.device,
            self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            self.model
                .as_deref()
                .map(|m| format!(", {}", m))
                .unwrap_or_default()
        )
    }
}

/// Result of surveying the installer host
#[derive(Debug, Clone, Serialize)]
pub struct SurveyReport {
    pub disks: Vec<DiskCandidate>,
    pub hardware: HardwareProfile,
}

impl SurveyReport {
    pub fn disk(&self, by_id: &str) -> Option<&DiskCandidate> {
        self.disks.iter().find(|d| d.by_id == by_id)
    }
}

pub struct HardwareSurveyor<'a> {
    executor: &'a mut dyn CommandExecutor,
    settings: &'a InstallerSettings,
}

impl<'a> HardwareSurveyor<'a> {
    pub fn new(executor: &'a mut dyn CommandExecutor, settings: &'a InstallerSettings) -> Self {
        Self { executor, settings }
    }

    pub async fn survey(&mut self) -> Result<SurveyReport> {
        let disks = self.candidate_disks().await?;
        let hardware = HardwareProfile::detect(&mut *self.executor).await;
        Ok(SurveyReport { disks, hardware })
    }

    /// Enumerate installable disks by stable id
    pub async fn candidate_disks(&mut self) -> Result<Vec<DiskCandidate>> {
        info!("Surveying block devices");

        let by_id = self.stable_names().await?;

        let lsblk = self
            .executor
            .run(&Cmd::new("lsblk").args(["-J", "-b", "-o", "NAME,TYPE,RM,SIZE,MODEL,MOUNTPOINT"]))
            .await?;
        let devices = lsblk::parse_lsblk(&lsblk.stdout)?;

        let proc_mounts = self
            .executor
            .read_file(Path::new("/proc/mounts"))
            .await?
            .unwrap_or_default();
        let mut mounted = lsblk::mounted_sources(&proc_mounts);
        // /dev/mapper and /dev/disk/* sources are symlinks; resolve them too
        for source in proc_mounts
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .filter(|s| s.starts_with("/dev/"))
        {
            if let Ok(real) = self.executor.canonicalize(Path::new(source)).await {
                if let Some(name) = real.file_name() {
                    mounted.insert(name.to_string_lossy().to_string());
                }
            }
        }

        let mut disks: Vec<DiskCandidate> =
            lsblk::installable_disks(&devices, &mounted, self.settings.exclude_removable)
                .into_iter()
                .filter_map(|dev| {
                    let device = format!("/dev/{}", dev.name);
                    by_id.get(&device).map(|id| DiskCandidate {
                        by_id: id.clone(),
                        device,
                        size_bytes: dev.size,
                        model: dev.model.as_ref().map(|m| m.trim().to_string()),
                    })
                })
                .collect();
        disks.sort_by(|a, b| a.by_id.cmp(&b.by_id));

        if disks.is_empty() {
            return Err(AutoInstallError::NoSuitableDisksError);
        }
        for disk in &disks {
            debug!("Candidate disk: {}", disk);
        }
        info!("Found {} candidate disk(s)", disks.len());
        Ok(disks)
    }

    /// Map each kernel disk node to its preferred `/dev/disk/by-id` name
    async fn stable_names(&mut self) -> Result<BTreeMap<String, String>> {
        let entries = self
            .executor
            .list_dir(Path::new(DISK_BY_ID_DIR))
            .await
            .map_err(|e| {
                AutoInstallError::installation(format!(
                    "Cannot list {}: {}",
                    DISK_BY_ID_DIR, e
                ))
            })?;

        let mut by_device: BTreeMap<String, String> = BTreeMap::new();
        for entry in entries.iter().filter(|e| !e.contains("-part")) {
            let link = format!("{}/{}", DISK_BY_ID_DIR, entry);
            let Ok(target) = self.executor.canonicalize(Path::new(&link)).await else {
                continue;
            };
            let device = target.to_string_lossy().to_string();
            match by_device.get(&device) {
                Some(current) if !prefer(&link, current) => {}
                _ => {
                    by_device.insert(device, link);
                }
            }
        }
        Ok(by_device)
    }
}

/// Whether `candidate` is a better stable name than `current`
///
/// Vendor/model/serial names read better than `wwn-` and `nvme-eui.` ones.
fn prefer(candidate: &str, current: &str) -> bool {
    let generic = |name: &str| {
        let base = name.rsplit('/').next().unwrap_or(name);
        base.starts_with("wwn-") || base.starts_with("nvme-eui.")
    };
    match (generic(candidate), generic(current)) {
        (false, true) => true,
        (true, false) => false,
        _ => candidate < current,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::executor::RecordingExecutor;

    pub(crate) fn fake_host(exec: &mut RecordingExecutor) {
        exec.add_dir(
            DISK_BY_ID_DIR,
            &[
                "ata-Samsung_SSD_S1",
                "ata-Samsung_SSD_S1-part1",
                "wwn-0x5002538",
                "ata-WDC_W2",
                "usb-Stick_S3",
                "nvme-eui.0025",
                "nvme-NVMe_N4",
            ],
        )
        .add_link("/dev/disk/by-id/ata-Samsung_SSD_S1", "/dev/sda")
        .add_link("/dev/disk/by-id/ata-Samsung_SSD_S1-part1", "/dev/sda1")
        .add_link("/dev/disk/by-id/wwn-0x5002538", "/dev/sda")
        .add_link("/dev/disk/by-id/ata-WDC_W2", "/dev/sdb")
        .add_link("/dev/disk/by-id/usb-Stick_S3", "/dev/sdc")
        .add_link("/dev/disk/by-id/nvme-eui.0025", "/dev/nvme0n1")
        .add_link("/dev/disk/by-id/nvme-NVMe_N4", "/dev/nvme0n1")
        .add_link("/dev/mapper/cryptdata", "/dev/dm-0")
        .add_file(
            "/proc/mounts",
            "/dev/mapper/cryptdata /home ext4 rw 0 0\n/dev/sdb1 /cdrom iso9660 ro 0 0\n",
        )
        .respond(&["lsblk"], lsblk::tests::SAMPLE_LSBLK);
    }

    #[tokio::test]
    async fn test_candidates_use_stable_names() {
        let mut exec = RecordingExecutor::new();
        fake_host(&mut exec);
        let settings = InstallerSettings::default();

        let disks = HardwareSurveyor::new(&mut exec, &settings)
            .candidate_disks()
            .await
            .unwrap();
        let ids: Vec<&str> = disks.iter().map(|d| d.by_id.as_str()).collect();
        assert_eq!(ids, vec!["/dev/disk/by-id/ata-Samsung_SSD_S1"]);
        assert_eq!(disks[0].device, "/dev/sda");
        assert_eq!(disks[0].size_bytes, 500_107_862_016);
    }

    #[tokio::test]
    async fn test_removable_allowed_by_settings() {
        let mut exec = RecordingExecutor::new();
        fake_host(&mut exec);
        let settings = InstallerSettings {
            exclude_removable: false,
            ..Default::default()
        };

        let disks = HardwareSurveyor::new(&mut exec, &settings)
            .candidate_disks()
            .await
            .unwrap();
        assert!(disks.iter().any(|d| d.by_id.ends_with("usb-Stick_S3")));
        assert!(disks.iter().all(|d| !d.by_id.contains("nvme")));
    }

    #[tokio::test]
    async fn test_no_disks_is_fatal() {
        let mut exec = RecordingExecutor::new();
        exec.add_dir(DISK_BY_ID_DIR, &[])
            .respond(&["lsblk"], r#"{"blockdevices": []}"#);
        let settings = InstallerSettings::default();

        let err = HardwareSurveyor::new(&mut exec, &settings)
            .candidate_disks()
            .await
            .unwrap_err();
        assert!(matches!(err, AutoInstallError::NoSuitableDisksError));
    }

    #[test]
    fn test_prefer_vendor_names() {
        assert!(prefer("/dev/disk/by-id/ata-A", "/dev/disk/by-id/wwn-1"));
        assert!(!prefer("/dev/disk/by-id/nvme-eui.1", "/dev/disk/by-id/nvme-X"));
        assert!(prefer("/dev/disk/by-id/ata-A", "/dev/disk/by-id/ata-B"));
    }
}
