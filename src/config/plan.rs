// file: src/config/plan.rs
// version: 1.0.0
// guid: 6b8d0f2a-4c6e-4a1b-9d3f-5e7a9c1b3d5e

//! The installation plan: every parameter of one run
//!
//! Built by the configuration collector, then handed by shared reference to
//! every installer step.

use super::datasets::{DatasetLayout, TemplateValues};
use super::env;
use super::vdev::VdevTopology;
use super::{Bootloader, DesktopEnvironment, InstallMethod, UbuntuRelease};
use crate::executor::Secret;
use crate::Result;
use serde::Serialize;

/// Name of the boot pool; fixed so bootloaders can find it
pub const BOOT_POOL_NAME: &str = "bpool";

pub const DEFAULT_RPOOL_NAME: &str = "rpool";

pub const DEFAULT_RPOOL_OPTIONS: &str = "-o ashift=12 -o autotrim=on \
-O acltype=posixacl -O compression=lz4 -O dnodesize=auto -O normalization=formD \
-O relatime=on -O xattr=sa -O devices=off";

pub const DEFAULT_BPOOL_OPTIONS: &str = "-o ashift=12 -o autotrim=on \
-o cachefile=/etc/zfs/zpool.cache -o compatibility=grub2 -O devices=off \
-O acltype=posixacl -O xattr=sa -O compression=lz4 -O normalization=formD -O relatime=on";

/// Datasets created in the boot pool
pub const BOOT_DATASET_TEMPLATE: &str = "\
BOOT            canmount=off mountpoint=none
BOOT/{hostname} mountpoint=/boot
";

pub const DEFAULT_BOOT_PARTITION_MIB: u64 = 2048;
pub const DEFAULT_SWAP_GIB: u64 = 2;
pub const DEFAULT_FREE_TAIL_GIB: u64 = 0;

/// Identity of the installed operating system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsIdentity {
    pub release: UbuntuRelease,
    pub hostname: String,
    pub username: String,
    #[serde(skip)]
    pub password: Secret,
    pub full_name: String,
    pub timezone: String,
    pub locale: String,
    pub keyboard_layout: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolNames {
    pub root: String,
    pub boot: String,
}

impl PoolNames {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            boot: BOOT_POOL_NAME.to_string(),
        }
    }
}

/// Sizes, MiB for the boot partition and GiB for the rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sizing {
    pub boot_partition_mib: u64,
    pub swap_gib: u64,
    pub free_tail_gib: u64,
}

impl Default for Sizing {
    fn default() -> Self {
        Self {
            boot_partition_mib: DEFAULT_BOOT_PARTITION_MIB,
            swap_gib: DEFAULT_SWAP_GIB,
            free_tail_gib: DEFAULT_FREE_TAIL_GIB,
        }
    }
}

/// Complete parameter set for one installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallationPlan {
    /// Stable `/dev/disk/by-id` paths, in selection order
    pub target_disks: Vec<String>,
    pub vdev_topology: VdevTopology,
    #[serde(skip)]
    pub passphrase: Secret,
    pub pools: PoolNames,
    pub rpool_options: Vec<String>,
    pub bpool_options: Vec<String>,
    pub dataset_template: String,
    /// Unix timestamp stamped on the bootable dataset
    pub last_used: i64,
    pub os: OsIdentity,
    pub desktop: DesktopEnvironment,
    pub bootloader: Bootloader,
    pub install_method: InstallMethod,
    pub timeshift_path: Option<String>,
    pub enable_ssh: bool,
    pub sizing: Sizing,
}

impl InstallationPlan {
    pub fn encrypted(&self) -> bool {
        !self.passphrase.is_empty()
    }

    fn template_values(&self) -> TemplateValues<'_> {
        TemplateValues {
            hostname: &self.os.hostname,
            username: &self.os.username,
            last_used: self.last_used,
        }
    }

    /// Root pool datasets with placeholders resolved
    pub fn dataset_layout(&self) -> Result<DatasetLayout> {
        DatasetLayout::from_template(&self.dataset_template, &self.template_values())
    }

    /// Boot pool datasets with placeholders resolved
    pub fn boot_dataset_layout(&self) -> Result<DatasetLayout> {
        DatasetLayout::from_template(BOOT_DATASET_TEMPLATE, &self.template_values())
    }

    /// Full name of the dataset marked bootable, e.g. `rpool/ROOT/box`
    pub fn bootfs_dataset(&self) -> Result<String> {
        let layout = self.dataset_layout()?;
        Ok(format!("{}/{}", self.pools.root, layout.bootable()?.path))
    }

    /// Full name of the dataset mounted at `/boot`
    pub fn boot_dataset(&self) -> Result<String> {
        let layout = self.boot_dataset_layout()?;
        Ok(format!("{}/{}", self.pools.boot, layout.bootable_at("/boot")?.path))
    }

    /// `(variable, value, secret)` triples reproducing this plan
    ///
    /// `last_used` is left out: a replayed install stamps its own
    /// `com.ubuntu.zsys:last-used` time.
    pub fn to_env(&self) -> Vec<(&'static str, String, bool)> {
        let flag = |b: bool| if b { "1" } else { "0" }.to_string();
        vec![
            (env::ZFS_UBUNTU_VERSION, self.os.release.version().to_string(), false),
            (env::ZFS_INSTALL_METHOD, self.install_method.as_str().to_string(), false),
            (
                env::ZFS_TIMESHIFT_PATH,
                self.timeshift_path.clone().unwrap_or_default(),
                false,
            ),
            (env::ZFS_USERNAME, self.os.username.clone(), false),
            (
                env::ZFS_USER_PASSWORD,
                self.os.password.expose().to_string(),
                true,
            ),
            (env::ZFS_USER_FULLNAME, self.os.full_name.clone(), false),
            (env::ZFS_HOSTNAME, self.os.hostname.clone(), false),
            (env::ZFS_TIMEZONE, self.os.timezone.clone(), false),
            (env::ZFS_LOCALE, self.os.locale.clone(), false),
            (env::ZFS_KEYBOARD_LAYOUT, self.os.keyboard_layout.clone(), false),
            (env::ZFS_DESKTOP_ENVIRONMENT, self.desktop.as_str().to_string(), false),
            (
                env::ZFS_USE_ZFSBOOTMENU,
                flag(self.bootloader == Bootloader::ZfsBootMenu),
                false,
            ),
            (env::ZFS_ENABLE_SSH, flag(self.enable_ssh), false),
            (env::ZFS_SELECTED_DISKS, self.target_disks.join(","), false),
            (env::ZFS_VDEV_CONFIGS, self.vdev_topology.to_string(), false),
            (
                env::ZFS_BOOT_PARTITION_SIZE,
                format!("{}M", self.sizing.boot_partition_mib),
                false,
            ),
            (
                env::ZFS_PASSPHRASE,
                self.passphrase.expose().to_string(),
                true,
            ),
            (env::ZFS_RPOOL_NAME, self.pools.root.clone(), false),
            (env::ZFS_SWAP_SIZE, self.sizing.swap_gib.to_string(), false),
            (
                env::ZFS_FREE_TAIL_SPACE,
                self.sizing.free_tail_gib.to_string(),
                false,
            ),
            (env::ZFS_BPOOL_CREATE_OPTIONS, self.bpool_options.join(" "), false),
            (env::ZFS_RPOOL_CREATE_OPTIONS, self.rpool_options.join(" "), false),
            (env::ZFS_DATASET_CREATE_OPTIONS, self.dataset_template.clone(), false),
        ]
    }
}

/// Split whitespace separated `zpool create` options
pub fn split_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::datasets::DEFAULT_DATASET_TEMPLATE;

    pub(crate) fn sample_plan() -> InstallationPlan {
        InstallationPlan {
            target_disks: vec!["/dev/disk/by-id/ata-X".to_string()],
            vdev_topology: VdevTopology::single_disk(),
            passphrase: Secret::default(),
            pools: PoolNames::new("rpool"),
            rpool_options: split_options(DEFAULT_RPOOL_OPTIONS),
            bpool_options: split_options(DEFAULT_BPOOL_OPTIONS),
            dataset_template: DEFAULT_DATASET_TEMPLATE.to_string(),
            last_used: 1_700_000_000,
            os: OsIdentity {
                release: UbuntuRelease::Noble,
                hostname: "box".to_string(),
                username: "jane".to_string(),
                password: Secret::new("hunter22"),
                full_name: "Jane Doe".to_string(),
                timezone: "UTC".to_string(),
                locale: "en_US.UTF-8".to_string(),
                keyboard_layout: "us".to_string(),
            },
            desktop: DesktopEnvironment::Minimal,
            bootloader: Bootloader::Grub,
            install_method: InstallMethod::Debootstrap,
            timeshift_path: None,
            enable_ssh: false,
            sizing: Sizing::default(),
        }
    }

    #[test]
    fn test_bootable_datasets() {
        let plan = sample_plan();
        assert_eq!(plan.bootfs_dataset().unwrap(), "rpool/ROOT/box");
        assert_eq!(plan.boot_dataset().unwrap(), "bpool/BOOT/box");
        assert!(!plan.encrypted());
    }

    #[test]
    fn test_to_env_marks_secrets() {
        let plan = sample_plan();
        let env = plan.to_env();
        let secrets: Vec<&str> = env.iter().filter(|e| e.2).map(|e| e.0).collect();
        assert_eq!(secrets, vec!["ZFS_USER_PASSWORD", "ZFS_PASSPHRASE"]);
        assert!(env
            .iter()
            .any(|(k, v, _)| *k == "ZFS_BOOT_PARTITION_SIZE" && v == "2048M"));
    }

    #[test]
    fn test_to_env_ignores_install_time() {
        let earlier = sample_plan();
        let mut later = sample_plan();
        later.last_used += 3600;
        assert_eq!(earlier.to_env(), later.to_env());
    }
}
