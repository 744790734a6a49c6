// file: src/config/mod.rs
// version: 2.0.0
// guid: a1b2c3d4-e5f6-7a8b-9c0d-1e2f3a4b5c6d

//! Configuration for the ZFS root installer
//!
//! Two layers live here: the per-run [`InstallationPlan`] collected from
//! `ZFS_*` variables or prompts, and the [`InstallerSettings`] policy knobs
//! loaded from TOML.

pub mod datasets;
pub mod env;
pub mod plan;
pub mod settings;
pub mod transcript;
pub mod validation;
pub mod vdev;

pub use datasets::{DatasetEntry, DatasetLayout};
pub use env::{EnvSource, ProcessEnv};
pub use plan::{InstallationPlan, OsIdentity, PoolNames, Sizing};
pub use settings::{InstallerSettings, VersionComparison};
pub use transcript::Transcript;
pub use vdev::{VdevGroup, VdevTopology};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Redundancy scheme of one vdev group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VdevKind {
    Stripe,
    Mirror,
    Raidz1,
    Raidz2,
    Raidz3,
}

impl VdevKind {
    pub const ALL: [VdevKind; 5] = [
        VdevKind::Stripe,
        VdevKind::Mirror,
        VdevKind::Raidz1,
        VdevKind::Raidz2,
        VdevKind::Raidz3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VdevKind::Stripe => "stripe",
            VdevKind::Mirror => "mirror",
            VdevKind::Raidz1 => "raidz1",
            VdevKind::Raidz2 => "raidz2",
            VdevKind::Raidz3 => "raidz3",
        }
    }

    /// Keyword placed before the members in `zpool create`; stripes have none
    pub fn zpool_keyword(&self) -> Option<&'static str> {
        match self {
            VdevKind::Stripe => None,
            other => Some(other.as_str()),
        }
    }

    /// Smallest member count `zpool` accepts for this kind
    pub fn min_members(&self) -> usize {
        match self {
            VdevKind::Stripe => 1,
            VdevKind::Mirror | VdevKind::Raidz1 => 2,
            VdevKind::Raidz2 => 3,
            VdevKind::Raidz3 => 4,
        }
    }
}

impl std::str::FromStr for VdevKind {
    type Err = crate::error::AutoInstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VdevKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| {
                crate::error::AutoInstallError::validation(format!("Unknown vdev kind: {}", s))
            })
    }
}

impl fmt::Display for VdevKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desktop installed into the new system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesktopEnvironment {
    Kde,
    Gnome,
    Xfce,
    Minimal,
}

impl DesktopEnvironment {
    pub const ALL: [DesktopEnvironment; 4] = [
        DesktopEnvironment::Kde,
        DesktopEnvironment::Gnome,
        DesktopEnvironment::Xfce,
        DesktopEnvironment::Minimal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DesktopEnvironment::Kde => "kde",
            DesktopEnvironment::Gnome => "gnome",
            DesktopEnvironment::Xfce => "xfce",
            DesktopEnvironment::Minimal => "minimal",
        }
    }

    /// Meta-package pulled in by the base system installer
    pub fn meta_package(&self) -> Option<&'static str> {
        match self {
            DesktopEnvironment::Kde => Some("kubuntu-desktop"),
            DesktopEnvironment::Gnome => Some("ubuntu-desktop"),
            DesktopEnvironment::Xfce => Some("xubuntu-desktop"),
            DesktopEnvironment::Minimal => None,
        }
    }
}

impl std::str::FromStr for DesktopEnvironment {
    type Err = crate::error::AutoInstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DesktopEnvironment::ALL
            .into_iter()
            .find(|d| d.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| {
                crate::error::AutoInstallError::validation(format!(
                    "Unknown desktop environment: {} (expected kde, gnome, xfce or minimal)",
                    s
                ))
            })
    }
}

/// Boot manager written to the EFI partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bootloader {
    Grub,
    ZfsBootMenu,
}

impl Bootloader {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bootloader::Grub => "GRUB",
            Bootloader::ZfsBootMenu => "ZFSBootMenu",
        }
    }
}

/// How the temporary base system is materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    Debootstrap,
    TimeshiftRestore,
}

impl InstallMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallMethod::Debootstrap => "debootstrap",
            InstallMethod::TimeshiftRestore => "timeshift_restore",
        }
    }
}

impl std::str::FromStr for InstallMethod {
    type Err = crate::error::AutoInstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "debootstrap" => Ok(InstallMethod::Debootstrap),
            "timeshift_restore" => Ok(InstallMethod::TimeshiftRestore),
            other => Err(crate::error::AutoInstallError::validation(format!(
                "Unknown install method: {} (expected debootstrap or timeshift_restore)",
                other
            ))),
        }
    }
}

/// Supported Ubuntu releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UbuntuRelease {
    Focal,
    Jammy,
    Noble,
    Oracular,
    Plucky,
}

impl UbuntuRelease {
    pub const ALL: [UbuntuRelease; 5] = [
        UbuntuRelease::Focal,
        UbuntuRelease::Jammy,
        UbuntuRelease::Noble,
        UbuntuRelease::Oracular,
        UbuntuRelease::Plucky,
    ];

    pub fn version(&self) -> &'static str {
        match self {
            UbuntuRelease::Focal => "20.04",
            UbuntuRelease::Jammy => "22.04",
            UbuntuRelease::Noble => "24.04",
            UbuntuRelease::Oracular => "24.10",
            UbuntuRelease::Plucky => "25.04",
        }
    }

    pub fn codename(&self) -> &'static str {
        match self {
            UbuntuRelease::Focal => "focal",
            UbuntuRelease::Jammy => "jammy",
            UbuntuRelease::Noble => "noble",
            UbuntuRelease::Oracular => "oracular",
            UbuntuRelease::Plucky => "plucky",
        }
    }

    /// Releases from 24.04 on ship apt sources in deb822 format
    pub fn uses_deb822_sources(&self) -> bool {
        *self >= UbuntuRelease::Noble
    }
}

impl std::str::FromStr for UbuntuRelease {
    type Err = crate::error::AutoInstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        UbuntuRelease::ALL
            .into_iter()
            .find(|r| r.version() == wanted || r.codename() == wanted)
            .ok_or_else(|| {
                crate::error::AutoInstallError::validation(format!(
                    "Unsupported Ubuntu version: {}",
                    s
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vdev_kind_parsing_and_keywords() {
        assert_eq!("mirror".parse::<VdevKind>().unwrap(), VdevKind::Mirror);
        assert_eq!(VdevKind::Stripe.zpool_keyword(), None);
        assert_eq!(VdevKind::Raidz2.zpool_keyword(), Some("raidz2"));
        assert!("raid5".parse::<VdevKind>().is_err());
    }

    #[test]
    fn test_release_lookup_by_version_or_codename() {
        assert_eq!("24.04".parse::<UbuntuRelease>().unwrap(), UbuntuRelease::Noble);
        assert_eq!("jammy".parse::<UbuntuRelease>().unwrap(), UbuntuRelease::Jammy);
        assert!(UbuntuRelease::Noble.uses_deb822_sources());
        assert!(!UbuntuRelease::Jammy.uses_deb822_sources());
        assert!("18.04".parse::<UbuntuRelease>().is_err());
    }

    #[test]
    fn test_desktop_meta_packages() {
        assert_eq!("KDE".parse::<DesktopEnvironment>().unwrap(), DesktopEnvironment::Kde);
        assert_eq!(DesktopEnvironment::Minimal.meta_package(), None);
        assert_eq!(
            DesktopEnvironment::Gnome.meta_package(),
            Some("ubuntu-desktop")
        );
    }
}
