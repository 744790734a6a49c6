// file: src/survey/lsblk.rs
// version: 1.0.0
// guid: 7c9e1a3b-5d7f-4b2c-9e4a-6b8d0f2a4c6e

//! `lsblk --json` parsing and the candidate disk filter

use crate::Result;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashSet;

/// Block device as reported by `lsblk -J -b -o NAME,TYPE,RM,SIZE,MODEL,MOUNTPOINT`
#[derive(Debug, Clone, Deserialize)]
pub struct BlockDevice {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub rm: bool,
    #[serde(default, deserialize_with = "flexible_u64")]
    pub size: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDevice>,
}

impl BlockDevice {
    /// Names of this device and everything stacked on it
    pub fn subtree_names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        for child in &self.children {
            names.extend(child.subtree_names());
        }
        names
    }

    /// Whether this device or anything stacked on it is mounted
    pub fn has_mountpoint(&self) -> bool {
        self.mountpoint.as_deref().is_some_and(|m| !m.is_empty())
            || self.children.iter().any(BlockDevice::has_mountpoint)
    }

    pub fn is_optical(&self) -> bool {
        self.device_type == "rom"
    }
}

/// Parse `lsblk --json` output
pub fn parse_lsblk(json: &str) -> Result<Vec<BlockDevice>> {
    let output: LsblkOutput = serde_json::from_str(json)?;
    Ok(output.blockdevices)
}

/// Kernel names of the devices behind `/proc/mounts` sources
pub fn mounted_sources(proc_mounts: &str) -> HashSet<String> {
    proc_mounts
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|source| source.starts_with("/dev/"))
        .filter_map(|source| source.rsplit('/').next())
        .map(str::to_string)
        .collect()
}

/// Whole disks that may be installed to
///
/// Optical drives, non-disk devices and any disk whose subtree backs a
/// mounted filesystem are dropped; removable disks are dropped when
/// `exclude_removable` is set.
pub fn installable_disks<'a>(
    devices: &'a [BlockDevice],
    mounted: &HashSet<String>,
    exclude_removable: bool,
) -> Vec<&'a BlockDevice> {
    devices
        .iter()
        .filter(|d| d.device_type == "disk")
        .filter(|d| !d.is_optical())
        .filter(|d| !(exclude_removable && d.rm))
        .filter(|d| !d.has_mountpoint())
        .filter(|d| !d.subtree_names().iter().any(|n| mounted.contains(*n)))
        .collect()
}

fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_u64() == Some(1),
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

fn flexible_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_LSBLK: &str = r#"{
      "blockdevices": [
        {"name": "sda", "type": "disk", "rm": false, "size": 500107862016, "model": "Samsung SSD", "mountpoint": null},
        {"name": "sdb", "type": "disk", "rm": "0", "size": "1000204886016", "model": "WDC", "mountpoint": null,
         "children": [{"name": "sdb1", "type": "part", "rm": "0", "size": "1000203837440", "mountpoint": "/cdrom"}]},
        {"name": "sdc", "type": "disk", "rm": true, "size": 32017047552, "model": "USB Stick", "mountpoint": null},
        {"name": "sr0", "type": "rom", "rm": true, "size": 1073741312, "model": "DVD", "mountpoint": null},
        {"name": "nvme0n1", "type": "disk", "rm": false, "size": 256060514304, "model": "NVMe",
         "children": [{"name": "nvme0n1p1", "type": "part", "rm": false, "size": 256059465728, "mountpoint": null,
           "children": [{"name": "cryptdata", "type": "crypt", "size": 256042688512, "mountpoint": null}]}]},
        {"name": "loop0", "type": "loop", "rm": false, "size": 2500000000, "mountpoint": "/rofs"}
      ]
    }"#;

    #[test]
    fn test_parse_mixed_field_types() {
        let devices = parse_lsblk(SAMPLE_LSBLK).unwrap();
        assert_eq!(devices.len(), 6);
        assert_eq!(devices[1].size, 1_000_204_886_016);
        assert!(!devices[1].rm);
        assert!(devices[2].rm);
        assert!(devices[1].has_mountpoint());
    }

    #[test]
    fn test_filter_excludes_optical_mounted_and_removable() {
        let devices = parse_lsblk(SAMPLE_LSBLK).unwrap();
        let mounted = mounted_sources("/dev/mapper/cryptdata /home ext4 rw 0 0\nproc /proc proc rw 0 0\n");
        assert!(mounted.contains("cryptdata"));

        let names: Vec<&str> = installable_disks(&devices, &mounted, true)
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["sda"]);

        let names: Vec<&str> = installable_disks(&devices, &mounted, false)
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["sda", "sdc"]);
    }
}
