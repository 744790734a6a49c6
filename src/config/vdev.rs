// file: src/config/vdev.rs
// version: 1.0.0
// guid: 4c2e8a1f-7b3d-4e6a-9c5f-0d1e2a3b4c5d

//! Vdev topology: how the selected disks are grouped into redundancy sets

use super::VdevKind;
use crate::error::AutoInstallError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One redundancy group, members are indices into the selected disk list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdevGroup {
    pub kind: VdevKind,
    pub members: Vec<usize>,
}

impl VdevGroup {
    pub fn new(kind: VdevKind, members: Vec<usize>) -> Self {
        Self { kind, members }
    }
}

impl fmt::Display for VdevGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self.members.iter().map(|m| m.to_string()).collect();
        write!(f, "{}:{}", self.kind, members.join(","))
    }
}

/// Ordered vdev groups forming the root and boot pools
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdevTopology {
    groups: Vec<VdevGroup>,
}

impl VdevTopology {
    pub fn new(groups: Vec<VdevGroup>) -> Self {
        Self { groups }
    }

    /// The only topology a single disk can have
    pub fn single_disk() -> Self {
        Self::new(vec![VdevGroup::new(VdevKind::Stripe, vec![0])])
    }

    pub fn groups(&self) -> &[VdevGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Indices already placed in some group
    pub fn assigned(&self) -> BTreeSet<usize> {
        self.groups
            .iter()
            .flat_map(|g| g.members.iter().copied())
            .collect()
    }

    /// Indices in `0..disk_count` not yet placed in any group
    pub fn unassigned(&self, disk_count: usize) -> Vec<usize> {
        let assigned = self.assigned();
        (0..disk_count).filter(|i| !assigned.contains(i)).collect()
    }

    /// Add a group after checking it against what is already assigned
    pub fn push(&mut self, group: VdevGroup, disk_count: usize) -> Result<()> {
        Self::check_group(&group, disk_count)?;
        let assigned = self.assigned();
        if let Some(dup) = group.members.iter().find(|m| assigned.contains(m)) {
            return Err(AutoInstallError::validation(format!(
                "Disk {} is already part of another vdev group",
                dup
            )));
        }
        self.groups.push(group);
        Ok(())
    }

    fn check_group(group: &VdevGroup, disk_count: usize) -> Result<()> {
        let unique: BTreeSet<usize> = group.members.iter().copied().collect();
        if unique.len() != group.members.len() {
            return Err(AutoInstallError::validation(format!(
                "Vdev group '{}' lists a disk more than once",
                group
            )));
        }
        if let Some(out) = group.members.iter().find(|m| **m >= disk_count) {
            return Err(AutoInstallError::validation(format!(
                "Disk index {} is out of range, only {} disk(s) selected",
                out, disk_count
            )));
        }
        if group.members.len() < group.kind.min_members() {
            return Err(AutoInstallError::validation(format!(
                "A {} vdev needs at least {} disk(s), got {}",
                group.kind,
                group.kind.min_members(),
                group.members.len()
            )));
        }
        Ok(())
    }

    /// Check that every disk index appears in exactly one group
    pub fn validate(&self, disk_count: usize) -> Result<()> {
        if self.groups.is_empty() {
            return Err(AutoInstallError::validation("No vdev groups defined"));
        }

        let mut seen = BTreeSet::new();
        for group in &self.groups {
            Self::check_group(group, disk_count)?;
            for member in &group.members {
                if !seen.insert(*member) {
                    return Err(AutoInstallError::validation(format!(
                        "Disk {} appears in more than one vdev group",
                        member
                    )));
                }
            }
        }

        let missing = self.unassigned(disk_count);
        if !missing.is_empty() {
            return Err(AutoInstallError::validation(format!(
                "Vdev configuration is incomplete, unassigned disk(s): {:?}",
                missing
            )));
        }
        Ok(())
    }

    /// Parse `kind:i,j;kind:k`
    pub fn parse(input: &str) -> Result<Self> {
        let mut groups = Vec::new();
        for chunk in input.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            let (kind, members) = chunk.split_once(':').ok_or_else(|| {
                AutoInstallError::validation(format!(
                    "Invalid vdev group '{}', expected kind:index[,index...]",
                    chunk
                ))
            })?;
            let kind: VdevKind = kind.parse()?;
            let members = members
                .split(',')
                .map(|m| {
                    m.trim().parse::<usize>().map_err(|_| {
                        AutoInstallError::validation(format!(
                            "Invalid disk index '{}' in vdev group '{}'",
                            m, chunk
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            groups.push(VdevGroup::new(kind, members));
        }
        Ok(Self::new(groups))
    }

    /// `zpool create` vdev arguments for the given disks and partition suffix
    pub fn zpool_args(&self, disks: &[String], suffix: &str) -> Vec<String> {
        let mut args = Vec::new();
        for group in &self.groups {
            if let Some(keyword) = group.kind.zpool_keyword() {
                args.push(keyword.to_string());
            }
            for member in &group.members {
                if let Some(disk) = disks.get(*member) {
                    args.push(format!("{}{}", disk, suffix));
                }
            }
        }
        args
    }

    /// Human readable summary used while assigning disks interactively
    pub fn describe(&self, disks: &[String]) -> String {
        if self.groups.is_empty() {
            return "(no vdev groups yet)".to_string();
        }
        self.groups
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let names: Vec<&str> = g
                    .members
                    .iter()
                    .filter_map(|m| disks.get(*m).map(String::as_str))
                    .collect();
                format!("  vdev {}: {} [{}]", i + 1, g.kind, names.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for VdevTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self.groups.iter().map(|g| g.to_string()).collect();
        f.write_str(&groups.join(";"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disks(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/dev/disk/by-id/ata-D{}", i)).collect()
    }

    #[test]
    fn test_parse_and_display() {
        let topo = VdevTopology::parse("mirror:0,1;stripe:2").unwrap();
        assert_eq!(topo.groups().len(), 2);
        assert_eq!(topo.groups()[0].kind, VdevKind::Mirror);
        assert_eq!(topo.to_string(), "mirror:0,1;stripe:2");
        assert!(topo.validate(3).is_ok());
    }

    #[test]
    fn test_set_partition_invariant() {
        // Missing disk 2
        assert!(VdevTopology::parse("mirror:0,1").unwrap().validate(3).is_err());
        // Disk 1 in two groups
        assert!(VdevTopology::parse("mirror:0,1;mirror:1,2")
            .unwrap()
            .validate(3)
            .is_err());
        // Index out of range
        assert!(VdevTopology::parse("mirror:0,5").unwrap().validate(2).is_err());
        // Too few members for raidz2
        assert!(VdevTopology::parse("raidz2:0,1").unwrap().validate(2).is_err());
    }

    #[test]
    fn test_push_rejects_reused_disk() {
        let mut topo = VdevTopology::default();
        topo.push(VdevGroup::new(VdevKind::Mirror, vec![0, 1]), 3)
            .unwrap();
        assert_eq!(topo.unassigned(3), vec![2]);
        assert!(topo
            .push(VdevGroup::new(VdevKind::Stripe, vec![1]), 3)
            .is_err());
        topo.push(VdevGroup::new(VdevKind::Stripe, vec![2]), 3)
            .unwrap();
        assert!(topo.validate(3).is_ok());
    }

    #[test]
    fn test_zpool_args_mirror() {
        let topo = VdevTopology::parse("mirror:0,1").unwrap();
        let args = topo.zpool_args(&disks(2), "-part3");
        assert_eq!(
            args,
            vec![
                "mirror",
                "/dev/disk/by-id/ata-D0-part3",
                "/dev/disk/by-id/ata-D1-part3"
            ]
        );
    }

    #[test]
    fn test_stripe_has_no_keyword() {
        let args = VdevTopology::single_disk().zpool_args(&disks(1), "-part2");
        assert_eq!(args, vec!["/dev/disk/by-id/ata-D0-part2"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(VdevTopology::parse("mirror").is_err());
        assert!(VdevTopology::parse("raid5:0,1").is_err());
        assert!(VdevTopology::parse("mirror:a,b").is_err());
    }
}
