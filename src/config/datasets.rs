// file: src/config/datasets.rs
// version: 1.0.0
// guid: 2f4a6c8e-0b1d-4e3f-a5c7-9e1b3d5f7a9c

//! Dataset layout table
//!
//! The layout is written as a small template, one dataset per line:
//!
//! ```text
//! ROOT/{hostname}   mountpoint=/ com.ubuntu.zsys:bootfs=yes
//! USERDATA/{username}   mountpoint=/home/{username}
//! ```
//!
//! Placeholders are substituted once when the table is built; the
//! `{last_used}` timestamp is computed by the caller and injected as a value.

use crate::error::AutoInstallError;
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Layout created under the root pool when `ZFS_DATASET_CREATE_OPTIONS` is not set
pub const DEFAULT_DATASET_TEMPLATE: &str = "\
ROOT                         canmount=off mountpoint=none
ROOT/{hostname}              mountpoint=/ com.ubuntu.zsys:bootfs=yes com.ubuntu.zsys:last-used={last_used}
ROOT/{hostname}/srv          com.ubuntu.zsys:bootfs=no
ROOT/{hostname}/usr          canmount=off com.ubuntu.zsys:bootfs=no
ROOT/{hostname}/usr/local
ROOT/{hostname}/var          canmount=off com.ubuntu.zsys:bootfs=no
ROOT/{hostname}/var/games
ROOT/{hostname}/var/lib
ROOT/{hostname}/var/lib/AccountsService
ROOT/{hostname}/var/lib/apt
ROOT/{hostname}/var/lib/dpkg
ROOT/{hostname}/var/lib/NetworkManager
ROOT/{hostname}/var/log
ROOT/{hostname}/var/mail
ROOT/{hostname}/var/snap
ROOT/{hostname}/var/spool
ROOT/{hostname}/var/www
USERDATA                     canmount=off mountpoint=/
USERDATA/root                mountpoint=/root
USERDATA/{username}          mountpoint=/home/{username}
";

/// Values the template placeholders resolve to
#[derive(Debug, Clone)]
pub struct TemplateValues<'a> {
    pub hostname: &'a str,
    pub username: &'a str,
    pub last_used: i64,
}

/// One dataset to create, relative to the root pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub path: String,
    pub properties: Vec<(String, String)>,
}

impl DatasetEntry {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Mounted at `/` and not excluded from mounting
    pub fn is_bootable(&self) -> bool {
        self.property("mountpoint") == Some("/") && self.property("canmount") != Some("off")
    }

    /// Arguments for `zfs create` under `pool`
    pub fn create_args(&self, pool: &str) -> Vec<String> {
        let mut args = vec!["create".to_string()];
        for (key, value) in &self.properties {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(format!("{}/{}", pool, self.path));
        args
    }
}

/// Ordered dataset table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLayout {
    entries: Vec<DatasetEntry>,
}

impl DatasetLayout {
    /// Substitute placeholders and parse the template into entries
    pub fn from_template(template: &str, values: &TemplateValues<'_>) -> Result<Self> {
        let resolved = substitute(template, values)?;
        let mut entries = Vec::new();

        for line in resolved
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
        {
            let mut tokens = line.split_whitespace();
            let path = tokens.next().unwrap_or_default();
            if path.starts_with('/') || path.ends_with('/') || path.contains("//") {
                return Err(AutoInstallError::validation(format!(
                    "Invalid dataset path '{}'",
                    path
                )));
            }

            let properties = tokens
                .map(|token| {
                    token
                        .split_once('=')
                        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .ok_or_else(|| {
                            AutoInstallError::validation(format!(
                                "Invalid dataset property '{}' for {}, expected key=value",
                                token, path
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            entries.push(DatasetEntry {
                path: path.to_string(),
                properties,
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    /// The dataset mounted at `mountpoint`
    pub fn bootable_at(&self, mountpoint: &str) -> Result<&DatasetEntry> {
        self.entries
            .iter()
            .find(|e| {
                e.property("mountpoint") == Some(mountpoint) && e.property("canmount") != Some("off")
            })
            .ok_or_else(|| {
                AutoInstallError::validation(format!(
                    "No mountable dataset at {} in the dataset layout",
                    mountpoint
                ))
            })
    }

    /// The single dataset marked as the bootable root
    pub fn bootable(&self) -> Result<&DatasetEntry> {
        let mut bootable = self.entries.iter().filter(|e| e.is_bootable());
        match (bootable.next(), bootable.next()) {
            (Some(entry), None) => Ok(entry),
            (None, _) => Err(AutoInstallError::validation(
                "The dataset layout has no bootable dataset (mountpoint=/)",
            )),
            (Some(first), Some(second)) => Err(AutoInstallError::validation(format!(
                "The dataset layout has more than one bootable dataset: {} and {}",
                first.path, second.path
            ))),
        }
    }
}

fn substitute(template: &str, values: &TemplateValues<'_>) -> Result<String> {
    let placeholder = Regex::new(r"\{([a-z_]+)\}").expect("Invalid placeholder regex");
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder.captures_iter(template) {
        let whole = caps.get(0).expect("capture 0 always exists");
        out.push_str(&template[last..whole.start()]);
        match &caps[1] {
            "hostname" => out.push_str(values.hostname),
            "username" => out.push_str(values.username),
            "last_used" => out.push_str(&values.last_used.to_string()),
            other => {
                return Err(AutoInstallError::validation(format!(
                    "Unknown placeholder '{{{}}}' in dataset layout",
                    other
                )))
            }
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}
