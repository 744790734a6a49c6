// file: src/collector/mod.rs
// version: 1.0.0
// guid: 4f6a8c0e-2b4d-4e7f-a1c3-5d7f9b1d3e5a

//! Configuration collector
//!
//! Every plan field is read from its `ZFS_*` variable first. When the
//! variable is absent the operator is prompted, and the answer is validated
//! and re-prompted until it is acceptable. With `ZFS_AUTOMATED=1` nothing is
//! prompted: absent fields take their default, or fail when they have none.
//! Environment values that fail validation are fatal.
//!
//! Each finished value goes into the shared [`Transcript`] right away, so an
//! interrupted run can still print what was answered.

pub mod prompter;

pub use prompter::{Answer, InquirePrompter, Prompter, ScriptedPrompter};

use crate::config::datasets::{DatasetLayout, TemplateValues, DEFAULT_DATASET_TEMPLATE};
use crate::config::env::{self, EnvSource};
use crate::config::plan::{
    split_options, DEFAULT_BPOOL_OPTIONS, DEFAULT_FREE_TAIL_GIB, DEFAULT_RPOOL_NAME,
    DEFAULT_RPOOL_OPTIONS,
};
use crate::config::validation;
use crate::config::{
    Bootloader, DesktopEnvironment, InstallMethod, InstallationPlan, OsIdentity, PoolNames,
    Sizing, Transcript, UbuntuRelease, VdevGroup, VdevKind, VdevTopology,
};
use crate::error::AutoInstallError;
use crate::executor::Secret;
use crate::survey::SurveyReport;
use crate::Result;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Shared, incrementally filled transcript
pub type SharedTranscript = Arc<Mutex<Transcript>>;

const DEFAULT_HOSTNAME: &str = "ubuntu";
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_LOCALE: &str = "en_US.UTF-8";
const DEFAULT_KEYBOARD: &str = "us";

/// Run-mode switches of the collector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorOptions {
    /// Never prompt
    pub automated: bool,
    /// Skip informational notices
    pub no_info_messages: bool,
}

pub struct ConfigurationCollector<'a> {
    env: &'a dyn EnvSource,
    prompter: &'a mut dyn Prompter,
    survey: &'a SurveyReport,
    options: CollectorOptions,
    transcript: SharedTranscript,
    last_used: i64,
}

impl<'a> ConfigurationCollector<'a> {
    pub fn new(
        env: &'a dyn EnvSource,
        prompter: &'a mut dyn Prompter,
        survey: &'a SurveyReport,
        options: CollectorOptions,
        transcript: SharedTranscript,
    ) -> Self {
        Self {
            env,
            prompter,
            survey,
            options,
            transcript,
            last_used: chrono::Utc::now().timestamp(),
        }
    }

    /// Fix the `{last_used}` timestamp instead of reading the clock
    pub fn with_timestamp(mut self, last_used: i64) -> Self {
        self.last_used = last_used;
        self
    }

    /// Gather and validate every field of the plan
    pub fn collect(&mut self) -> Result<InstallationPlan> {
        info!("Collecting installation parameters");

        let target_disks = self.collect_disks()?;
        let vdev_topology = self.collect_topology(&target_disks)?;

        let release = self.field(
            env::ZFS_UBUNTU_VERSION,
            Some(UbuntuRelease::Noble.version().to_string()),
            |p, default| {
                let options: Vec<String> = UbuntuRelease::ALL
                    .iter()
                    .map(|r| format!("{} ({})", r.version(), r.codename()))
                    .collect();
                let start = UbuntuRelease::ALL
                    .iter()
                    .position(|r| Some(r.version()) == default)
                    .unwrap_or(0);
                let i = p.select("Ubuntu release to install", &options, start)?;
                Ok(UbuntuRelease::ALL[i].version().to_string())
            },
            |v| v.parse::<UbuntuRelease>(),
            |r| r.version().to_string(),
        )?;

        let install_method = self.field(
            env::ZFS_INSTALL_METHOD,
            Some(InstallMethod::Debootstrap.as_str().to_string()),
            |p, _| {
                let options = vec![
                    "debootstrap (fresh install)".to_string(),
                    "timeshift_restore (restore a Timeshift snapshot)".to_string(),
                ];
                let i = p.select("Installation method", &options, 0)?;
                Ok(if i == 0 { "debootstrap" } else { "timeshift_restore" }.to_string())
            },
            |v| v.parse::<InstallMethod>(),
            |m| m.as_str().to_string(),
        )?;

        let timeshift_path = if install_method == InstallMethod::TimeshiftRestore {
            let path = self.field(
                env::ZFS_TIMESHIFT_PATH,
                None,
                |p, _| {
                    p.text(
                        "Path containing the timeshift/ backup directory",
                        None,
                        Some("e.g. /media/backup"),
                    )
                },
                |v| {
                    let v = v.trim();
                    if v.is_empty() || !v.starts_with('/') {
                        Err(AutoInstallError::validation(
                            "The Timeshift path must be an absolute path",
                        ))
                    } else {
                        Ok(v.to_string())
                    }
                },
                |v| v.clone(),
            )?;
            Some(path)
        } else {
            self.record(env::ZFS_TIMESHIFT_PATH, "", false);
            None
        };

        let bootloader = self.field(
            env::ZFS_USE_ZFSBOOTMENU,
            Some("0".to_string()),
            |p, _| {
                let options = vec!["GRUB".to_string(), "ZFSBootMenu".to_string()];
                let i = p.select("Bootloader", &options, 0)?;
                Ok(i.to_string())
            },
            |v| {
                validation::parse_flag(env::ZFS_USE_ZFSBOOTMENU, v).map(|zbm| {
                    if zbm {
                        Bootloader::ZfsBootMenu
                    } else {
                        Bootloader::Grub
                    }
                })
            },
            |b| if *b == Bootloader::ZfsBootMenu { "1" } else { "0" }.to_string(),
        )?;

        let boot_partition_mib = self.field(
            env::ZFS_BOOT_PARTITION_SIZE,
            Some("2048M".to_string()),
            |p, default| {
                p.text(
                    "Boot pool partition size",
                    default,
                    Some("Number followed by M or G, at least 512M"),
                )
            },
            validation::parse_boot_partition_size,
            |mib| format!("{}M", mib),
        )?;

        let passphrase = self.collect_passphrase()?;

        let root_pool = self.field(
            env::ZFS_RPOOL_NAME,
            Some(DEFAULT_RPOOL_NAME.to_string()),
            |p, default| p.text("Root pool name", default, None),
            validation::validate_pool_name,
            |v| v.clone(),
        )?;

        let rpool_options = self.field(
            env::ZFS_RPOOL_CREATE_OPTIONS,
            Some(DEFAULT_RPOOL_OPTIONS.to_string()),
            |p, default| p.text("Root pool creation options", default, None),
            parse_pool_options,
            |v| v.join(" "),
        )?;

        let bpool_options = self.field(
            env::ZFS_BPOOL_CREATE_OPTIONS,
            Some(DEFAULT_BPOOL_OPTIONS.to_string()),
            |p, default| p.text("Boot pool creation options", default, None),
            parse_pool_options,
            |v| v.join(" "),
        )?;

        let suggested_swap = self.survey.hardware.suggested_swap_gib().to_string();
        let swap_gib = self.field(
            env::ZFS_SWAP_SIZE,
            Some(suggested_swap),
            |p, default| {
                p.text(
                    "Swap size in GiB (0 for none)",
                    default,
                    Some("Created as a zvol on the root pool"),
                )
            },
            |v| validation::parse_gib(env::ZFS_SWAP_SIZE, v),
            |v| v.to_string(),
        )?;

        let free_tail_gib = self.field(
            env::ZFS_FREE_TAIL_SPACE,
            Some(DEFAULT_FREE_TAIL_GIB.to_string()),
            |p, default| {
                p.text(
                    "Unpartitioned space to leave at the end of each disk, in GiB",
                    default,
                    None,
                )
            },
            |v| validation::parse_gib(env::ZFS_FREE_TAIL_SPACE, v),
            |v| v.to_string(),
        )?;

        let hostname = self.field(
            env::ZFS_HOSTNAME,
            Some(DEFAULT_HOSTNAME.to_string()),
            |p, default| p.text("Hostname", default, None),
            validation::validate_hostname,
            |v| v.clone(),
        )?;

        let username = self.field(
            env::ZFS_USERNAME,
            None,
            |p, _| p.text("Primary user name", None, None),
            validation::validate_username,
            |v| v.clone(),
        )?;

        let password = self.collect_password()?;

        let full_name = self.field(
            env::ZFS_USER_FULLNAME,
            Some(String::new()),
            |p, default| p.text("Full name of the primary user", default, None),
            validation::validate_full_name,
            |v| v.clone(),
        )?;

        let timezone = self.field(
            env::ZFS_TIMEZONE,
            Some(DEFAULT_TIMEZONE.to_string()),
            |p, default| p.text("Timezone", default, Some("e.g. Europe/Berlin")),
            validation::validate_timezone,
            |v| v.clone(),
        )?;

        let locale = self.field(
            env::ZFS_LOCALE,
            Some(DEFAULT_LOCALE.to_string()),
            |p, default| p.text("Locale", default, None),
            validation::validate_locale,
            |v| v.clone(),
        )?;

        let keyboard_layout = self.field(
            env::ZFS_KEYBOARD_LAYOUT,
            Some(DEFAULT_KEYBOARD.to_string()),
            |p, default| p.text("Keyboard layout", default, None),
            validation::validate_keyboard_layout,
            |v| v.clone(),
        )?;

        let desktop = self.field(
            env::ZFS_DESKTOP_ENVIRONMENT,
            Some(DesktopEnvironment::Minimal.as_str().to_string()),
            |p, _| {
                let options: Vec<String> = DesktopEnvironment::ALL
                    .iter()
                    .map(|d| match d.meta_package() {
                        Some(pkg) => format!("{} ({})", d.as_str(), pkg),
                        None => format!("{} (no desktop)", d.as_str()),
                    })
                    .collect();
                let i = p.select("Desktop environment", &options, DesktopEnvironment::ALL.len() - 1)?;
                Ok(DesktopEnvironment::ALL[i].as_str().to_string())
            },
            |v| v.parse::<DesktopEnvironment>(),
            |d| d.as_str().to_string(),
        )?;

        let enable_ssh = self.field(
            env::ZFS_ENABLE_SSH,
            Some("0".to_string()),
            |p, _| {
                let yes = p.confirm("Install and enable the OpenSSH server?", false)?;
                Ok(if yes { "1" } else { "0" }.to_string())
            },
            |v| validation::parse_flag(env::ZFS_ENABLE_SSH, v),
            |b| if *b { "1" } else { "0" }.to_string(),
        )?;

        let dataset_template = self.collect_dataset_template(&hostname, &username)?;

        let plan = InstallationPlan {
            target_disks,
            vdev_topology,
            passphrase,
            pools: PoolNames::new(root_pool),
            rpool_options,
            bpool_options,
            dataset_template,
            last_used: self.last_used,
            os: OsIdentity {
                release,
                hostname,
                username,
                password,
                full_name,
                timezone,
                locale,
                keyboard_layout,
            },
            desktop,
            bootloader,
            install_method,
            timeshift_path,
            enable_ssh,
            sizing: Sizing {
                boot_partition_mib,
                swap_gib,
                free_tail_gib,
            },
        };

        debug!("Collected plan: {:?}", plan);
        Ok(plan)
    }

    fn record(&self, name: &str, value: &str, secret: bool) {
        let mut transcript = self
            .transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        transcript.record(name, value, secret);
    }

    fn info(&mut self, message: &str) {
        if !self.options.no_info_messages {
            self.prompter.notice(message);
        }
    }

    /// Resolve one field from the environment, its default or a prompt
    fn field<T>(
        &mut self,
        var: &'static str,
        default: Option<String>,
        mut ask: impl FnMut(&mut dyn Prompter, Option<&str>) -> Result<String>,
        parse: impl Fn(&str) -> Result<T>,
        render: impl Fn(&T) -> String,
    ) -> Result<T> {
        let value = if let Some(raw) = self.env.var(var) {
            parse(&raw).map_err(|e| env_error(var, e))?
        } else if self.options.automated {
            let default = default.ok_or_else(|| {
                AutoInstallError::config(format!("{} is required when {}=1", var, env::ZFS_AUTOMATED))
            })?;
            parse(&default).map_err(|e| env_error(var, e))?
        } else {
            loop {
                let answer = ask(&mut *self.prompter, default.as_deref())?;
                match parse(&answer) {
                    Ok(value) => break value,
                    Err(e) => self.prompter.notice(&e.to_string()),
                }
            }
        };
        self.record(var, &render(&value), false);
        Ok(value)
    }

    fn collect_disks(&mut self) -> Result<Vec<String>> {
        let candidates: Vec<String> = self.survey.disks.iter().map(|d| d.by_id.clone()).collect();

        let disks = if let Some(raw) = self.env.var(env::ZFS_SELECTED_DISKS) {
            parse_disk_list(&raw, &candidates).map_err(|e| env_error(env::ZFS_SELECTED_DISKS, e))?
        } else if self.options.automated {
            if candidates.len() != 1 {
                return Err(AutoInstallError::config(format!(
                    "{} is required when {}=1 and {} disks are available",
                    env::ZFS_SELECTED_DISKS,
                    env::ZFS_AUTOMATED,
                    candidates.len()
                )));
            }
            candidates.clone()
        } else {
            let labels: Vec<String> = self.survey.disks.iter().map(|d| d.to_string()).collect();
            self.info("All data on the selected disks will be destroyed.");
            loop {
                let chosen = self
                    .prompter
                    .multi_select("Disks to install to", &labels)?;
                if chosen.is_empty() {
                    self.prompter.notice("Select at least one disk");
                    continue;
                }
                break chosen.into_iter().map(|i| candidates[i].clone()).collect();
            }
        };

        self.record(env::ZFS_SELECTED_DISKS, &disks.join(","), false);
        Ok(disks)
    }

    fn collect_topology(&mut self, disks: &[String]) -> Result<VdevTopology> {
        let topology = if let Some(raw) = self.env.var(env::ZFS_VDEV_CONFIGS) {
            let topology = VdevTopology::parse(&raw).map_err(|e| env_error(env::ZFS_VDEV_CONFIGS, e))?;
            topology
                .validate(disks.len())
                .map_err(|e| env_error(env::ZFS_VDEV_CONFIGS, e))?;
            topology
        } else if disks.len() == 1 {
            VdevTopology::single_disk()
        } else if self.options.automated {
            return Err(AutoInstallError::config(format!(
                "{} is required when {}=1 and more than one disk is selected",
                env::ZFS_VDEV_CONFIGS,
                env::ZFS_AUTOMATED
            )));
        } else {
            self.assign_vdevs(disks)?
        };

        self.record(env::ZFS_VDEV_CONFIGS, &topology.to_string(), false);
        Ok(topology)
    }

    /// Interactive set partition of the selected disks into vdev groups
    fn assign_vdevs(&mut self, disks: &[String]) -> Result<VdevTopology> {
        let mut topology = VdevTopology::default();

        loop {
            let remaining = topology.unassigned(disks.len());
            self.prompter
                .notice(&format!("Current vdev setup:\n{}", topology.describe(disks)));

            if remaining.is_empty() {
                if self.prompter.confirm("Use this vdev setup?", true)? {
                    return Ok(topology);
                }
                topology = VdevTopology::default();
                continue;
            }

            let kinds: Vec<VdevKind> = VdevKind::ALL
                .into_iter()
                .filter(|k| k.min_members() <= remaining.len())
                .collect();
            let kind_labels: Vec<String> = kinds
                .iter()
                .map(|k| format!("{} (at least {} disk(s))", k, k.min_members()))
                .collect();
            let kind = kinds[self.prompter.select("Redundancy of the next vdev", &kind_labels, 0)?];

            let disk_labels: Vec<String> = remaining.iter().map(|i| disks[*i].clone()).collect();
            let picked = self
                .prompter
                .multi_select(&format!("Disks in this {} vdev", kind), &disk_labels)?;
            let members: Vec<usize> = picked.into_iter().map(|i| remaining[i]).collect();

            if let Err(e) = topology.push(VdevGroup::new(kind, members), disks.len()) {
                self.prompter.notice(&e.to_string());
            }
        }
    }

    fn collect_passphrase(&mut self) -> Result<Secret> {
        let passphrase = if let Some(raw) = self.env.var(env::ZFS_PASSPHRASE) {
            let secret = Secret::new(raw);
            validation::validate_passphrase(&secret)
                .map_err(|e| AutoInstallError::precondition(e.to_string()))?;
            secret
        } else if self.options.automated {
            Secret::default()
        } else {
            self.info("Leave the passphrase empty to disable ZFS native encryption.");
            self.confirmed_secret("Encryption passphrase", validation::validate_passphrase)?
        };

        self.record(env::ZFS_PASSPHRASE, passphrase.expose(), true);
        Ok(passphrase)
    }

    fn collect_password(&mut self) -> Result<Secret> {
        let password = if let Some(raw) = self.env.var(env::ZFS_USER_PASSWORD) {
            let secret = Secret::new(raw);
            validation::validate_password(&secret)
                .map_err(|e| env_error(env::ZFS_USER_PASSWORD, e))?;
            secret
        } else if self.options.automated {
            return Err(AutoInstallError::config(format!(
                "{} is required when {}=1",
                env::ZFS_USER_PASSWORD,
                env::ZFS_AUTOMATED
            )));
        } else {
            self.confirmed_secret("Password of the primary user", validation::validate_password)?
        };

        self.record(env::ZFS_USER_PASSWORD, password.expose(), true);
        Ok(password)
    }

    /// Ask twice until both entries match and pass `check`
    fn confirmed_secret(
        &mut self,
        message: &str,
        check: impl Fn(&Secret) -> Result<()>,
    ) -> Result<Secret> {
        loop {
            let first = self.prompter.secret(message)?;
            if let Err(e) = check(&first) {
                self.prompter.notice(&e.to_string());
                continue;
            }
            let second = self.prompter.secret(&format!("{} (again)", message))?;
            if first != second {
                self.prompter.notice("The entries do not match, try again");
                continue;
            }
            return Ok(first);
        }
    }

    fn collect_dataset_template(&mut self, hostname: &str, username: &str) -> Result<String> {
        let values = TemplateValues {
            hostname,
            username,
            last_used: self.last_used,
        };
        let check = |template: &str| -> Result<()> {
            DatasetLayout::from_template(template, &values)?.bootable()?;
            Ok(())
        };

        let template = if let Some(raw) = self.env.var(env::ZFS_DATASET_CREATE_OPTIONS) {
            check(&raw).map_err(|e| env_error(env::ZFS_DATASET_CREATE_OPTIONS, e))?;
            raw
        } else if self.options.automated {
            DEFAULT_DATASET_TEMPLATE.to_string()
        } else {
            self.info(&format!("Default dataset layout:\n{}", DEFAULT_DATASET_TEMPLATE));
            loop {
                if self.prompter.confirm("Use the default dataset layout?", true)? {
                    break DEFAULT_DATASET_TEMPLATE.to_string();
                }
                let path = self
                    .prompter
                    .text("File containing the dataset layout", None, None)?;
                match std::fs::read_to_string(path.trim()) {
                    Ok(template) => match check(&template) {
                        Ok(()) => break template,
                        Err(e) => self.prompter.notice(&e.to_string()),
                    },
                    Err(e) => self
                        .prompter
                        .notice(&format!("Cannot read {}: {}", path.trim(), e)),
                }
            }
        };

        self.record(env::ZFS_DATASET_CREATE_OPTIONS, &template, false);
        Ok(template)
    }
}

fn env_error(var: &str, e: AutoInstallError) -> AutoInstallError {
    match e {
        AutoInstallError::ValidationError(msg) => {
            AutoInstallError::validation(format!("{}: {}", var, msg))
        }
        other => other,
    }
}

fn parse_pool_options(value: &str) -> Result<Vec<String>> {
    let options = split_options(value);
    if options.iter().any(|o| o == "-R" || o == "-m") {
        warn!("Pool options include -R or -m, which the installer sets itself");
    }
    Ok(options)
}

/// Parse a comma separated list of stable disk ids against the candidates
fn parse_disk_list(raw: &str, candidates: &[String]) -> Result<Vec<String>> {
    let disks: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect();
    if disks.is_empty() {
        return Err(AutoInstallError::validation("No disks selected"));
    }

    let mut seen = BTreeSet::new();
    for disk in &disks {
        if !seen.insert(disk.as_str()) {
            return Err(AutoInstallError::validation(format!("Disk {} listed twice", disk)));
        }
        if !candidates.contains(disk) {
            return Err(AutoInstallError::validation(format!(
                "{} is not an installable disk (mounted, removable, optical or not a /dev/disk/by-id name)",
                disk
            )));
        }
    }
    Ok(disks)
}
