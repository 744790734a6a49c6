// file: src/installer/preconditions.rs
// version: 1.0.0
// guid: 5e7a9c1b-3d5f-4a6b-8c0e-2f4a6c8e0b1d

//! Checks that must pass before anything touches a disk

use crate::config::env::{self, EnvSource};
use crate::config::validation::MIN_PASSPHRASE_LEN;
use crate::config::InstallerSettings;
use crate::error::AutoInstallError;
use crate::executor::CommandExecutor;
use crate::utils::SystemUtils;
use crate::Result;
use std::fmt;
use tracing::{debug, info};

/// Reject a pre-set passphrase that is too short
///
/// An unset or empty `ZFS_PASSPHRASE` is fine: the first means "ask", the
/// second means "no encryption".
pub fn check_env_passphrase(env: &dyn EnvSource) -> Result<()> {
    match env.var(env::ZFS_PASSPHRASE) {
        Some(p) if !p.is_empty() && p.chars().count() < MIN_PASSPHRASE_LEN => {
            Err(AutoInstallError::precondition(format!(
                "{} must be at least {} characters long (or empty to disable encryption)",
                env::ZFS_PASSPHRASE,
                MIN_PASSPHRASE_LEN
            )))
        }
        _ => Ok(()),
    }
}

/// State of the installer host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteReport {
    pub is_root: bool,
    pub uefi: bool,
    pub network: bool,
    pub missing_tools: Vec<String>,
}

impl PrerequisiteReport {
    pub async fn gather(
        executor: &mut dyn CommandExecutor,
        settings: &InstallerSettings,
    ) -> Result<Self> {
        info!("Checking host prerequisites");
        let report = Self {
            is_root: SystemUtils::is_root(),
            uefi: SystemUtils::is_uefi(executor).await?,
            network: SystemUtils::network_reachable(executor, &settings.dns_probe_address).await,
            missing_tools: SystemUtils::missing_tools(),
        };
        debug!("Prerequisites: {:?}", report);
        Ok(report)
    }

    /// First unmet prerequisite as an error
    pub fn ensure_satisfied(&self) -> Result<()> {
        if !self.is_root {
            return Err(AutoInstallError::precondition(
                "the installer must run as root",
            ));
        }
        if !self.uefi {
            return Err(AutoInstallError::precondition(
                "the system was not booted in UEFI mode",
            ));
        }
        if !self.network {
            return Err(AutoInstallError::precondition(
                "no network connectivity; packages cannot be downloaded",
            ));
        }
        if !self.missing_tools.is_empty() {
            return Err(AutoInstallError::precondition(format!(
                "missing required tools: {}",
                self.missing_tools.join(", ")
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PrerequisiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |ok: bool| if ok { "✓" } else { "✗" };
        writeln!(f, "{} running as root", mark(self.is_root))?;
        writeln!(f, "{} booted in UEFI mode", mark(self.uefi))?;
        writeln!(f, "{} network reachable", mark(self.network))?;
        if self.missing_tools.is_empty() {
            write!(f, "{} all required tools present", mark(true))
        } else {
            write!(
                f,
                "{} missing tools: {}",
                mark(false),
                self.missing_tools.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingExecutor;
    use crate::utils::system::EFI_FIRMWARE_DIR;
    use std::collections::HashMap;

    fn env_with(passphrase: &str) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(env::ZFS_PASSPHRASE.to_string(), passphrase.to_string());
        env
    }

    #[test]
    fn test_short_env_passphrase_is_a_precondition_failure() {
        let err = check_env_passphrase(&env_with("shortpa")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("ZFS_PASSPHRASE"));
    }

    #[test]
    fn test_empty_unset_and_long_passphrases_pass() {
        assert!(check_env_passphrase(&env_with("")).is_ok());
        assert!(check_env_passphrase(&env_with("longenough")).is_ok());
        assert!(check_env_passphrase(&HashMap::<String, String>::new()).is_ok());
    }

    #[test]
    fn test_ensure_satisfied_reports_first_failure() {
        let mut report = PrerequisiteReport {
            is_root: true,
            uefi: false,
            network: false,
            missing_tools: vec!["debootstrap".into()],
        };
        assert!(report.ensure_satisfied().unwrap_err().to_string().contains("UEFI"));
        report.uefi = true;
        report.network = true;
        let err = report.ensure_satisfied().unwrap_err();
        assert!(err.to_string().contains("debootstrap"));
        report.missing_tools.clear();
        assert!(report.ensure_satisfied().is_ok());
        assert!(report.to_string().contains("✓ booted in UEFI mode"));
    }

    #[tokio::test]
    async fn test_gather_probes_firmware_and_network() {
        let settings = InstallerSettings::default();
        let mut exec = RecordingExecutor::new();
        exec.add_dir(EFI_FIRMWARE_DIR, &["efivars"]);
        exec.fail(&["ping"], 1, "unreachable");

        let report = PrerequisiteReport::gather(&mut exec, &settings).await.unwrap();
        assert!(report.uefi);
        assert!(!report.network);
        assert_eq!(exec.matching(&["ping", &settings.dns_probe_address]).len(), 1);
    }
}
