// file: src/utils/system.rs
// version: 2.0.0
// guid: w3x4y5z6-a7b8-9012-3456-789012wxyzab

//! System utility functions

use crate::executor::{Cmd, CommandExecutor};
use crate::Result;
use std::path::Path;
use tracing::{debug, warn};

/// Firmware directory present only when booted through UEFI
pub const EFI_FIRMWARE_DIR: &str = "/sys/firmware/efi";

/// External tools the installer drives
pub const REQUIRED_TOOLS: [&str; 10] = [
    "zpool",
    "zfs",
    "sgdisk",
    "wipefs",
    "mkfs.fat",
    "debootstrap",
    "rsync",
    "chroot",
    "partprobe",
    "udevadm",
];

/// System utility functions
pub struct SystemUtils;

impl SystemUtils {
    /// Check if a command exists in PATH
    pub fn command_exists(command: &str) -> bool {
        which::which(command).is_ok()
    }

    /// Check if running as root
    pub fn is_root() -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    /// Check whether the system was booted in UEFI mode
    pub async fn is_uefi(executor: &mut dyn CommandExecutor) -> Result<bool> {
        executor.path_exists(Path::new(EFI_FIRMWARE_DIR)).await
    }

    /// Check that `address` answers a single ping
    pub async fn network_reachable(executor: &mut dyn CommandExecutor, address: &str) -> bool {
        let cmd = Cmd::new("ping").args(["-c", "1", "-W", "5", address]);
        match executor.run_unchecked(&cmd).await {
            Ok(output) => {
                debug!("ping {} exited with {}", address, output.exit_code);
                output.success()
            }
            Err(e) => {
                warn!("Could not run ping: {}", e);
                false
            }
        }
    }

    /// Required tools that are missing from PATH
    pub fn missing_tools() -> Vec<String> {
        REQUIRED_TOOLS
            .iter()
            .filter(|tool| !Self::command_exists(tool))
            .map(|tool| tool.to_string())
            .collect()
    }
}
