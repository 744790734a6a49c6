// file: src/config/env.rs
// version: 1.0.0
// guid: 8d0f2b4e-6a8c-4e1d-b3f5-7a9c1e3d5b7f

//! `ZFS_*` environment variable surface

use std::collections::HashMap;

pub const ZFS_UBUNTU_VERSION: &str = "ZFS_UBUNTU_VERSION";
pub const ZFS_INSTALL_METHOD: &str = "ZFS_INSTALL_METHOD";
pub const ZFS_TIMESHIFT_PATH: &str = "ZFS_TIMESHIFT_PATH";
pub const ZFS_USERNAME: &str = "ZFS_USERNAME";
pub const ZFS_USER_PASSWORD: &str = "ZFS_USER_PASSWORD";
pub const ZFS_USER_FULLNAME: &str = "ZFS_USER_FULLNAME";
pub const ZFS_HOSTNAME: &str = "ZFS_HOSTNAME";
pub const ZFS_TIMEZONE: &str = "ZFS_TIMEZONE";
pub const ZFS_LOCALE: &str = "ZFS_LOCALE";
pub const ZFS_KEYBOARD_LAYOUT: &str = "ZFS_KEYBOARD_LAYOUT";
pub const ZFS_DESKTOP_ENVIRONMENT: &str = "ZFS_DESKTOP_ENVIRONMENT";
pub const ZFS_USE_ZFSBOOTMENU: &str = "ZFS_USE_ZFSBOOTMENU";
pub const ZFS_ENABLE_SSH: &str = "ZFS_ENABLE_SSH";
pub const ZFS_SELECTED_DISKS: &str = "ZFS_SELECTED_DISKS";
pub const ZFS_VDEV_CONFIGS: &str = "ZFS_VDEV_CONFIGS";
pub const ZFS_BOOT_PARTITION_SIZE: &str = "ZFS_BOOT_PARTITION_SIZE";
pub const ZFS_PASSPHRASE: &str = "ZFS_PASSPHRASE";
pub const ZFS_RPOOL_NAME: &str = "ZFS_RPOOL_NAME";
pub const ZFS_SWAP_SIZE: &str = "ZFS_SWAP_SIZE";
pub const ZFS_FREE_TAIL_SPACE: &str = "ZFS_FREE_TAIL_SPACE";
pub const ZFS_BPOOL_CREATE_OPTIONS: &str = "ZFS_BPOOL_CREATE_OPTIONS";
pub const ZFS_RPOOL_CREATE_OPTIONS: &str = "ZFS_RPOOL_CREATE_OPTIONS";
pub const ZFS_DATASET_CREATE_OPTIONS: &str = "ZFS_DATASET_CREATE_OPTIONS";
pub const ZFS_AUTOMATED: &str = "ZFS_AUTOMATED";
pub const ZFS_NO_INFO_MESSAGES: &str = "ZFS_NO_INFO_MESSAGES";

/// Where plan overrides are read from
///
/// `Some("")` means the variable is set but empty, which is meaningful for
/// the passphrase (set and empty disables encryption without prompting).
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}
