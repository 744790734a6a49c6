// file: src/lib.rs
// version: 3.0.0
// guid: d82472d1-7f0f-4eb4-b0a3-6e1547103eb4

//! # ZFS Root Installer
//!
//! Installs Ubuntu onto a ZFS root: boot and root pools on every selected
//! disk, optional native encryption, a debootstrapped (or Timeshift-restored)
//! system migrated onto the pools, and a bootable GRUB or ZFSBootMenu setup.
//!
//! Every external tool is driven through [`executor::CommandExecutor`], so a
//! whole installation can be replayed against [`executor::RecordingExecutor`].

pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod executor;
pub mod installer;
pub mod logging;
pub mod survey;
pub mod utils;

pub use error::{AutoInstallError, Result};

/// Version information for the installer
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
