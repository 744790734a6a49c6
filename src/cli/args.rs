// file: src/cli/args.rs
// version: 2.0.0
// guid: f6g7h8i9-j0k1-2345-6789-012345fghijk

//! Command line argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "zfs-root-installer")]
#[command(about = "Guided installer for Ubuntu on a ZFS root")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Append logs to this file as well
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Installer settings (TOML)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Never prompt; missing values take their defaults or fail
    #[arg(long, global = true, env = "ZFS_AUTOMATED")]
    pub automated: bool,

    /// Skip informational notices between prompts
    #[arg(long, global = true, env = "ZFS_NO_INFO_MESSAGES")]
    pub no_info_messages: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install Ubuntu onto a fresh ZFS root (destroys the selected disks)
    Install {
        #[arg(long, help = "Print passwords and the passphrase in the replay transcript")]
        reveal_secrets: bool,
    },

    /// Collect the configuration and print the replay transcript without installing
    Plan {
        #[arg(long, help = "Also print the partitioning and pool commands that would run")]
        preview: bool,

        #[arg(long, help = "Print passwords and the passphrase in the transcript")]
        reveal_secrets: bool,
    },

    /// List the disks an installation could target
    ListDisks {
        #[arg(short, long)]
        json: bool,
    },

    /// Check system prerequisites
    CheckPrereqs,
}
