// file: src/cli/mod.rs
// version: 2.0.0
// guid: e5f6g7h8-i9j0-1234-5678-901234efghij

//! Command line interface for the ZFS root installer

pub mod args;
pub mod commands;

pub use args::{Cli, Commands};
pub use commands::*;
