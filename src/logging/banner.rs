// file: src/logging/banner.rs
// version: 1.0.0
// guid: 3f1c9a52-6d0e-4b7a-9c11-2e8d5f4a7b90

//! Per-phase banners printed to the terminal

use colored::Colorize;
use tracing::info;

/// Print the banner that marks the start of a major phase
///
/// The most recent banner is what an operator looks for after a failure.
pub fn phase_banner(phase: &str) {
    let line = "=".repeat(72);
    eprintln!("{}", line.blue());
    eprintln!("{} {}", "###".blue().bold(), phase.bold());
    eprintln!("{}", line.blue());
    info!("Entering phase: {}", phase);
}

/// Print the closing message of a successful run
pub fn success_banner(message: &str) {
    eprintln!("{} {}", "[OK]".green().bold(), message.green());
    info!("{}", message);
}
