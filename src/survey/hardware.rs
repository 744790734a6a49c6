// file: src/survey/hardware.rs
// version: 1.0.0
// guid: 0a2c4e6b-8d1f-4a3c-b5e7-9c1e3a5b7d9f

//! CPU, memory and GPU profile of the installer host

use crate::executor::{Cmd, CommandExecutor};
use serde::Serialize;
use std::fmt;
use sysinfo::System;
use tracing::{debug, warn};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HardwareProfile {
    pub cpu_brand: String,
    pub cpu_count: usize,
    pub memory_bytes: u64,
    pub gpus: Vec<String>,
}

impl HardwareProfile {
    /// Collect CPU and memory through `sysinfo` and GPUs through `lspci`
    pub async fn detect(executor: &mut dyn CommandExecutor) -> Self {
        let (cpu_brand, cpu_count, memory_bytes) = {
            let sys = System::new_all();
            let brand = sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().trim().to_string())
                .unwrap_or_default();
            (brand, sys.cpus().len(), sys.total_memory())
        };

        let gpus = match executor.run_unchecked(&Cmd::new("lspci")).await {
            Ok(output) if output.success() => parse_gpus(&output.stdout),
            Ok(output) => {
                warn!("lspci exited with {}, skipping GPU detection", output.exit_code);
                Vec::new()
            }
            Err(e) => {
                warn!("lspci unavailable, skipping GPU detection: {}", e);
                Vec::new()
            }
        };

        let profile = Self {
            cpu_brand,
            cpu_count,
            memory_bytes,
            gpus,
        };
        debug!("Hardware profile: {:?}", profile);
        profile
    }

    pub fn memory_gib(&self) -> u64 {
        self.memory_bytes.div_ceil(GIB)
    }

    /// Swap size offered as the interactive default
    pub fn suggested_swap_gib(&self) -> u64 {
        self.memory_gib().clamp(2, 16)
    }
}

impl fmt::Display for HardwareProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CPU:    {} ({} threads)", self.cpu_brand, self.cpu_count)?;
        writeln!(f, "Memory: {} GiB", self.memory_gib())?;
        if self.gpus.is_empty() {
            write!(f, "GPU:    none detected")
        } else {
            write!(f, "GPU:    {}", self.gpus.join("; "))
        }
    }
}

/// Display controller descriptions from `lspci` output
pub fn parse_gpus(lspci: &str) -> Vec<String> {
    const CLASSES: [&str; 3] = [
        "VGA compatible controller",
        "3D controller",
        "Display controller",
    ];
    lspci
        .lines()
        .filter(|line| CLASSES.iter().any(|c| line.contains(c)))
        .filter_map(|line| line.split_once(": ").map(|(_, name)| name.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingExecutor;

    const LSPCI: &str = "\
00:02.0 VGA compatible controller: Intel Corporation UHD Graphics 620 (rev 07)
00:14.0 USB controller: Intel Corporation Sunrise Point-LP USB 3.0 xHCI Controller
01:00.0 3D controller: NVIDIA Corporation GP108M [GeForce MX150] (rev a1)
";

    #[test]
    fn test_parse_gpus() {
        assert_eq!(
            parse_gpus(LSPCI),
            vec![
                "Intel Corporation UHD Graphics 620 (rev 07)",
                "NVIDIA Corporation GP108M [GeForce MX150] (rev a1)"
            ]
        );
    }

    #[test]
    fn test_suggested_swap_is_clamped() {
        let small = HardwareProfile {
            memory_bytes: GIB,
            ..Default::default()
        };
        let large = HardwareProfile {
            memory_bytes: 64 * GIB,
            ..Default::default()
        };
        assert_eq!(small.suggested_swap_gib(), 2);
        assert_eq!(large.suggested_swap_gib(), 16);
    }

    #[tokio::test]
    async fn test_detect_reads_lspci() {
        let mut exec = RecordingExecutor::new();
        exec.respond(&["lspci"], LSPCI);
        let profile = HardwareProfile::detect(&mut exec).await;
        assert_eq!(profile.gpus.len(), 2);
        assert!(profile.cpu_count > 0);
    }
}
