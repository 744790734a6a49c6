// file: src/cli/commands.rs
// version: 2.1.0
// guid: g7h8i9j0-k1l2-3456-7890-123456ghijkl

//! Command implementations for the CLI

use crate::{
    collector::{CollectorOptions, ConfigurationCollector, InquirePrompter, SharedTranscript},
    config::{EnvSource, InstallationPlan, InstallerSettings, ProcessEnv, Transcript},
    error::AutoInstallError,
    executor::{LocalExecutor, RecordingExecutor},
    installer::{
        partition::DiskPartitioner, preconditions::check_env_passphrase, zfs::PoolBuilder,
        ExitHook, Installer, Phase, PrerequisiteReport,
    },
    logging::success_banner,
    survey::{HardwareSurveyor, SurveyReport},
    Result,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Run a full installation
pub async fn install_command(
    settings_path: Option<&Path>,
    options: CollectorOptions,
    reveal_secrets: bool,
) -> Result<()> {
    let transcript: SharedTranscript = Arc::new(Mutex::new(Transcript::new()));
    let hook = ExitHook::new(transcript.clone(), reveal_secrets);
    let mut executor = LocalExecutor::new();

    let env = ProcessEnv;
    let checked = check_env_passphrase(&env).and_then(|()| InstallerSettings::load(settings_path));
    let settings = match checked {
        Ok(settings) => settings,
        Err(e) => {
            let outcome = Err(e);
            hook.run(&mut executor, &outcome).await;
            return outcome;
        }
    };
    let mut installer = Installer::new(&mut executor, &settings);

    let outcome = {
        let flow = run_installation(&mut installer, &settings, &env, options, transcript);
        tokio::select! {
            result = flow => result,
            _ = tokio::signal::ctrl_c() => {
                warn!("Received Ctrl+C, aborting installation");
                Err(AutoInstallError::Interrupted)
            }
        }
    };

    installer.finish(&outcome, &hook).await;
    outcome
}

async fn run_installation(
    installer: &mut Installer<'_>,
    settings: &InstallerSettings,
    env: &dyn EnvSource,
    options: CollectorOptions,
    transcript: SharedTranscript,
) -> Result<()> {
    let prerequisites = PrerequisiteReport::gather(installer.executor(), settings).await?;
    prerequisites.ensure_satisfied()?;

    let survey = installer.survey().await?;
    if !options.no_info_messages {
        println!("{}", survey.hardware);
    }

    installer.enter(Phase::Configuring)?;
    let plan = collect_plan(env, &survey, options, transcript)?;

    installer.install(&plan).await?;

    success_banner(&format!(
        "Ubuntu {} installed on ZFS ({} boot, {} desktop). Remove the install media and reboot.",
        plan.os.release.version(),
        plan.bootloader.as_str(),
        plan.desktop.as_str()
    ));
    Ok(())
}

/// Prompting blocks, so it runs outside the async scheduler
fn collect_plan(
    env: &dyn EnvSource,
    survey: &SurveyReport,
    options: CollectorOptions,
    transcript: SharedTranscript,
) -> Result<InstallationPlan> {
    tokio::task::block_in_place(|| {
        let mut prompter = InquirePrompter::new();
        ConfigurationCollector::new(env, &mut prompter, survey, options, transcript).collect()
    })
}

/// Collect a plan and print its replay transcript without installing
pub async fn plan_command(
    settings_path: Option<&Path>,
    options: CollectorOptions,
    preview: bool,
    reveal_secrets: bool,
) -> Result<()> {
    let env = ProcessEnv;
    check_env_passphrase(&env)?;
    let settings = InstallerSettings::load(settings_path)?;

    let mut executor = LocalExecutor::new();
    let survey = HardwareSurveyor::new(&mut executor, &settings)
        .survey()
        .await?;

    let transcript: SharedTranscript = Arc::new(Mutex::new(Transcript::new()));
    let collected = collect_plan(&env, &survey, options, transcript.clone());

    let text = transcript
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .render(reveal_secrets);
    print!("{}", text);
    let plan = collected?;

    if preview {
        println!();
        println!("# Partitioning and pool commands:");
        for line in preview_commands(&plan, &survey, &settings).await? {
            println!("#   {}", line);
        }
    }
    Ok(())
}

/// Command lines the partitioning and pool phases would run for `plan`
pub async fn preview_commands(
    plan: &InstallationPlan,
    survey: &SurveyReport,
    settings: &InstallerSettings,
) -> Result<Vec<String>> {
    let mut recorder = RecordingExecutor::new();
    for disk in &plan.target_disks {
        let candidate = survey.disk(disk).ok_or_else(|| {
            AutoInstallError::validation(format!("{} is not a surveyed disk", disk))
        })?;
        recorder.respond(
            &["blockdev", "--getsize64", disk.as_str()],
            &candidate.size_bytes.to_string(),
        );
    }

    DiskPartitioner::new(&mut recorder, plan, settings)
        .prepare_disks()
        .await?;
    PoolBuilder::new(&mut recorder, plan, settings).build().await?;
    Ok(recorder.command_lines())
}

/// List installable disks and the hardware profile
pub async fn list_disks_command(settings_path: Option<&Path>, json_output: bool) -> Result<()> {
    let settings = InstallerSettings::load(settings_path)?;
    let mut executor = LocalExecutor::new();
    let report = HardwareSurveyor::new(&mut executor, &settings)
        .survey()
        .await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", report.hardware);
    println!();
    let disks = &report.disks;

    println!("Installable disks:");
    println!("{:<60} {:<14} {:>10}  {}", "ID", "Device", "Size", "Model");
    println!("{:-<100}", "");
    for disk in disks {
        println!(
            "{:<60} {:<14} {:>7.1} GiB  {}",
            disk.by_id,
            disk.device,
            disk.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            disk.model.as_deref().unwrap_or("-")
        );
    }
    info!("Found {} installable disk(s)", disks.len());
    Ok(())
}

/// Check system prerequisites
pub async fn check_prerequisites_command(settings_path: Option<&Path>) -> Result<()> {
    info!("Checking system prerequisites for a ZFS root installation");
    let settings = InstallerSettings::load(settings_path)?;
    let mut executor = LocalExecutor::new();

    let report = PrerequisiteReport::gather(&mut executor, &settings).await?;
    println!("{}", report);

    match report.ensure_satisfied() {
        Ok(()) => {
            info!("System is ready for installation");
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::plan::tests::sample_plan;
    use crate::survey::{DiskCandidate, HardwareProfile};

    #[tokio::test]
    async fn test_preview_lists_destructive_commands_in_order() {
        let plan = sample_plan();
        let survey = SurveyReport {
            disks: vec![DiskCandidate {
                by_id: plan.target_disks[0].clone(),
                device: "/dev/sda".into(),
                size_bytes: 100 * 1024 * 1024 * 1024,
                model: None,
            }],
            hardware: HardwareProfile::default(),
        };

        let lines = preview_commands(&plan, &survey, &InstallerSettings::default())
            .await
            .unwrap();
        let pos = |needle: &str| lines.iter().position(|l| l.contains(needle)).unwrap();

        assert!(pos("sgdisk --zap-all") < pos("zpool create"));
        assert!(pos("mkfs.fat") < pos("zpool create"));
        assert!(lines.iter().all(|l| !l.contains("hunter22")));
    }

    #[tokio::test]
    async fn test_preview_rejects_unsurveyed_disk() {
        let plan = sample_plan();
        let survey = SurveyReport {
            disks: Vec::new(),
            hardware: HardwareProfile::default(),
        };
        let err = preview_commands(&plan, &survey, &InstallerSettings::default())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
