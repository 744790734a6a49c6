// file: src/main.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-234567hijklm

//! ZFS root installer - main entry point

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use zfs_root_installer::{
    cli::{commands::*, Cli, Commands},
    collector::CollectorOptions,
    logging::{init_logger, logger::default_log_file},
    AutoInstallError,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Installs always keep a log; other commands only when asked
    let log_file = cli.log_file.clone().or_else(|| {
        matches!(cli.command, Commands::Install { .. }).then(default_log_file)
    });
    if let Err(e) = init_logger(cli.verbose, cli.quiet, log_file.as_deref()) {
        eprintln!("Warning: {}; logging to stderr only", e);
        let _ = init_logger(cli.verbose, cli.quiet, None);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<AutoInstallError>()
                .map(AutoInstallError::exit_code)
                .unwrap_or(1);
            eprintln!("Error: {:#}", e);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = cli.settings.as_deref();
    let options = CollectorOptions {
        automated: cli.automated,
        no_info_messages: cli.no_info_messages,
    };

    match cli.command {
        Commands::Install { reveal_secrets } => install_command(settings, options, reveal_secrets)
            .await
            .context("installation did not complete"),
        Commands::Plan {
            preview,
            reveal_secrets,
        } => plan_command(settings, options, preview, reveal_secrets)
            .await
            .context("could not build an installation plan"),
        Commands::ListDisks { json } => Ok(list_disks_command(settings, json).await?),
        Commands::CheckPrereqs => Ok(check_prerequisites_command(settings).await?),
    }
}
