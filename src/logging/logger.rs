// file: src/logging/logger.rs
// version: 1.3.0
// guid: j0k1l2m3-n4o5-6789-0123-456789jklmno

//! Logger initialization and configuration

use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{Instrument, Subscriber};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Build the level filter from the CLI flags, letting `RUST_LOG` win when set
fn build_filter(verbose: bool, quiet: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    }
}

/// Default per-run log file location
pub fn default_log_file() -> PathBuf {
    let now = chrono::Local::now();
    PathBuf::from(format!(
        "/var/log/zfs-root-installer-{}.log",
        now.format("%Y%m%d_%H%M%S")
    ))
}

/// ANSI-free layer appending to `path`, creating its parent directories
fn file_layer<S>(path: &Path) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file)))
}

/// Initialize the logging system
///
/// Logs go to stderr so that stdout stays clean for the replay transcript.
/// When `log_file` is given, a second ANSI-free layer appends to it.
pub fn init_logger(verbose: bool, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let file = log_file.map(|path| file_layer(path)).transpose()?;

    tracing_subscriber::registry()
        .with(build_filter(verbose, quiet))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(file)
        .try_init()
        .map_err(|e| {
            crate::error::AutoInstallError::ConfigError(format!(
                "Failed to initialize logger: {}",
                e
            ))
        })?;

    if let Some(path) = log_file {
        tracing::info!("Logging to {}", path.display());
    }

    Ok(())
}

/// Run an async phase inside a named tracing span
pub async fn with_async_operation_span<F, Fut, R>(operation: &str, f: F) -> R
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = R>,
{
    let span = tracing::info_span!("phase", name = operation);
    async move { f().await }.instrument(span).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_file_is_under_var_log() {
        let path = default_log_file();
        assert!(path.starts_with("/var/log"));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("zfs-root-installer-"));
    }

    #[test]
    fn test_file_layer_writes_events() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("nested").join("install.log");

        let subscriber = tracing_subscriber::registry().with(file_layer(&log).unwrap());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Wiping /dev/disk/by-id/ata-QM1");
        });

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("Wiping /dev/disk/by-id/ata-QM1"));
        assert!(!contents.contains('\u{1b}'));
    }

    #[tokio::test]
    async fn test_with_async_operation_span() {
        let result = with_async_operation_span("partitioning", || async { 42 }).await;
        assert_eq!(result, 42);
    }
}
