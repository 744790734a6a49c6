// file: src/error.rs
// version: 2.1.0
// guid: 57b83a63-07b6-4534-aa6c-51e8797254e0

//! Error types for the ZFS root installer

use thiserror::Error;

/// Result type alias for the installer
pub type Result<T> = std::result::Result<T, AutoInstallError>;

/// Every failure the installer can surface
#[derive(Error, Debug)]
pub enum AutoInstallError {
    #[error("Precondition failed: {0}")]
    PreconditionError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Prompt error: {0}")]
    PromptError(String),

    #[error("No suitable disks found: every block device is optical, removable or backs a mounted filesystem")]
    NoSuitableDisksError,

    #[error("No Timeshift snapshot found: {0}")]
    NoSnapshotFoundError(String),

    #[error("Command `{command}` failed with exit code {exit_code:?}: {stderr}")]
    ProcessError {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ZFS integrity error: {0}")]
    CacheIntegrityError(String),

    #[error("Timed out: {0}")]
    TimeoutError(String),

    #[error("Installation error: {0}")]
    InstallationError(String),

    #[error("Interrupted by user")]
    Interrupted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl AutoInstallError {
    /// Create a new precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionError(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new installation error
    pub fn installation(msg: impl Into<String>) -> Self {
        Self::InstallationError(msg.into())
    }

    /// Process exit code reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PreconditionError(_) => 2,
            Self::ValidationError(_) | Self::ConfigError(_) | Self::PromptError(_) => 3,
            Self::NoSuitableDisksError
            | Self::NoSnapshotFoundError(_)
            | Self::ProcessError { .. } => 4,
            Self::CacheIntegrityError(_) | Self::TimeoutError(_) => 5,
            Self::Interrupted => 130,
            _ => 1,
        }
    }
}

impl From<inquire::InquireError> for AutoInstallError {
    fn from(e: inquire::InquireError) -> Self {
        match e {
            inquire::InquireError::OperationInterrupted
            | inquire::InquireError::OperationCanceled => Self::Interrupted,
            other => Self::PromptError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_taxonomy() {
        assert_eq!(AutoInstallError::precondition("not root").exit_code(), 2);
        assert_eq!(AutoInstallError::validation("bad host").exit_code(), 3);
        assert_eq!(AutoInstallError::NoSuitableDisksError.exit_code(), 4);
        assert_eq!(
            AutoInstallError::CacheIntegrityError("empty".into()).exit_code(),
            5
        );
        assert_eq!(AutoInstallError::Interrupted.exit_code(), 130);
        assert_eq!(AutoInstallError::installation("boom").exit_code(), 1);
    }

    #[test]
    fn test_process_error_display_includes_command() {
        let err = AutoInstallError::ProcessError {
            command: "zpool create rpool".into(),
            exit_code: Some(1),
            stderr: "pool already exists".into(),
        };
        let text = err.to_string();
        assert!(text.contains("zpool create rpool"));
        assert!(text.contains("pool already exists"));
    }
}
