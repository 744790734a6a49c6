// file: tests/cli_test.rs
// version: 1.0.0
// guid: 3b5d7f9a-1c3e-4a5b-8d7f-9b1d3f5a7c9e

//! Command-line behaviour that needs no disks

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn installer(log_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("zfs-root-installer").unwrap();
    cmd.arg("--log-file")
        .arg(log_dir.path().join("install.log"))
        .env_remove("ZFS_PASSPHRASE")
        .env_remove("ZFS_AUTOMATED");
    cmd
}

#[test]
fn test_short_passphrase_fails_before_touching_disks() {
    let logs = TempDir::new().unwrap();
    installer(&logs)
        .arg("install")
        .env("ZFS_AUTOMATED", "1")
        .env("ZFS_PASSPHRASE", "shortpa")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ZFS_PASSPHRASE"));

    let log = std::fs::read_to_string(logs.path().join("install.log")).unwrap();
    assert!(!log.contains("sgdisk"));
    assert!(!log.contains("zpool"));
    assert!(log.contains("nothing to replay"));
    assert!(log.contains("exit code 2"));
}

#[test]
fn test_plan_rejects_short_passphrase_too() {
    let logs = TempDir::new().unwrap();
    installer(&logs)
        .args(["plan", "--preview"])
        .env("ZFS_PASSPHRASE", "1234567")
        .assert()
        .code(2);
}

#[test]
fn test_bad_settings_file_is_a_configuration_error() {
    let logs = TempDir::new().unwrap();
    let settings = logs.path().join("settings.toml");
    std::fs::write(&settings, "efi_partition_mib = 0\n").unwrap();

    installer(&logs)
        .arg("--settings")
        .arg(&settings)
        .arg("check-prereqs")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("efi_partition_mib"));
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("zfs-root-installer")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("list-disks"))
        .stdout(predicate::str::contains("check-prereqs"));
}
