// file: src/config/validation.rs
// version: 1.2.0
// guid: 9a8b7c6d-5e4f-3a2b-1c0d-9e8f7a6b5c4d

//! Field validators for the installation plan
//!
//! Each validator either returns the normalized value or a
//! [`AutoInstallError::ValidationError`] whose message is shown to the
//! operator before re-prompting.

use crate::error::AutoInstallError;
use crate::executor::Secret;
use crate::Result;
use regex::Regex;

/// Minimum passphrase length for ZFS native encryption
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Smallest boot-pool partition that holds a couple of kernels
pub const MIN_BOOT_PARTITION_MIB: u64 = 512;

/// Validate hostname according to RFC 1123
pub fn validate_hostname(hostname: &str) -> Result<String> {
    let hostname = hostname.trim();
    if hostname.is_empty() {
        return Err(AutoInstallError::validation("Hostname cannot be empty"));
    }

    let hostname_regex = Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?$")
        .expect("Invalid hostname regex");
    if !hostname_regex.is_match(hostname) {
        return Err(AutoInstallError::validation(format!(
            "Invalid hostname '{}': use 1-63 letters, digits or '-', not starting or ending with '-'",
            hostname
        )));
    }

    Ok(hostname.to_string())
}

/// Validate a Linux login name
pub fn validate_username(username: &str) -> Result<String> {
    let username = username.trim();
    let username_regex = Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("Invalid username regex");
    if !username_regex.is_match(username) {
        return Err(AutoInstallError::validation(format!(
            "Invalid username '{}': lowercase letters, digits, '_' or '-', starting with a letter or '_'",
            username
        )));
    }
    if username == "root" {
        return Err(AutoInstallError::validation(
            "The primary user cannot be 'root'",
        ));
    }

    Ok(username.to_string())
}

/// Validate the GECOS full name
pub fn validate_full_name(full_name: &str) -> Result<String> {
    let full_name = full_name.trim();
    if full_name.contains([':', ',', '\n']) {
        return Err(AutoInstallError::validation(
            "Full name cannot contain ':', ',' or newlines",
        ));
    }
    Ok(full_name.to_string())
}

/// Validate the root pool name
pub fn validate_pool_name(name: &str) -> Result<String> {
    let name = name.trim();
    let pool_regex = Regex::new(r"^[a-z][a-zA-Z_:.-]+$").expect("Invalid pool name regex");
    if !pool_regex.is_match(name) {
        return Err(AutoInstallError::validation(format!(
            "Invalid pool name '{}': must start with a lowercase letter and contain only letters, '_', ':', '.' or '-'",
            name
        )));
    }
    if name == super::plan::BOOT_POOL_NAME {
        return Err(AutoInstallError::validation(format!(
            "The root pool cannot be named '{}', that name belongs to the boot pool",
            name
        )));
    }
    Ok(name.to_string())
}

/// Validate an encryption passphrase: empty disables encryption
pub fn validate_passphrase(passphrase: &Secret) -> Result<()> {
    if !passphrase.is_empty() && passphrase.char_len() < MIN_PASSPHRASE_LEN {
        return Err(AutoInstallError::validation(format!(
            "The passphrase must be at least {} characters long, or empty to disable encryption",
            MIN_PASSPHRASE_LEN
        )));
    }
    // zpool reads the key from stdin up to the first newline
    if passphrase.expose().contains('\n') {
        return Err(AutoInstallError::validation(
            "The passphrase cannot contain newlines",
        ));
    }
    Ok(())
}

/// Validate a login password
pub fn validate_password(password: &Secret) -> Result<()> {
    if password.is_empty() {
        return Err(AutoInstallError::validation("The password cannot be empty"));
    }
    if password.expose().contains('\n') {
        return Err(AutoInstallError::validation(
            "The password cannot contain newlines",
        ));
    }
    Ok(())
}

/// Parse a boot partition size such as `2048M` or `2G` into MiB
pub fn parse_boot_partition_size(size: &str) -> Result<u64> {
    let size_regex = Regex::new(r"^(\d+)([MG])$").expect("Invalid size regex");
    let caps = size_regex.captures(size.trim()).ok_or_else(|| {
        AutoInstallError::validation(format!(
            "Invalid boot partition size '{}': use a number followed by M or G, e.g. 2048M",
            size
        ))
    })?;

    let value: u64 = caps[1]
        .parse()
        .map_err(|_| AutoInstallError::validation(format!("Size out of range: {}", size)))?;
    let mib = match &caps[2] {
        "G" => value.checked_mul(1024).ok_or_else(|| {
            AutoInstallError::validation(format!("Size out of range: {}", size))
        })?,
        _ => value,
    };

    if mib < MIN_BOOT_PARTITION_MIB {
        return Err(AutoInstallError::validation(format!(
            "The boot partition must be at least {}M",
            MIN_BOOT_PARTITION_MIB
        )));
    }
    Ok(mib)
}

/// Parse a whole number of GiB
pub fn parse_gib(field: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        AutoInstallError::validation(format!(
            "{} must be a whole number of GiB, got '{}'",
            field, value
        ))
    })
}

/// Validate an IANA timezone name such as `Europe/Rome`
pub fn validate_timezone(timezone: &str) -> Result<String> {
    let tz_regex = Regex::new(r"^[A-Za-z0-9_+\-]+(/[A-Za-z0-9_+\-]+)*$").expect("Invalid timezone regex");
    let timezone = timezone.trim();
    if !tz_regex.is_match(timezone) {
        return Err(AutoInstallError::validation(format!(
            "Invalid timezone '{}'",
            timezone
        )));
    }
    Ok(timezone.to_string())
}

/// Validate a locale such as `en_US.UTF-8`
pub fn validate_locale(locale: &str) -> Result<String> {
    let locale_regex = Regex::new(r"^[a-z]{2,3}(_[A-Z]{2})?(\.[A-Za-z0-9-]+)?(@[a-z]+)?$")
        .expect("Invalid locale regex");
    let locale = locale.trim();
    if !locale_regex.is_match(locale) {
        return Err(AutoInstallError::validation(format!(
            "Invalid locale '{}', expected something like en_US.UTF-8",
            locale
        )));
    }
    Ok(locale.to_string())
}

/// Validate an XKB keyboard layout such as `us` or `de`
pub fn validate_keyboard_layout(layout: &str) -> Result<String> {
    let layout_regex = Regex::new(r"^[a-z]{2,8}$").expect("Invalid layout regex");
    let layout = layout.trim();
    if !layout_regex.is_match(layout) {
        return Err(AutoInstallError::validation(format!(
            "Invalid keyboard layout '{}'",
            layout
        )));
    }
    Ok(layout.to_string())
}

/// Parse a `0`/`1` flag
pub fn parse_flag(field: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "1" => Ok(true),
        "0" | "" => Ok(false),
        other => Err(AutoInstallError::validation(format!(
            "{} must be 0 or 1, got '{}'",
            field, other
        ))),
    }
}
