// file: src/executor/secret.rs
// version: 1.0.0
// guid: 0b7d2c1e-8f43-4a6e-b5d9-1c2e3f4a5b6c

//! Secret values that must never reach argv, the environment or the logs

use std::fmt;

/// A passphrase or password
///
/// The only way a secret reaches a child process is through its stdin, see
/// [`crate::executor::Cmd::stdin_secret`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the clear-text value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length in characters, not bytes
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "Secret(<empty>)")
        } else {
            write!(f, "Secret(<redacted>)")
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_prints_value() {
        let secret = Secret::new("hunter22hunter22");
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("hunter22"));
        assert_eq!(printed, "Secret(<redacted>)");
    }

    #[test]
    fn test_char_len_counts_characters() {
        assert_eq!(Secret::new("pässwörd").char_len(), 8);
        assert!(Secret::default().is_empty());
    }
}
