// file: src/config/transcript.rs
// version: 1.0.0
// guid: 1e3a5c7b-9d2f-4b6a-8c0e-2f4b6d8a0c1e

//! Replayable `export ZFS_*=...` transcript
//!
//! The collector records each value as soon as it is final, so an
//! interrupted run still prints everything answered so far.

use super::plan::InstallationPlan;
use crate::error::AutoInstallError;
use crate::Result;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    value: String,
    secret: bool,
}

/// Ordered variable assignments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<Entry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_plan(plan: &InstallationPlan) -> Self {
        let mut transcript = Self::new();
        for (name, value, secret) in plan.to_env() {
            transcript.record(name, value, secret);
        }
        transcript
    }

    /// Set `name`, keeping its original position when already present
    pub fn record(&mut self, name: &str, value: impl Into<String>, secret: bool) {
        let value = value.into();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.value = value;
                entry.secret = secret;
            }
            None => self.entries.push(Entry {
                name: name.to_string(),
                value,
                secret,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }

    /// Shell lines; non-empty secrets are commented out unless `reveal_secrets`
    pub fn render(&self, reveal_secrets: bool) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            if entry.secret && !entry.value.is_empty() && !reveal_secrets {
                out.push_str(&format!(
                    "# export {}=<redacted>  (set it before replaying)\n",
                    entry.name
                ));
            } else {
                out.push_str(&format!(
                    "export {}={}\n",
                    entry.name,
                    shell_quote(&entry.value)
                ));
            }
        }
        out
    }

    /// Parse rendered `export` lines back into variables; comments are skipped
    pub fn parse(text: &str) -> Result<HashMap<String, String>> {
        let mut vars = HashMap::new();
        let mut chars = text.chars().peekable();

        loop {
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            match chars.peek() {
                None => break,
                Some('#') => {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                    continue;
                }
                Some(_) => {}
            }

            let keyword: String = chars.by_ref().take_while(|c| !c.is_whitespace()).collect();
            if keyword != "export" {
                return Err(AutoInstallError::config(format!(
                    "Unexpected token '{}' in transcript",
                    keyword
                )));
            }

            let mut name = String::new();
            let mut found_eq = false;
            for c in chars.by_ref() {
                if c == '=' {
                    found_eq = true;
                    break;
                }
                name.push(c);
            }
            if !found_eq || name.is_empty() {
                return Err(AutoInstallError::config(format!(
                    "Malformed assignment for '{}' in transcript",
                    name
                )));
            }

            let mut value = String::new();
            while let Some(&c) = chars.peek() {
                match c {
                    '\'' => {
                        chars.next();
                        let mut closed = false;
                        for q in chars.by_ref() {
                            if q == '\'' {
                                closed = true;
                                break;
                            }
                            value.push(q);
                        }
                        if !closed {
                            return Err(AutoInstallError::config(format!(
                                "Unterminated quote in value of {}",
                                name
                            )));
                        }
                    }
                    '\\' => {
                        chars.next();
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    c if c.is_whitespace() => break,
                    c => {
                        chars.next();
                        value.push(c);
                    }
                }
            }
            vars.insert(name, value);
        }

        Ok(vars)
    }
}

/// Single-quote a value for POSIX shells
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
