// file: src/executor/cmd.rs
// version: 1.0.0
// guid: 6a1f0e2d-3c4b-4d5e-8f70-91a2b3c4d5e6

//! Structured command lines

use super::secret::Secret;
use std::fmt;

/// One external program invocation: argv, extra environment and optional stdin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<Secret>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    /// Run `program` inside the chroot jail rooted at `root`
    pub fn chroot(root: impl Into<String>, program: impl Into<String>) -> Self {
        Self::new("chroot").arg(root).arg(program)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed `secret` followed by a newline to the child's stdin
    pub fn stdin_secret(mut self, secret: &Secret) -> Self {
        self.stdin = Some(secret.clone());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_stdin(&self) -> Option<&Secret> {
        self.stdin.as_ref()
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// True when the program or any argument equals `token`
    pub fn has_token(&self, token: &str) -> bool {
        self.argv().iter().any(|a| *a == token)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.argv().iter().map(|a| quote_arg(a)).collect();
        write!(f, "{}", rendered.join(" "))?;
        if self.stdin.is_some() {
            write!(f, " <<< <secret>")?;
        }
        Ok(())
    }
}

/// Quote an argument for display only; execution never goes through a shell
fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chroot_prefixes_root() {
        let cmd = Cmd::chroot("/mnt", "update-initramfs").args(["-u", "-k", "all"]);
        assert_eq!(
            cmd.argv(),
            vec!["chroot", "/mnt", "update-initramfs", "-u", "-k", "all"]
        );
    }

    #[test]
    fn test_display_hides_secret_and_quotes() {
        let secret = Secret::new("correct horse");
        let cmd = Cmd::new("zpool")
            .args(["import", "-l", "rpool"])
            .stdin_secret(&secret);
        let shown = cmd.to_string();
        assert_eq!(shown, "zpool import -l rpool <<< <secret>");

        let quoted = Cmd::new("useradd").args(["-c", "Jane Doe"]).to_string();
        assert_eq!(quoted, "useradd -c 'Jane Doe'");
    }

    #[test]
    fn test_has_token() {
        let cmd = Cmd::new("zpool").args(["create", "mirror", "a", "b"]);
        assert!(cmd.has_token("mirror"));
        assert!(!cmd.has_token("raidz1"));
    }
}
