//! External command execution
//!
//! Every interaction with the database server goes through an external tool
//! (`pg_dump`, `pg_restore`, `psql`, `pg_waldump`). The orchestrators build an
//! [`Invocation`] and hand it to a [`CommandRunner`]; production code uses
//! [`SystemRunner`], tests substitute a scripted fake.

use std::fmt;
use std::io;
use std::process::Command;

/// A fully described external command
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Invocation {
    /// Start an invocation of `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in order
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Extra environment for the child
    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    /// Value of an environment variable set on this invocation
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True if any argument equals `arg`
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Argument following the first occurrence of `flag`
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        let idx = self.args.iter().position(|a| a == flag)?;
        self.args.get(idx + 1).map(String::as_str)
    }
}

// Environment is left out so passwords never reach the logs.
impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Successful exit with the given stdout
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        CommandOutput {
            status: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Failed exit with the given code and stderr
    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        CommandOutput {
            status: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    /// True when the command exited with code 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Standard output as text
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error as text
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Standard output followed by standard error
    pub fn combined_lossy(&self) -> String {
        let mut combined = self.stdout_lossy();
        combined.push_str(&self.stderr_lossy());
        combined
    }

    /// Human readable exit status
    pub fn status_description(&self) -> String {
        match self.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    /// One-line description of a failed run
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr_lossy();
        let stderr = stderr.trim();
        if stderr.is_empty() {
            self.status_description()
        } else {
            format!("{}: {}", self.status_description(), stderr)
        }
    }
}

/// Runs external commands to completion
pub trait CommandRunner: Send + Sync {
    /// Run `invocation`, capturing its output
    ///
    /// A non-zero exit is not an error at this level; callers inspect
    /// [`CommandOutput::success`]. Errors mean the command never ran.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        let output = Command::new(invocation.program())
            .args(invocation.arg_list())
            .envs(invocation.env_vars().iter().map(|(k, v)| (k, v)))
            .output()
            .map_err(|source| CommandError::Spawn {
                program: invocation.program().to_string(),
                source,
            })?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Command execution errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The program could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_lookup() {
        let inv = Invocation::new("pg_dump")
            .args(["-h", "db", "-F", "d"])
            .arg("-v")
            .env("PGPASSWORD", "secret");

        assert_eq!(inv.arg_after("-h"), Some("db"));
        assert_eq!(inv.arg_after("-v"), None);
        assert!(inv.has_arg("-v"));
        assert_eq!(inv.env_var("PGPASSWORD"), Some("secret"));
    }

    #[test]
    fn test_display_hides_environment() {
        let inv = Invocation::new("psql").arg("-c").env("PGPASSWORD", "hunter2");
        let shown = format!("{} {:?}", inv, inv);
        assert!(!shown.contains("hunter2"));
        assert!(shown.starts_with("psql -c"));
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(CommandOutput::failed(2, "").failure_reason(), "exit status 2");
        assert_eq!(
            CommandOutput::failed(1, "boom\n").failure_reason(),
            "exit status 1: boom"
        );
        let killed = CommandOutput {
            status: None,
            ..Default::default()
        };
        assert!(!killed.success());
        assert_eq!(killed.status_description(), "terminated by signal");
    }

    #[test]
    fn test_system_runner_missing_program() {
        let result = SystemRunner.run(&Invocation::new("pgvault-definitely-not-installed"));
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }
}
