//! External command execution.
//!
//! Every interaction with the outside world (archive upload, cloud CLI,
//! cipher tool, git, proxy scripts) goes through a [`CommandRunner`]. The
//! production implementation is [`SystemRunner`]; tests substitute
//! [`crate::fakes::RecordingRunner`].
//!
//! Nothing in here terminates the process. A failing command surfaces as
//! [`ExecError::CommandFailed`] and the binary decides what to do with it.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ExecError, Result};

/// A single external command invocation.
///
/// Extra environment variables are applied to the child only. Their values
/// never appear in `Display` or `Debug` output, so secrets handed to a tool
/// through its environment stay out of logs.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments, not including the program.
    pub args: Vec<String>,
    /// Extra environment for the child.
    pub env: Vec<(String, String)>,
    /// Working directory override.
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    /// Build from an argv vector (first element is the program).
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Value of an extra environment variable, if set on this command.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether this invocation is `program` followed by the given leading args.
    ///
    /// `cmd.is("gcloud", &["config", "set"])` matches any `gcloud config set ...`.
    pub fn is(&self, program: &str, leading: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= leading.len()
            && self.args.iter().zip(leading).all(|(a, b)| a == b)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field(
                "env",
                &self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .field("current_dir", &self.current_dir)
            .finish()
    }
}

fn quote(word: &str) -> String {
    if word.is_empty() {
        "''".to_string()
    } else if word.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", word.replace('\'', r"'\''"))
    } else {
        word.to_string()
    }
}

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code (`None` when terminated by a signal).
    pub code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Captured output from a command run with [`CommandRunner::capture`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Trimmed stdout.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command with inherited stdio and report how it exited.
    ///
    /// Only a spawn failure is an `Err`; a non-zero exit is a normal outcome.
    async fn run(&self, cmd: &CommandSpec) -> Result<ExitOutcome>;

    /// Run a command with stdout/stderr captured.
    async fn capture(&self, cmd: &CommandSpec) -> Result<CapturedOutput>;

    /// Run a command and turn a non-zero exit into [`ExecError::CommandFailed`].
    async fn run_or_fail(&self, cmd: &CommandSpec) -> Result<()> {
        let outcome = self.run(cmd).await?;
        if outcome.success() {
            Ok(())
        } else {
            Err(ExecError::CommandFailed {
                command: cmd.to_string(),
                code: outcome.code,
            })
        }
    }
}

/// Runs commands as real child processes via `tokio::process`.
///
/// No retries and no timeouts: a hung tool hangs the caller until the CI
/// job limit kills it.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    working_dir: Option<PathBuf>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default working directory for commands that do not set their own.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }

    fn command(&self, cmd: &CommandSpec) -> Result<Command> {
        if cmd.program.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        command.envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = cmd.current_dir.as_ref().or(self.working_dir.as_ref()) {
            command.current_dir(dir);
        }
        Ok(command)
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<ExitOutcome> {
        let start = Instant::now();
        debug!(command = %cmd, "running");

        let status = self
            .command(cmd)?
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| ExecError::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        let outcome = ExitOutcome {
            code: status.code(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!(command = %cmd, code = ?outcome.code, duration_ms = outcome.duration_ms, "finished");
        Ok(outcome)
    }

    async fn capture(&self, cmd: &CommandSpec) -> Result<CapturedOutput> {
        debug!(command = %cmd, "capturing");

        let output = self
            .command(cmd)?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        Ok(CapturedOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
