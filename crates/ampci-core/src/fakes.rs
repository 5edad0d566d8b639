//! In-memory fakes for tests.
//!
//! [`RecordingRunner`] stands in for [`crate::exec::SystemRunner`]: it records
//! every command, answers with scripted exit codes and captured output, and
//! can run a handler to simulate a tool's side effects (e.g. a `gsutil cp`
//! that copies into a local directory standing in for the bucket).

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::exec::{CapturedOutput, CommandRunner, CommandSpec, ExitOutcome};

type Handler = Box<dyn Fn(&CommandSpec) -> i32 + Send + Sync>;

/// Command runner that records invocations instead of spawning processes.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    exit_codes: HashMap<String, i32>,
    stdout: HashMap<String, String>,
    handlers: Vec<(String, Handler)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `code` whenever `program` is invoked.
    pub fn fail_on(mut self, program: &str, code: i32) -> Self {
        self.exit_codes.insert(program.to_string(), code);
        self
    }

    /// Captured stdout for commands whose rendered form starts with `prefix`.
    pub fn stdout_for(mut self, prefix: &str, stdout: &str) -> Self {
        self.stdout.insert(prefix.to_string(), stdout.to_string());
        self
    }

    /// Run `handler` for every invocation of `program`; its return value is
    /// the exit code.
    pub fn on<F>(mut self, program: &str, handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> i32 + Send + Sync + 'static,
    {
        self.handlers.push((program.to_string(), Box::new(handler)));
        self
    }

    /// Every command seen so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered command lines seen so far, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn dispatch(&self, cmd: &CommandSpec) -> i32 {
        self.calls.lock().unwrap().push(cmd.clone());

        let mut code = 0;
        for (program, handler) in &self.handlers {
            if *program == cmd.program {
                code = handler(cmd);
            }
        }
        if let Some(scripted) = self.exit_codes.get(&cmd.program) {
            code = *scripted;
        }
        code
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<ExitOutcome> {
        let code = self.dispatch(cmd);
        Ok(ExitOutcome {
            code: Some(code),
            duration_ms: 0,
        })
    }

    async fn capture(&self, cmd: &CommandSpec) -> Result<CapturedOutput> {
        let code = self.dispatch(cmd);
        let rendered = cmd.to_string();
        let stdout = self
            .stdout
            .iter()
            .filter(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(CapturedOutput {
            code: Some(code),
            stdout,
            stderr: String::new(),
        })
    }
}

/// Cloneable in-memory writer for capturing [`crate::reporter::Reporter`] output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_in_order() {
        let runner = RecordingRunner::new();
        runner.run(&CommandSpec::new("a")).await.unwrap();
        runner.run(&CommandSpec::new("b").arg("x")).await.unwrap();
        assert_eq!(runner.command_lines(), vec!["a", "b x"]);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let runner = RecordingRunner::new().fail_on("gsutil", 1);
        let err = runner
            .run_or_fail(&CommandSpec::new("gsutil").arg("cp"))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[tokio::test]
    async fn test_handler_sets_exit_code() {
        let runner = RecordingRunner::new().on("tool", |cmd| cmd.args.len() as i32);
        let outcome = runner
            .run(&CommandSpec::new("tool").args(["a", "b"]))
            .await
            .unwrap();
        assert_eq!(outcome.code, Some(2));
    }

    #[tokio::test]
    async fn test_capture_longest_prefix_wins() {
        let runner = RecordingRunner::new()
            .stdout_for("git", "generic")
            .stdout_for("git merge-base", "abc123\n");
        let out = runner
            .capture(&CommandSpec::new("git").args(["merge-base", "main", "HEAD"]))
            .await
            .unwrap();
        assert_eq!(out.stdout_trimmed(), "abc123");
    }
}
