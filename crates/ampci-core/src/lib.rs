//! ampci Core Library
//!
//! Shared plumbing for CI orchestration: running external commands,
//! timing steps and printing progress for humans reading CI logs.

pub mod error;
pub mod exec;
pub mod fakes;
pub mod reporter;
pub mod telemetry;
pub mod timer;

pub use error::{ExecError, Result};
pub use exec::{CapturedOutput, CommandRunner, CommandSpec, ExitOutcome, SystemRunner};
pub use reporter::{Reporter, Style};
pub use telemetry::init_tracing;
pub use timer::{format_elapsed, timed_exec, timed_exec_or_fail, TimedOperation};

/// ampci version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
