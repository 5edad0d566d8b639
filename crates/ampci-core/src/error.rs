//! Error types for external command execution.

use thiserror::Error;

/// Errors raised while running an external command.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The command line had no program to run.
    #[error("empty command")]
    EmptyCommand,

    /// The process could not be started at all (missing binary, permissions).
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully.
    #[error("`{command}` exited with {}", describe_code(*.code))]
    CommandFailed { command: String, code: Option<i32> },

    /// IO error while waiting on the child.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Exit code to propagate to the caller's own process, if one exists.
    ///
    /// A failed command that was killed by a signal has no code; callers fall
    /// back to a generic failure status.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Result type for command execution.
pub type Result<T> = std::result::Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = ExecError::CommandFailed {
            command: "gsutil cp a b".to_string(),
            code: Some(3),
        };
        assert_eq!(err.to_string(), "`gsutil cp a b` exited with exit code 3");
        assert_eq!(err.exit_code(), Some(3));
    }

    #[test]
    fn test_signal_termination_has_no_exit_code() {
        let err = ExecError::CommandFailed {
            command: "zip".to_string(),
            code: None,
        };
        assert!(err.to_string().contains("terminated by signal"));
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn test_spawn_error_has_no_exit_code() {
        let err = ExecError::Spawn {
            command: "nonexistent".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("failed to spawn"));
        assert_eq!(err.exit_code(), None);
    }
}
