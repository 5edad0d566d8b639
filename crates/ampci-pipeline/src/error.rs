//! Pipeline-level error taxonomy.

use std::path::PathBuf;

use ampci_core::ExecError;
use build_artifacts::ArtifactError;

/// Errors produced by CI pipelines.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("URL rewrite in {} failed: {source}", .dir.display())]
    Rewrite {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The branch shares no history with trunk. Returned to the caller,
    /// which decides whether to abort.
    #[error("could not find a common ancestor between HEAD and {trunk}")]
    MissingMergeBase { trunk: String, remediation: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("Sauce Connect access key request to {url} failed: {message}")]
    SauceToken { url: String, message: String },

    #[error("Sauce Connect {action} script failed: {source}")]
    SauceScript {
        action: &'static str,
        #[source]
        source: ExecError,
    },

    #[error("upload signal failed: {0}")]
    Signal(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Http(err.to_string())
    }
}

impl PipelineError {
    /// Exit code of the external command that caused this error, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PipelineError::Artifact(err) => err.exit_code(),
            PipelineError::Exec(err) => err.exit_code(),
            PipelineError::SauceScript { source, .. } => source.exit_code(),
            _ => None,
        }
    }

    /// How to fix the problem, for errors that have a known fix.
    pub fn remediation(&self) -> Option<&str> {
        match self {
            PipelineError::MissingMergeBase { remediation, .. } => Some(remediation),
            _ => None,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
