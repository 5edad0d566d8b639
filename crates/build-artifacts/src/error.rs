//! Error types for build-artifacts

use std::path::PathBuf;

use ampci_core::ExecError;
use thiserror::Error;

/// Errors that can occur while packaging or transferring build artifacts
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Run id unusable in an object name
    #[error("Invalid run id: {0:?}")]
    InvalidRunId(String),

    /// Archive prefix unusable in an object name
    #[error("Invalid archive prefix: {0:?}")]
    InvalidPrefix(String),

    /// Unknown artifact kind name
    #[error("Unknown artifact kind: {0} (expected `build` or `dist`)")]
    UnknownKind(String),

    /// Storage target misconfigured
    #[error("Invalid storage target: {0}")]
    InvalidTarget(String),

    /// A directory or file to archive does not exist
    #[error("Archive input not found: {}", .0.display())]
    MissingInput(PathBuf),

    /// Archive member would extract outside the workspace
    #[error("Unsafe archive entry: {0}")]
    UnsafeArchiveEntry(String),

    /// One step of service-account authentication failed
    #[error("Authentication step `{step}` failed: {source}")]
    Authenticate {
        step: &'static str,
        #[source]
        source: ExecError,
    },

    /// Copying the archive to the bucket failed
    #[error("Upload to {destination} failed: {source}")]
    Upload {
        destination: String,
        #[source]
        source: ExecError,
    },

    /// Copying the archive from the bucket failed
    #[error("Download of {uri} failed: {source}")]
    Download {
        uri: String,
        #[source]
        source: ExecError,
    },

    /// Expected outputs missing after extraction
    #[error("Extracted output is missing: {}", .missing.join(", "))]
    VerificationFailed { missing: Vec<String> },

    /// Zip format error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtifactError {
    /// Exit code of the external command behind this error, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ArtifactError::Authenticate { source, .. }
            | ArtifactError::Upload { source, .. }
            | ArtifactError::Download { source, .. } => source.exit_code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_from_failed_copy() {
        let err = ArtifactError::Upload {
            destination: "gs://bucket/a.zip".to_string(),
            source: ExecError::CommandFailed {
                command: "gsutil -m cp a.zip gs://bucket/a.zip".to_string(),
                code: Some(1),
            },
        };
        assert_eq!(err.exit_code(), Some(1));
        assert!(err.to_string().contains("gs://bucket/a.zip"));
    }

    #[test]
    fn test_verification_lists_missing() {
        let err = ArtifactError::VerificationFailed {
            missing: vec!["build".to_string(), "dist".to_string()],
        };
        assert_eq!(err.to_string(), "Extracted output is missing: build, dist");
        assert_eq!(err.exit_code(), None);
    }
}
