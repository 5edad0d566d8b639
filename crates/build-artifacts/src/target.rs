//! Remote storage location and the secret that unlocks it.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;
use crate::kind::ArchiveName;
use crate::Result;

/// Bucket holding per-run archives.
pub const DEFAULT_BUCKET: &str = "gs://amp-travis-builds";
/// Encrypted service-account key checked into the repository.
pub const DEFAULT_ENCRYPTED_KEY_FILE: &str = "build-system/common/sa-travis-key.json.enc";
/// Where the decrypted key is written.
pub const DEFAULT_KEY_FILE: &str = "sa-travis-key.json";
pub const DEFAULT_PROJECT_ID: &str = "amp-travis-build-storage";
pub const DEFAULT_SERVICE_ACCOUNT: &str =
    "sa-travis@amp-travis-build-storage.iam.gserviceaccount.com";

/// The bucket, identity and project every transfer uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTarget {
    /// Bucket URI (`gs://<bucket>`); archives live at its root.
    pub bucket: String,
    /// Encrypted service-account key, relative to the workspace.
    pub encrypted_key_file: PathBuf,
    /// Decrypted key output, relative to the workspace.
    pub key_file: PathBuf,
    /// Cloud project id.
    pub project_id: String,
    /// Service-account identity to activate.
    pub service_account: String,
}

impl Default for StorageTarget {
    fn default() -> Self {
        StorageTarget {
            bucket: DEFAULT_BUCKET.to_string(),
            encrypted_key_file: PathBuf::from(DEFAULT_ENCRYPTED_KEY_FILE),
            key_file: PathBuf::from(DEFAULT_KEY_FILE),
            project_id: DEFAULT_PROJECT_ID.to_string(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
        }
    }
}

impl StorageTarget {
    /// Target a different bucket with the default identity.
    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = bucket.to_string();
        self
    }

    /// Full object URI for an archive: `<bucket>/<archive>`.
    pub fn object_uri(&self, archive: &ArchiveName) -> String {
        format!("{}/{}", self.bucket.trim_end_matches('/'), archive)
    }

    /// Reject obviously unusable configuration before any command runs.
    pub fn validate(&self) -> Result<()> {
        let Some(name) = self.bucket.strip_prefix("gs://") else {
            return Err(ArtifactError::InvalidTarget(format!(
                "bucket must be a gs:// URI, got {:?}",
                self.bucket
            )));
        };
        if name.trim_end_matches('/').is_empty() || name.trim_end_matches('/').contains('/') {
            return Err(ArtifactError::InvalidTarget(format!(
                "bucket must name a bucket root, got {:?}",
                self.bucket
            )));
        }
        if self.project_id.trim().is_empty() {
            return Err(ArtifactError::InvalidTarget("project id is empty".to_string()));
        }
        if self.service_account.trim().is_empty() {
            return Err(ArtifactError::InvalidTarget(
                "service account is empty".to_string(),
            ));
        }
        if self.key_file.as_os_str().is_empty() || self.encrypted_key_file.as_os_str().is_empty() {
            return Err(ArtifactError::InvalidTarget("key file path is empty".to_string()));
        }
        Ok(())
    }
}

/// Symmetric key for the encrypted service-account key.
///
/// Never printed: `Debug` and `Display` are redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageSecret(String);

impl StorageSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        StorageSecret(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorageSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StorageSecret(<redacted>)")
    }
}

impl fmt::Display for StorageSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{ArtifactKind, RunId};

    #[test]
    fn test_default_target_is_valid() {
        let target = StorageTarget::default();
        assert!(target.validate().is_ok());
        assert_eq!(target.bucket, "gs://amp-travis-builds");
    }

    #[test]
    fn test_object_uri() {
        let name = ArtifactKind::Build
            .archive_name("amp", &RunId::new("1234").unwrap())
            .unwrap();
        let target = StorageTarget::default();
        assert_eq!(
            target.object_uri(&name),
            "gs://amp-travis-builds/amp_build_1234.zip"
        );
        let target = target.with_bucket("gs://other/");
        assert_eq!(target.object_uri(&name), "gs://other/amp_build_1234.zip");
    }

    #[test]
    fn test_validate_rejects_bad_buckets() {
        for bucket in ["amp-travis-builds", "s3://x", "gs://", "gs://a/b"] {
            let target = StorageTarget::default().with_bucket(bucket);
            assert!(target.validate().is_err(), "{bucket} should be rejected");
        }
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = StorageSecret::new("hunter2");
        assert_eq!(secret.to_string(), "<redacted>");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }
}
