//! Upload and download of archives to the storage bucket.
//!
//! Each transfer authenticates immediately before its copy call; nothing
//! assumes a credential from an earlier transfer is still valid.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ampci_core::{CommandRunner, CommandSpec, Reporter};
use serde::Serialize;
use tracing::info;

use crate::archive::{self, format_size, ArchiveSummary};
use crate::credential::authenticate;
use crate::error::ArtifactError;
use crate::kind::ArchiveName;
use crate::target::{StorageSecret, StorageTarget};
use crate::Result;

/// Outcome of [`RemoteTransfer::upload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub archive: ArchiveSummary,
    pub destination: String,
}

/// Outcome of [`RemoteTransfer::download`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub source: String,
    pub archive: PathBuf,
    pub extracted_files: usize,
    /// Workspace-relative paths found under the expected entries after extraction.
    pub listing: Vec<String>,
}

/// Moves archives between the workspace and the storage bucket.
pub struct RemoteTransfer {
    runner: Arc<dyn CommandRunner>,
    target: StorageTarget,
    secret: StorageSecret,
    workspace: PathBuf,
    reporter: Reporter,
}

impl RemoteTransfer {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        target: StorageTarget,
        secret: StorageSecret,
        workspace: impl Into<PathBuf>,
        reporter: Reporter,
    ) -> Self {
        RemoteTransfer {
            runner,
            target,
            secret,
            workspace: workspace.into(),
            reporter,
        }
    }

    pub fn target(&self) -> &StorageTarget {
        &self.target
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Local path of an archive inside the workspace.
    pub fn local_path(&self, name: &ArchiveName) -> PathBuf {
        self.workspace.join(name.as_str())
    }

    /// The copy tool may run in a different directory than this process, so
    /// it is always handed an absolute path.
    fn copy_path(&self, name: &ArchiveName) -> Result<PathBuf> {
        Ok(std::path::absolute(self.local_path(name))?)
    }

    /// Pack `entries`, authenticate, then copy the archive to
    /// `<bucket>/<name>`, overwriting any object already there.
    pub async fn upload(&self, name: &ArchiveName, entries: &[&str]) -> Result<UploadReport> {
        let r = &self.reporter;
        let local = self.copy_path(name)?;

        r.section(&format!(
            "Compressing {} into {}...",
            r.cyan(&entries.join(", ")),
            r.cyan(name.as_str())
        ));
        let summary = archive::pack(&self.workspace, &local, entries)?;
        r.info(&format!(
            "Archive size: {} ({} files)",
            r.cyan(&format_size(summary.bytes)),
            summary.files
        ));

        let destination = self.target.object_uri(name);
        r.info(&format!(
            "Uploading {} to {}...",
            r.cyan(name.as_str()),
            r.cyan(&self.target.bucket)
        ));
        authenticate(self.runner.as_ref(), &self.target, &self.secret).await?;

        let copy = CommandSpec::new("gsutil")
            .args(["-m", "cp"])
            .arg(local.to_string_lossy())
            .arg(destination.as_str());
        self.runner
            .run_or_fail(&copy)
            .await
            .map_err(|source| ArtifactError::Upload {
                destination: destination.clone(),
                source,
            })?;

        info!(archive = %name, destination = %destination, files = summary.files, bytes = summary.bytes, "Uploaded archive");
        Ok(UploadReport {
            archive: summary,
            destination,
        })
    }

    /// Authenticate, copy `<bucket>/<name>` into the workspace, extract
    /// `entries` over whatever is there, and check they all came out.
    pub async fn download(&self, name: &ArchiveName, entries: &[&str]) -> Result<DownloadReport> {
        let r = &self.reporter;
        let local = self.copy_path(name)?;
        let source = self.target.object_uri(name);

        r.section(&format!(
            "Downloading {} from {}...",
            r.cyan(name.as_str()),
            r.cyan(&source)
        ));
        authenticate(self.runner.as_ref(), &self.target, &self.secret).await?;

        let copy = CommandSpec::new("gsutil")
            .args(["-m", "cp"])
            .arg(source.as_str())
            .arg(local.to_string_lossy());
        self.runner
            .run_or_fail(&copy)
            .await
            .map_err(|err| ArtifactError::Download {
                uri: source.clone(),
                source: err,
            })?;

        r.info(&format!("Extracting {}...", r.cyan(name.as_str())));
        let extracted_files = archive::extract(&local, &self.workspace, entries)?;

        r.info("Verifying extracted files...");
        let listing = verify_layout(&self.workspace, entries)?;
        for entry in entries {
            let count = listing
                .iter()
                .filter(|p| Path::new(p).starts_with(entry))
                .count();
            r.info(&format!("{} {}", r.cyan(entry), r.green(&format!("({count} paths)"))));
        }

        info!(archive = %name, source = %source, extracted_files, "Downloaded archive");
        Ok(DownloadReport {
            source,
            archive: local,
            extracted_files,
            listing,
        })
    }
}

/// Recursively list every expected entry. Any entry that is absent means
/// the archive did not produce the expected layout.
pub fn verify_layout(workspace: &Path, entries: &[&str]) -> Result<Vec<String>> {
    let missing: Vec<String> = entries
        .iter()
        .filter(|entry| !workspace.join(entry).exists())
        .map(|entry| entry.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ArtifactError::VerificationFailed { missing });
    }

    let mut listing = Vec::new();
    for entry in entries {
        list_recursive(workspace, &workspace.join(entry), &mut listing)?;
    }
    Ok(listing)
}

fn list_recursive(workspace: &Path, path: &Path, out: &mut Vec<String>) -> Result<()> {
    if let Ok(relative) = path.strip_prefix(workspace) {
        out.push(relative.to_string_lossy().replace('\\', "/"));
    }
    if path.is_dir() {
        let mut children = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        children.sort();
        for child in children {
            list_recursive(workspace, &child, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{ArtifactKind, RunId};
    use ampci_core::fakes::{RecordingRunner, SharedBuffer};
    use tempfile::tempdir;

    fn transfer(runner: Arc<RecordingRunner>, workspace: &Path) -> (RemoteTransfer, SharedBuffer) {
        let buf = SharedBuffer::new();
        let reporter = Reporter::with_sink("test:", buf.clone(), false);
        (
            RemoteTransfer::new(
                runner,
                StorageTarget::default(),
                StorageSecret::new("secret"),
                workspace,
                reporter,
            ),
            buf,
        )
    }

    fn build_name() -> ArchiveName {
        ArtifactKind::Build
            .archive_name("amp", &RunId::new("1234").unwrap())
            .unwrap()
    }

    #[test]
    fn test_verify_layout_reports_missing() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("build/sub")).unwrap();
        fs::write(dir.path().join("build/sub/a.js"), b"a").unwrap();

        let listing = verify_layout(dir.path(), &["build"]).unwrap();
        assert_eq!(listing, vec!["build", "build/sub", "build/sub/a.js"]);

        let err = verify_layout(dir.path(), &["build", "dist", "dist.3p"]).unwrap_err();
        match err {
            ArtifactError::VerificationFailed { missing } => {
                assert_eq!(missing, vec!["dist", "dist.3p"])
            }
            other => panic!("expected VerificationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_missing_output_fails_before_authenticating() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let (transfer, _) = transfer(runner.clone(), dir.path());

        let err = transfer
            .upload(&build_name(), ArtifactKind::Build.entries())
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::MissingInput(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_copy_keeps_local_archive() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("build/a.js"), b"a").unwrap();

        let runner = Arc::new(RecordingRunner::new().fail_on("gsutil", 1));
        let (transfer, _) = transfer(runner.clone(), dir.path());
        let name = build_name();

        let err = transfer.upload(&name, &["build"]).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Upload { .. }));
        assert_eq!(err.exit_code(), Some(1));
        assert!(transfer.local_path(&name).exists());
    }

    #[tokio::test]
    async fn test_download_copy_failure_skips_extraction() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new().fail_on("gsutil", 1));
        let (transfer, buf) = transfer(runner.clone(), dir.path());

        let err = transfer
            .download(&build_name(), &["build"])
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Download { .. }));
        assert!(!buf.contents().contains("Extracting"));
    }

    #[tokio::test]
    async fn test_download_names_the_requested_archive() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new().fail_on("gsutil", 1));
        let (transfer, buf) = transfer(runner, dir.path());
        let name = ArtifactKind::Dist
            .archive_name("amp", &RunId::new("1234").unwrap())
            .unwrap();

        assert!(transfer.download(&name, &["dist"]).await.is_err());
        assert!(buf
            .contents()
            .contains("Downloading amp_dist_1234.zip from gs://amp-travis-builds/amp_dist_1234.zip..."));
    }
}
