//! Entry points CI jobs call to publish and fetch build output.
//!
//! A build job uploads its output once; later jobs in the same run download
//! it instead of rebuilding. Every entry point runs inside a timed scope
//! named after itself so CI logs show how long each took.

use std::path::PathBuf;
use std::sync::Arc;

use ampci_core::{CommandRunner, Reporter};
use build_artifacts::{
    ArchiveName, ArtifactKind, DownloadReport, RemoteTransfer, RunId, StorageSecret,
    StorageTarget, UploadReport, DEFAULT_ARCHIVE_PREFIX,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::rewrite::{ServeMode, UrlRewriter};
use crate::signal::{UploadOutcome, UploadSignal};

/// Directories whose pages are rewritten before the dist archive is packed,
/// in the order they are processed.
pub const REWRITE_DIRS: &[&str] = &["test/manual", "examples"];

/// Everything an [`ArtifactPipeline`] needs except the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPipelineConfig {
    /// Repository checkout the archives are packed from and extracted into.
    pub workspace: PathBuf,
    #[serde(default = "default_prefix")]
    pub archive_prefix: String,
    /// Shared by the build and dist archives of one CI run.
    pub run_id: RunId,
    #[serde(default)]
    pub target: StorageTarget,
    #[serde(default)]
    pub serve_mode: ServeMode,
}

fn default_prefix() -> String {
    DEFAULT_ARCHIVE_PREFIX.to_string()
}

impl ArtifactPipelineConfig {
    pub fn new(workspace: impl Into<PathBuf>, run_id: RunId) -> Self {
        ArtifactPipelineConfig {
            workspace: workspace.into(),
            archive_prefix: default_prefix(),
            run_id,
            target: StorageTarget::default(),
            serve_mode: ServeMode::default(),
        }
    }

    pub fn archive_name(&self, kind: ArtifactKind) -> Result<ArchiveName> {
        Ok(kind.archive_name(&self.archive_prefix, &self.run_id)?)
    }
}

/// Upload and download of the per-run build and dist archives.
pub struct ArtifactPipeline {
    config: ArtifactPipelineConfig,
    transfer: RemoteTransfer,
    reporter: Reporter,
}

impl ArtifactPipeline {
    /// Validates the storage target and archive prefix up front so a bad
    /// configuration fails before any command runs.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: ArtifactPipelineConfig,
        secret: StorageSecret,
        reporter: Reporter,
    ) -> Result<Self> {
        config.target.validate()?;
        for kind in ArtifactKind::ALL {
            config.archive_name(kind)?;
        }

        let transfer = RemoteTransfer::new(
            runner,
            config.target.clone(),
            secret,
            config.workspace.clone(),
            reporter.clone(),
        );
        Ok(ArtifactPipeline {
            config,
            transfer,
            reporter,
        })
    }

    pub fn config(&self) -> &ArtifactPipelineConfig {
        &self.config
    }

    /// Fetch and extract the build archive of this run.
    pub async fn download_build_output(&self) -> Result<DownloadReport> {
        let _op = self.reporter.begin("download_build_output");
        self.download(ArtifactKind::Build).await
    }

    /// Fetch and extract the dist archive of this run.
    pub async fn download_dist_output(&self) -> Result<DownloadReport> {
        let _op = self.reporter.begin("download_dist_output");
        self.download(ArtifactKind::Dist).await
    }

    /// Pack and publish the build archive of this run.
    pub async fn upload_build_output(&self) -> Result<UploadReport> {
        let _op = self.reporter.begin("upload_build_output");
        self.upload(ArtifactKind::Build).await
    }

    /// Pack and publish the dist archive of this run, as is.
    pub async fn upload_dist_output(&self) -> Result<UploadReport> {
        let _op = self.reporter.begin("upload_dist_output");
        self.upload(ArtifactKind::Dist).await
    }

    /// Point the manual test pages and examples at the local build, publish
    /// the dist archive, then tell `signal` how it went.
    ///
    /// Rewriting finishes before packing starts. Any failure is signalled as
    /// [`UploadOutcome::Failure`] before the error is returned.
    pub async fn process_and_upload_dist_output(
        &self,
        rewriter: &dyn UrlRewriter,
        signal: &dyn UploadSignal,
    ) -> Result<UploadReport> {
        let _op = self.reporter.begin("process_and_upload_dist_output");

        let published = self.rewrite_and_upload(rewriter).await;

        match published {
            Ok(report) => {
                signal.notify(UploadOutcome::Success).await?;
                Ok(report)
            }
            Err(err) => {
                if let Err(signal_err) = signal.notify(UploadOutcome::Failure).await {
                    warn!(error = %signal_err, "could not signal upload failure");
                }
                Err(err)
            }
        }
    }

    async fn rewrite_and_upload(&self, rewriter: &dyn UrlRewriter) -> Result<UploadReport> {
        for dir in REWRITE_DIRS {
            self.reporter
                .info(&format!("Rewriting URLs in {}...", self.reporter.cyan(dir)));
            let changed = rewriter
                .rewrite_dir(&self.config.workspace.join(dir))
                .await?;
            info!(dir, changed, "rewrote page URLs");
        }
        self.upload(ArtifactKind::Dist).await
    }

    async fn upload(&self, kind: ArtifactKind) -> Result<UploadReport> {
        let name = self.config.archive_name(kind)?;
        Ok(self.transfer.upload(&name, kind.entries()).await?)
    }

    async fn download(&self, kind: ArtifactKind) -> Result<DownloadReport> {
        let name = self.config.archive_name(kind)?;
        Ok(self.transfer.download(&name, kind.entries()).await?)
    }
}
