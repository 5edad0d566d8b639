//! build-artifacts: per-run CI archives in Google Cloud Storage
//!
//! Packs build output trees into a zip archive named after the CI run,
//! authenticates the `gcloud` CLI with a service account whose key is
//! decrypted on the fly, and copies archives to and from a fixed bucket
//! with `gsutil`.
//!
//! ## Flow
//!
//! upload: [`archive::pack`] → [`credential::authenticate`] → `gsutil cp`
//!
//! download: [`credential::authenticate`] → `gsutil cp` → [`archive::extract`]
//! → [`transfer::verify_layout`]

pub mod archive;
pub mod credential;
pub mod error;
pub mod kind;
pub mod target;
pub mod transfer;

pub use archive::{content_digests, extract, format_size, pack, tree_digests, ArchiveSummary};
pub use credential::{authenticate, authentication_steps, Credential, SECRET_ENV_VAR};
pub use error::ArtifactError;
pub use kind::{
    ArchiveName, ArtifactKind, RunId, APP_SERVING_ENTRIES, BUILD_OUTPUT_ENTRIES,
    DEFAULT_ARCHIVE_PREFIX,
};
pub use target::{StorageSecret, StorageTarget};
pub use transfer::{verify_layout, DownloadReport, RemoteTransfer, UploadReport};

/// Result type for artifact operations
pub type Result<T> = std::result::Result<T, ArtifactError>;
