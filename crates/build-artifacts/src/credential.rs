//! Service-account provisioning for the cloud CLI.
//!
//! Decrypts the checked-in key with the CI secret, then activates it and
//! points the `gcloud` profile at the storage project. This mutates the
//! ambient `gcloud` configuration of the machine; two pipelines with
//! different identities must not authenticate concurrently.

use std::path::PathBuf;

use ampci_core::{CommandRunner, CommandSpec};
use tracing::{debug, info};

use crate::error::ArtifactError;
use crate::target::{StorageSecret, StorageTarget};
use crate::Result;

/// Child environment variable carrying the decryption key to `openssl`.
pub const SECRET_ENV_VAR: &str = "AMPCI_STORAGE_SECRET";

/// An activated service-account identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Decrypted key on local disk. Left in place for the rest of the job.
    pub key_file: PathBuf,
    pub account: String,
    pub project_id: String,
}

/// The ordered, named steps of [`authenticate`].
pub fn authentication_steps(
    target: &StorageTarget,
    secret: &StorageSecret,
) -> Vec<(&'static str, CommandSpec)> {
    let encrypted = target.encrypted_key_file.to_string_lossy().to_string();
    let key_file = target.key_file.to_string_lossy().to_string();

    vec![
        (
            "decrypt key",
            // -md sha256: the key was encrypted with OpenSSL 1.1, whose default
            // digest differs from the 1.0 release on CI images.
            CommandSpec::new("openssl")
                .args(["aes-256-cbc", "-md", "sha256", "-d"])
                .args(["-in", encrypted.as_str(), "-out", key_file.as_str()])
                .arg("-pass")
                .arg(format!("env:{SECRET_ENV_VAR}"))
                .env(SECRET_ENV_VAR, secret.expose()),
        ),
        (
            "activate service account",
            CommandSpec::new("gcloud")
                .args(["auth", "activate-service-account", "--key-file"])
                .arg(key_file.as_str()),
        ),
        (
            "set account",
            CommandSpec::new("gcloud")
                .args(["config", "set", "account"])
                .arg(target.service_account.as_str()),
        ),
        (
            "pass credentials to gsutil",
            CommandSpec::new("gcloud").args(["config", "set", "pass_credentials_to_gsutil", "true"]),
        ),
        (
            "set project",
            CommandSpec::new("gcloud")
                .args(["config", "set", "project"])
                .arg(target.project_id.as_str()),
        ),
        (
            "list credentials",
            CommandSpec::new("gcloud").args(["auth", "list"]),
        ),
    ]
}

/// Decrypt the service-account key and activate it in the `gcloud` profile.
///
/// Every step is fatal. Running it again with the same target leaves the
/// profile in the same state.
pub async fn authenticate(
    runner: &dyn CommandRunner,
    target: &StorageTarget,
    secret: &StorageSecret,
) -> Result<Credential> {
    info!(account = %target.service_account, project = %target.project_id, "Authenticating with storage");

    for (step, cmd) in authentication_steps(target, secret) {
        debug!(step, "authentication step");
        runner
            .run_or_fail(&cmd)
            .await
            .map_err(|source| ArtifactError::Authenticate { step, source })?;
    }

    Ok(Credential {
        key_file: target.key_file.clone(),
        account: target.service_account.clone(),
        project_id: target.project_id.clone(),
    })
}
