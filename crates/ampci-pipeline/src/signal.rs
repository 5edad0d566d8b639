//! Telling the deploy bot whether a dist upload landed.

use std::fmt;

use async_trait::async_trait;
use build_artifacts::RunId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// Result of a dist upload as reported to downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    Success,
    Failure,
}

impl UploadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadOutcome::Success => "success",
            UploadOutcome::Failure => "failure",
        }
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the outcome of a dist upload.
#[async_trait]
pub trait UploadSignal: Send + Sync {
    async fn notify(&self, outcome: UploadOutcome) -> Result<()>;
}

/// Records the outcome in the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSignal;

#[async_trait]
impl UploadSignal for LogSignal {
    async fn notify(&self, outcome: UploadOutcome) -> Result<()> {
        info!(outcome = %outcome, "dist upload finished (no deploy bot configured)");
        Ok(())
    }
}

/// Posts the outcome to the deploy bot, keyed by run id and head commit.
pub struct DeployBotSignal {
    endpoint: String,
    run_id: RunId,
    head_sha: String,
    http_client: reqwest::Client,
}

impl DeployBotSignal {
    pub fn new(endpoint: &str, run_id: RunId, head_sha: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("ampci/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(DeployBotSignal {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            run_id,
            head_sha: head_sha.to_string(),
            http_client,
        })
    }

    /// `<endpoint>/travisbuilds/<run-id>/headshas/<sha>/<outcome>`
    pub fn url(&self, outcome: UploadOutcome) -> String {
        format!(
            "{}/travisbuilds/{}/headshas/{}/{}",
            self.endpoint, self.run_id, self.head_sha, outcome
        )
    }
}

#[async_trait]
impl UploadSignal for DeployBotSignal {
    async fn notify(&self, outcome: UploadOutcome) -> Result<()> {
        let url = self.url(outcome);
        let response = self.http_client.post(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "deploy bot rejected upload signal");
            return Err(PipelineError::Signal(format!("{url} returned {status}")));
        }
        info!(url = %url, outcome = %outcome, "signalled deploy bot");
        Ok(())
    }
}
