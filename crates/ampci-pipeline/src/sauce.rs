//! Sauce Connect tunnel for cross-browser test jobs.
//!
//! The tunnel's access key is not stored in CI. A token dealer hands out a
//! short-lived key on request; it is passed to the start script through the
//! child environment and never set on this process.

use std::path::PathBuf;
use std::sync::Arc;

use ampci_core::{CommandRunner, CommandSpec, Reporter};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};

pub const DEFAULT_SAUCE_USERNAME: &str = "amphtml";
pub const DEFAULT_TOKEN_URL: &str = "https://amphtml-sauce-token-dealer.appspot.com/getJwtToken";
pub const DEFAULT_START_SCRIPT: &str = "build-system/sauce_connect/start_sauce_connect.sh";
pub const DEFAULT_STOP_SCRIPT: &str = "build-system/sauce_connect/stop_sauce_connect.sh";

/// Environment variable names the tunnel scripts read.
pub const SAUCE_USERNAME_VAR: &str = "SAUCE_USERNAME";
pub const SAUCE_ACCESS_KEY_VAR: &str = "SAUCE_ACCESS_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SauceConfig {
    pub username: String,
    pub token_url: String,
    pub start_script: PathBuf,
    pub stop_script: PathBuf,
}

impl Default for SauceConfig {
    fn default() -> Self {
        SauceConfig {
            username: DEFAULT_SAUCE_USERNAME.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            start_script: PathBuf::from(DEFAULT_START_SCRIPT),
            stop_script: PathBuf::from(DEFAULT_STOP_SCRIPT),
        }
    }
}

/// Ask the token dealer for an access key.
///
/// One unauthenticated GET; the trimmed body is the key. Any non-2xx
/// status or an empty body is an error.
pub async fn fetch_access_key(client: &reqwest::Client, url: &str) -> Result<String> {
    let token_error = |message: String| PipelineError::SauceToken {
        url: url.to_string(),
        message,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| token_error(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(token_error(format!("status {status}")));
    }
    let body = response
        .text()
        .await
        .map_err(|err| token_error(err.to_string()))?;
    let key = body.trim();
    if key.is_empty() {
        return Err(token_error("empty access key".to_string()));
    }
    Ok(key.to_string())
}

/// Starts and stops the tunnel with the repository's scripts.
pub struct SauceConnect {
    runner: Arc<dyn CommandRunner>,
    reporter: Reporter,
    config: SauceConfig,
    http_client: reqwest::Client,
}

impl SauceConnect {
    pub fn new(runner: Arc<dyn CommandRunner>, reporter: Reporter, config: SauceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("ampci/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(SauceConnect {
            runner,
            reporter,
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &SauceConfig {
        &self.config
    }

    pub async fn start(&self) -> Result<()> {
        let _op = self.reporter.begin("start_sauce_connect");
        self.reporter.info(&format!(
            "Fetching Sauce Connect access key from {}...",
            self.reporter.cyan(&self.config.token_url)
        ));
        let access_key = fetch_access_key(&self.http_client, &self.config.token_url).await?;

        let cmd = CommandSpec::new(self.config.start_script.to_string_lossy())
            .env(SAUCE_USERNAME_VAR, self.config.username.as_str())
            .env(SAUCE_ACCESS_KEY_VAR, access_key);
        self.runner
            .run_or_fail(&cmd)
            .await
            .map_err(|source| PipelineError::SauceScript {
                action: "start",
                source,
            })?;
        info!(username = %self.config.username, "Sauce Connect tunnel started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let _op = self.reporter.begin("stop_sauce_connect");
        let cmd = CommandSpec::new(self.config.stop_script.to_string_lossy());
        self.runner
            .run_or_fail(&cmd)
            .await
            .map_err(|source| PipelineError::SauceScript {
                action: "stop",
                source,
            })?;
        info!("Sauce Connect tunnel stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampci_core::fakes::{RecordingRunner, SharedBuffer};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the URL to fetch it from.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/getJwtToken")
    }

    fn sauce(runner: Arc<RecordingRunner>, token_url: String) -> SauceConnect {
        let config = SauceConfig {
            token_url,
            ..SauceConfig::default()
        };
        SauceConnect::new(
            runner,
            Reporter::with_sink("sauce:", SharedBuffer::new(), false),
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_access_key_trims_body() {
        let url = serve_once("200 OK", "  jwt-token-value\n").await;
        let key = fetch_access_key(&reqwest::Client::new(), &url).await.unwrap();
        assert_eq!(key, "jwt-token-value");
    }

    #[tokio::test]
    async fn test_fetch_access_key_rejects_error_status() {
        let url = serve_once("503 Service Unavailable", "down").await;
        let err = fetch_access_key(&reqwest::Client::new(), &url).await.unwrap_err();
        assert!(matches!(err, PipelineError::SauceToken { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_start_passes_key_in_child_env_only() {
        let url = serve_once("200 OK", "k3y").await;
        let runner = Arc::new(RecordingRunner::new());
        sauce(runner.clone(), url).start().await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, DEFAULT_START_SCRIPT);
        assert!(calls[0].args.is_empty());
        assert_eq!(calls[0].env_value(SAUCE_ACCESS_KEY_VAR), Some("k3y"));
        assert_eq!(calls[0].env_value(SAUCE_USERNAME_VAR), Some("amphtml"));
        assert!(!calls[0].to_string().contains("k3y"));
        assert!(std::env::var(SAUCE_ACCESS_KEY_VAR).map_or(true, |v| v != "k3y"));
    }

    #[tokio::test]
    async fn test_start_without_key_runs_nothing() {
        let url = serve_once("500 Internal Server Error", "").await;
        let runner = Arc::new(RecordingRunner::new());
        assert!(sauce(runner.clone(), url).start().await.is_err());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stop_failure_carries_exit_code() {
        let runner = Arc::new(RecordingRunner::new().fail_on(DEFAULT_STOP_SCRIPT, 3));
        let err = sauce(runner, DEFAULT_TOKEN_URL.to_string())
            .stop()
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
    }
}
