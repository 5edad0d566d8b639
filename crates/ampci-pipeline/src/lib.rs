//! ampci-pipeline: the jobs a CI run is made of
//!
//! - [`pipeline`]: publish and fetch the per-run build and dist archives
//! - [`rewrite`]: point served pages at locally built scripts
//! - [`signal`]: report dist upload outcomes to the deploy bot
//! - [`sauce`]: start and stop the Sauce Connect tunnel
//! - [`changes`]: summarize what a branch changes relative to trunk

pub mod changes;
pub mod error;
pub mod pipeline;
pub mod rewrite;
pub mod sauce;
pub mod signal;

pub use changes::{head_sha, ChangeSummary, DEFAULT_TRUNK};
pub use error::{PipelineError, Result};
pub use pipeline::{ArtifactPipeline, ArtifactPipelineConfig, REWRITE_DIRS};
pub use rewrite::{CdnUrlRewriter, ServeMode, UrlRewriter};
pub use sauce::{fetch_access_key, SauceConfig, SauceConnect};
pub use signal::{DeployBotSignal, LogSignal, UploadOutcome, UploadSignal};
