//! ampci - CI orchestration for the AMP repository
//!
//! ## Commands
//!
//! - `upload`/`download`: publish or fetch the build or dist archive of a run
//! - `publish-dist`: rewrite served pages, upload dist, signal the deploy bot
//! - `sauce`: start or stop the Sauce Connect tunnel
//! - `changes`: summarize commits and files since trunk
//! - `exec`: run a command inside a timed scope
//! - `config`: print the resolved configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use ampci_core::{timed_exec_or_fail, CommandRunner, CommandSpec, ExecError, Reporter, SystemRunner};
use ampci_pipeline::{
    head_sha, ArtifactPipeline, ArtifactPipelineConfig, CdnUrlRewriter, ChangeSummary,
    DeployBotSignal, LogSignal, PipelineError, SauceConfig, SauceConnect, ServeMode,
    UploadSignal, DEFAULT_TRUNK,
};
use anyhow::{anyhow, Context, Result};
use build_artifacts::{
    ArtifactError, ArtifactKind, RunId, StorageSecret, StorageTarget, DEFAULT_ARCHIVE_PREFIX,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};

/// CI systems that predate `AMPCI_RUN_ID` expose the build number here.
const LEGACY_RUN_ID_VAR: &str = "TRAVIS_BUILD_NUMBER";

#[derive(Parser)]
#[command(name = "ampci")]
#[command(author = "AMP Infra")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build-artifact pipelines and CI helpers for AMP", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Repository checkout to work in
    #[arg(short = 'C', long, global = true, env = "AMPCI_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack and upload an archive for this run
    Upload {
        #[arg(value_enum)]
        kind: KindArg,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Download and extract an archive for this run
    Download {
        #[arg(value_enum)]
        kind: KindArg,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Rewrite CDN URLs in served pages, upload dist and signal the outcome
    PublishDist {
        #[command(flatten)]
        storage: StorageArgs,

        /// Point pages at unminified scripts instead of compiled ones
        #[arg(long)]
        unminified: bool,

        /// Deploy bot endpoint; without it the outcome is only logged
        #[arg(long, env = "AMPCI_SIGNAL_URL")]
        signal_url: Option<String>,

        /// Commit the upload belongs to (default: HEAD of the workspace)
        #[arg(long, env = "AMPCI_HEAD_SHA")]
        head_sha: Option<String>,
    },

    /// Manage the Sauce Connect tunnel
    Sauce {
        #[command(subcommand)]
        action: SauceAction,
    },

    /// Show commits and files changed since the branch left trunk
    Changes {
        /// Trunk ref to compare against
        #[arg(long, default_value = DEFAULT_TRUNK)]
        trunk: String,
    },

    /// Run a command and report how long it took
    Exec {
        /// Program and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        argv: Vec<String>,
    },

    /// Print the resolved configuration as JSON
    Config {
        #[command(flatten)]
        storage: StorageArgs,
    },
}

#[derive(Subcommand)]
enum SauceAction {
    /// Fetch an access key and start the tunnel
    Start,
    /// Stop the tunnel
    Stop,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Build,
    Dist,
}

impl From<KindArg> for ArtifactKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Build => ArtifactKind::Build,
            KindArg::Dist => ArtifactKind::Dist,
        }
    }
}

#[derive(Args)]
struct StorageArgs {
    /// CI run identifier shared by the build and dist archives
    #[arg(long, env = "AMPCI_RUN_ID")]
    run_id: Option<String>,

    /// Key that decrypts the service-account key file
    #[arg(long, env = "GCP_TOKEN", hide_env_values = true)]
    secret: Option<String>,

    /// Bucket holding per-run archives
    #[arg(long, default_value = build_artifacts::target::DEFAULT_BUCKET)]
    bucket: String,

    /// Archive name prefix
    #[arg(long, default_value = DEFAULT_ARCHIVE_PREFIX)]
    prefix: String,
}

impl StorageArgs {
    fn run_id(&self) -> Result<RunId> {
        let raw = match &self.run_id {
            Some(id) => id.clone(),
            None => std::env::var(LEGACY_RUN_ID_VAR).map_err(|_| {
                anyhow!("no run id: pass --run-id or set AMPCI_RUN_ID or {LEGACY_RUN_ID_VAR}")
            })?,
        };
        Ok(RunId::new(raw)?)
    }

    fn secret(&self) -> Result<StorageSecret> {
        self.secret
            .as_deref()
            .map(StorageSecret::new)
            .ok_or_else(|| anyhow!("no storage secret: pass --secret or set GCP_TOKEN"))
    }

    fn pipeline_config(&self, workspace: &Path) -> Result<ArtifactPipelineConfig> {
        let mut config = ArtifactPipelineConfig::new(workspace, self.run_id()?);
        config.archive_prefix = self.prefix.clone();
        config.target = StorageTarget::default().with_bucket(&self.bucket);
        Ok(config)
    }
}

impl Commands {
    /// Name used in the failure diagnostic.
    fn phase(&self) -> String {
        match self {
            Commands::Upload { kind, .. } => format!("upload_{}_output", ArtifactKind::from(*kind)),
            Commands::Download { kind, .. } => {
                format!("download_{}_output", ArtifactKind::from(*kind))
            }
            Commands::PublishDist { .. } => "process_and_upload_dist_output".to_string(),
            Commands::Sauce { action: SauceAction::Start } => "start_sauce_connect".to_string(),
            Commands::Sauce { action: SauceAction::Stop } => "stop_sauce_connect".to_string(),
            Commands::Changes { .. } => "changes".to_string(),
            Commands::Exec { argv } => argv.join(" "),
            Commands::Config { .. } => "config".to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ampci_core::init_tracing(cli.json, level);

    let reporter = Reporter::stdout("ampci:");
    let phase = cli.command.phase();

    match run(cli, &reporter).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            reporter.failure(&phase, &format!("{err:#}"));
            if let Some(remediation) = remediation(&err) {
                reporter.info(remediation);
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(cli: Cli, reporter: &Reporter) -> Result<()> {
    let workspace = resolve_workspace(&cli.workspace)?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::in_dir(&workspace));
    info!(workspace = %workspace.display(), version = ampci_core::VERSION, "ampci starting");

    match cli.command {
        Commands::Upload { kind, storage } => {
            let pipeline = artifact_pipeline(runner, &storage, &workspace, reporter)?;
            let report = match ArtifactKind::from(kind) {
                ArtifactKind::Build => pipeline.upload_build_output().await?,
                ArtifactKind::Dist => pipeline.upload_dist_output().await?,
            };
            info!(destination = %report.destination, "upload complete");
            Ok(())
        }
        Commands::Download { kind, storage } => {
            let pipeline = artifact_pipeline(runner, &storage, &workspace, reporter)?;
            let report = match ArtifactKind::from(kind) {
                ArtifactKind::Build => pipeline.download_build_output().await?,
                ArtifactKind::Dist => pipeline.download_dist_output().await?,
            };
            info!(source = %report.source, files = report.extracted_files, "download complete");
            Ok(())
        }
        Commands::PublishDist {
            storage,
            unminified,
            signal_url,
            head_sha: sha,
        } => {
            let pipeline = artifact_pipeline(runner.clone(), &storage, &workspace, reporter)?;
            let mode = if unminified {
                ServeMode::Unminified
            } else {
                pipeline.config().serve_mode
            };
            let signal: Box<dyn UploadSignal> = match signal_url {
                Some(url) => {
                    let sha = match sha {
                        Some(sha) => sha,
                        None => head_sha(runner.as_ref(), &workspace).await?,
                    };
                    Box::new(DeployBotSignal::new(&url, pipeline.config().run_id.clone(), &sha)?)
                }
                None => Box::new(LogSignal),
            };
            pipeline
                .process_and_upload_dist_output(&CdnUrlRewriter::new(mode), signal.as_ref())
                .await?;
            Ok(())
        }
        Commands::Sauce { action } => {
            let sauce = SauceConnect::new(runner, reporter.clone(), SauceConfig::default())?;
            match action {
                SauceAction::Start => sauce.start().await?,
                SauceAction::Stop => sauce.stop().await?,
            }
            Ok(())
        }
        Commands::Changes { trunk } => {
            let summary = ChangeSummary::collect(runner.as_ref(), &workspace, &trunk).await?;
            summary.print(reporter);
            Ok(())
        }
        Commands::Exec { argv } => {
            let cmd = CommandSpec::from_argv(&argv)?;
            timed_exec_or_fail(runner.as_ref(), reporter, &cmd).await?;
            Ok(())
        }
        Commands::Config { storage } => {
            let resolved = resolved_config(&storage, &workspace);
            println!("{}", serde_json::to_string_pretty(&resolved)?);
            Ok(())
        }
    }
}

/// Child processes run inside the workspace while this process keeps its own
/// directory, so every path derived from the workspace must be absolute.
fn resolve_workspace(workspace: &Path) -> Result<PathBuf> {
    std::path::absolute(workspace)
        .with_context(|| format!("cannot resolve workspace {}", workspace.display()))
}

/// Configuration as JSON. An unresolvable pipeline section is shown as
/// `null` next to the reason.
fn resolved_config(storage: &StorageArgs, workspace: &Path) -> serde_json::Value {
    let (pipeline, pipeline_error) = match storage.pipeline_config(workspace) {
        Ok(config) => (Some(config), None),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "pipeline configuration is unresolved");
            (None, Some(format!("{err:#}")))
        }
    };
    serde_json::json!({
        "pipeline": pipeline,
        "pipeline_error": pipeline_error,
        "sauce": SauceConfig::default(),
        "trunk": DEFAULT_TRUNK,
    })
}

fn artifact_pipeline(
    runner: Arc<dyn CommandRunner>,
    storage: &StorageArgs,
    workspace: &Path,
    reporter: &Reporter,
) -> Result<ArtifactPipeline> {
    let config = storage.pipeline_config(workspace)?;
    let secret = storage.secret()?;
    ArtifactPipeline::new(runner, config, secret, reporter.clone())
        .context("invalid pipeline configuration")
}

/// Exit code of the first failing external command in the error chain,
/// otherwise 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    let code = err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<PipelineError>() {
            e.exit_code()
        } else if let Some(e) = cause.downcast_ref::<ArtifactError>() {
            e.exit_code()
        } else if let Some(e) = cause.downcast_ref::<ExecError>() {
            e.exit_code()
        } else {
            None
        }
    });
    code.and_then(|c| u8::try_from(c).ok())
        .filter(|c| *c != 0)
        .unwrap_or(1)
}

fn remediation(err: &anyhow::Error) -> Option<&str> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .and_then(PipelineError::remediation)
}
