//! Summary of what a branch changes relative to trunk.

use std::path::{Path, PathBuf};

use ampci_core::{CommandRunner, CommandSpec, ExecError, Reporter};
use serde::Serialize;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Trunk ref used when none is configured.
pub const DEFAULT_TRUNK: &str = "origin/main";

/// Commits and files on the current branch since it left trunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub trunk: String,
    pub merge_base: String,
    /// `git log --oneline` lines, newest first.
    pub commits: Vec<String>,
    pub files: Vec<String>,
}

impl ChangeSummary {
    /// Compare `HEAD` in `workspace` with `trunk`.
    ///
    /// A branch with no common ancestor is reported as
    /// [`PipelineError::MissingMergeBase`] with instructions to fix the
    /// checkout; the caller decides whether that is fatal.
    pub async fn collect(runner: &dyn CommandRunner, workspace: &Path, trunk: &str) -> Result<Self> {
        // Exit 1 means no common commit. Other failures propagate unchanged.
        let merge_base = match git(runner, workspace, &["merge-base", trunk, "HEAD"]).await {
            Ok(sha) if !sha.is_empty() => sha,
            Ok(_) | Err(PipelineError::Exec(ExecError::CommandFailed { code: Some(1), .. })) => {
                return Err(missing_merge_base(trunk));
            }
            Err(err) => return Err(err),
        };
        debug!(trunk, merge_base = %merge_base, "found merge base");

        let range = format!("{merge_base}..HEAD");
        let commits = lines(&git(runner, workspace, &["log", "--oneline", range.as_str()]).await?);
        let files = lines(
            &git(runner, workspace, &["diff", "--name-only", merge_base.as_str(), "HEAD"]).await?,
        );

        Ok(ChangeSummary {
            trunk: trunk.to_string(),
            merge_base,
            commits,
            files,
        })
    }

    pub fn print(&self, reporter: &Reporter) {
        reporter.section(&format!(
            "Commits since {} ({}):",
            reporter.cyan(&self.trunk),
            short_sha(&self.merge_base)
        ));
        if self.commits.is_empty() {
            reporter.info("(none)");
        }
        for commit in &self.commits {
            reporter.info(&format!("  {commit}"));
        }

        reporter.section(&format!("Files changed ({}):", self.files.len()));
        for file in &self.files {
            reporter.info(&format!("  {}", reporter.cyan(file)));
        }
    }
}

fn missing_merge_base(trunk: &str) -> PipelineError {
    let branch = trunk.rsplit('/').next().unwrap_or(trunk);
    PipelineError::MissingMergeBase {
        trunk: trunk.to_string(),
        remediation: format!(
            "Fetch trunk with `git fetch origin {branch}` and rebase your branch with `git rebase {trunk}`"
        ),
    }
}

/// `git rev-parse HEAD` in `workspace`.
pub async fn head_sha(runner: &dyn CommandRunner, workspace: &Path) -> Result<String> {
    let sha = git(runner, workspace, &["rev-parse", "HEAD"]).await?;
    if sha.is_empty() {
        return Err(PipelineError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

async fn git(runner: &dyn CommandRunner, workspace: &Path, args: &[&str]) -> Result<String> {
    let cmd = CommandSpec::new("git")
        .args(args.iter().copied())
        .current_dir(PathBuf::from(workspace));
    let output = runner.capture(&cmd).await?;
    if !output.success() {
        return Err(ExecError::CommandFailed {
            command: cmd.to_string(),
            code: output.code,
        }
        .into());
    }
    Ok(output.stdout_trimmed().to_string())
}

fn lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
