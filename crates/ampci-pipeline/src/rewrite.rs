//! Rewriting CDN script URLs in served pages to locally built files.
//!
//! Manual test pages and examples reference the production CDN. Before they
//! are packed for the app-serving job, every runtime and extension URL is
//! pointed at the `/dist` tree that ships in the same archive.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::bytes::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Rewrites URLs in every page under a directory.
#[async_trait]
pub trait UrlRewriter: Send + Sync {
    /// Rewrite in place. Returns how many files changed.
    async fn rewrite_dir(&self, dir: &Path) -> Result<usize>;
}

/// Which flavor of the local build the rewritten URLs should load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServeMode {
    /// Minified output: `/dist/v0.js`, `/dist/v0/amp-foo-0.1.js`.
    #[default]
    Compiled,
    /// Unminified output: `/dist/amp.js`, `/dist/v0/amp-foo-0.1.max.js`.
    Unminified,
}

/// Rewrites `https://cdn.ampproject.org/...` script URLs in `.html` files.
#[derive(Debug, Clone)]
pub struct CdnUrlRewriter {
    mode: ServeMode,
    pattern: Regex,
}

impl CdnUrlRewriter {
    pub fn new(mode: ServeMode) -> Self {
        let pattern = Regex::new(
            r"https://cdn\.ampproject\.org/v0(?:/(?P<ext>amp-[a-z0-9-]+-\d+\.\d+))?\.js",
        )
        .expect("CDN URL pattern is valid");
        CdnUrlRewriter { mode, pattern }
    }

    pub fn mode(&self) -> ServeMode {
        self.mode
    }

    /// Rewrite every CDN URL in a page. Pages are matched as raw bytes, so
    /// content in any encoding passes through untouched.
    pub fn rewrite_page<'a>(&self, page: &'a [u8]) -> Cow<'a, [u8]> {
        self.pattern
            .replace_all(page, |caps: &Captures| {
                let ext = caps
                    .name("ext")
                    .map(|ext| String::from_utf8_lossy(ext.as_bytes()));
                match (ext, self.mode) {
                    (None, ServeMode::Compiled) => "/dist/v0.js".to_string(),
                    (None, ServeMode::Unminified) => "/dist/amp.js".to_string(),
                    (Some(ext), ServeMode::Compiled) => format!("/dist/v0/{ext}.js"),
                    (Some(ext), ServeMode::Unminified) => format!("/dist/v0/{ext}.max.js"),
                }
            })
    }

    fn rewrite_file(&self, path: &Path) -> std::io::Result<bool> {
        let original = fs::read(path)?;
        match self.rewrite_page(&original) {
            Cow::Borrowed(_) => Ok(false),
            Cow::Owned(rewritten) => {
                fs::write(path, rewritten)?;
                Ok(true)
            }
        }
    }
}

impl Default for CdnUrlRewriter {
    fn default() -> Self {
        Self::new(ServeMode::default())
    }
}

#[async_trait]
impl UrlRewriter for CdnUrlRewriter {
    async fn rewrite_dir(&self, dir: &Path) -> Result<usize> {
        let wrap = |source| PipelineError::Rewrite {
            dir: dir.to_path_buf(),
            source,
        };

        let mut pages = Vec::new();
        collect_pages(dir, &mut pages).map_err(wrap)?;

        let mut changed = 0;
        for page in &pages {
            if self.rewrite_file(page).map_err(wrap)? {
                debug!(page = %page.display(), "rewrote CDN URLs");
                changed += 1;
            }
        }
        Ok(changed)
    }
}

fn collect_pages(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_pages(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "html") {
            out.push(path);
        }
    }
    Ok(())
}
