//! Artifact kinds, run ids and archive naming.
//!
//! The directory sets are fixed per kind; nothing computes them at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;
use crate::Result;

/// Prefix used for archive object names unless overridden.
pub const DEFAULT_ARCHIVE_PREFIX: &str = "amp";

/// Outputs of a regular build.
pub const BUILD_OUTPUT_ENTRIES: &[&str] = &["build", "dist", "dist.3p", "EXTENSIONS_CSS_MAP"];

/// Extra trees needed to serve the app from a dist build.
pub const APP_SERVING_ENTRIES: &[&str] = &["dist.tools", "examples", "test/manual"];

const DIST_OUTPUT_ENTRIES: &[&str] = &[
    "build",
    "dist",
    "dist.3p",
    "EXTENSIONS_CSS_MAP",
    "dist.tools",
    "examples",
    "test/manual",
];

/// Which archive a transfer deals with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Output of `gulp build`: unminified runtime and extensions.
    Build,
    /// Output of `gulp dist`, plus the trees needed to serve it.
    Dist,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Build, ArtifactKind::Dist];

    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Build => "build",
            ArtifactKind::Dist => "dist",
        }
    }

    /// Workspace-relative directories and files bundled into this archive.
    pub fn entries(&self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Build => BUILD_OUTPUT_ENTRIES,
            ArtifactKind::Dist => DIST_OUTPUT_ENTRIES,
        }
    }

    /// `<prefix>_<kind>_<run-id>.zip`
    pub fn archive_name(&self, prefix: &str, run_id: &RunId) -> Result<ArchiveName> {
        if !is_valid_word(prefix) {
            return Err(ArtifactError::InvalidPrefix(prefix.to_string()));
        }
        Ok(ArchiveName(format!("{prefix}_{}_{run_id}.zip", self.name())))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ArtifactKind {
    type Err = ArtifactError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "build" => Ok(ArtifactKind::Build),
            "dist" => Ok(ArtifactKind::Dist),
            other => Err(ArtifactError::UnknownKind(other.to_string())),
        }
    }
}

/// CI-supplied run identifier (build number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !is_valid_word(&id) {
            return Err(ArtifactError::InvalidRunId(id));
        }
        Ok(RunId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = ArtifactError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        RunId::new(value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

/// Archive file name, also used as the object name in the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArchiveName(String);

impl ArchiveName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Words that end up in object names: non-empty, no path separators or whitespace.
fn is_valid_word(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && word != "."
        && word != ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(id: &str) -> RunId {
        RunId::new(id).unwrap()
    }

    #[test]
    fn test_build_archive_name() {
        let name = ArtifactKind::Build
            .archive_name(DEFAULT_ARCHIVE_PREFIX, &run("1234"))
            .unwrap();
        assert_eq!(name.as_str(), "amp_build_1234.zip");
    }

    #[test]
    fn test_build_and_dist_names_differ_only_by_kind() {
        for id in ["1", "1234", "98765.3", "job-7"] {
            let id = run(id);
            let build = ArtifactKind::Build.archive_name("amp", &id).unwrap();
            let dist = ArtifactKind::Dist.archive_name("amp", &id).unwrap();
            assert_eq!(build.as_str(), dist.as_str().replace("_dist_", "_build_"));
            assert!(build.as_str().contains(id.as_str()));
            assert!(dist.as_str().contains(id.as_str()));
        }
    }

    #[test]
    fn test_dist_entries_extend_build_entries() {
        let dist = ArtifactKind::Dist.entries();
        assert!(BUILD_OUTPUT_ENTRIES.iter().all(|e| dist.contains(e)));
        assert!(APP_SERVING_ENTRIES.iter().all(|e| dist.contains(e)));
        assert_eq!(
            dist.len(),
            BUILD_OUTPUT_ENTRIES.len() + APP_SERVING_ENTRIES.len()
        );
    }

    #[test]
    fn test_invalid_run_ids() {
        for bad in ["", "a/b", "a b", "..", "x\n"] {
            assert!(
                matches!(RunId::new(bad), Err(ArtifactError::InvalidRunId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_prefix() {
        let err = ArtifactKind::Build.archive_name("a/b", &run("1")).unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidPrefix(_)));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("build".parse::<ArtifactKind>().unwrap(), ArtifactKind::Build);
        assert_eq!("Dist".parse::<ArtifactKind>().unwrap(), ArtifactKind::Dist);
        assert!("release".parse::<ArtifactKind>().is_err());
    }
}
