//! Zip packaging of build output trees.
//!
//! Archives always hold a full recompression of the named entries. Member
//! names are workspace-relative with `/` separators and are written in
//! sorted order, so the member list only depends on the tree contents.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ArtifactError;
use crate::Result;

/// What [`pack`] wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    /// Number of regular files stored.
    pub files: usize,
    /// Size of the archive on disk.
    pub bytes: u64,
}

/// Compress `entries` (workspace-relative files or directories) into
/// `archive_path`, replacing any existing archive.
pub fn pack(workspace: &Path, archive_path: &Path, entries: &[&str]) -> Result<ArchiveSummary> {
    let mut members = Vec::new();
    for entry in entries {
        let path = workspace.join(entry);
        if !path.exists() {
            return Err(ArtifactError::MissingInput(path));
        }
        collect_members(workspace, &path, &mut members)?;
    }

    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut zip = ZipWriter::new(File::create(archive_path)?);
    let mut files = 0;
    for member in &members {
        let options = member_options(&member.path)?;
        if member.is_dir {
            zip.add_directory(format!("{}/", member.name), options)?;
        } else {
            zip.start_file(member.name.as_str(), options)?;
            io::copy(&mut File::open(&member.path)?, &mut zip)?;
            files += 1;
        }
    }
    zip.finish()?;

    let bytes = fs::metadata(archive_path)?.len();
    debug!(archive = %archive_path.display(), files, bytes, "packed archive");

    Ok(ArchiveSummary {
        path: archive_path.to_path_buf(),
        files,
        bytes,
    })
}

/// Extract the members of `archive_path` that fall under `entries` into
/// `workspace`, overwriting existing files. Returns the number of files
/// written.
pub fn extract(archive_path: &Path, workspace: &Path, entries: &[&str]) -> Result<usize> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    let wanted: Vec<&Path> = entries.iter().map(Path::new).collect();
    let mut written = 0;

    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        let relative = match member.enclosed_name() {
            Some(name) => name.to_path_buf(),
            None => return Err(ArtifactError::UnsafeArchiveEntry(member.name().to_string())),
        };
        if !wanted.iter().any(|entry| relative.starts_with(entry)) {
            continue;
        }

        let out_path = workspace.join(&relative);
        if member.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut member, &mut out)?;
        set_mode(&out_path, member.unix_mode())?;
        written += 1;
    }

    debug!(archive = %archive_path.display(), written, "extracted archive");
    Ok(written)
}

/// SHA-256 of every stored file, keyed by member name.
pub fn content_digests(archive_path: &Path) -> Result<BTreeMap<String, String>> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    let mut digests = BTreeMap::new();

    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        if member.is_dir() {
            continue;
        }
        let mut content = Vec::new();
        member.read_to_end(&mut content)?;
        digests.insert(member.name().to_string(), hex::encode(Sha256::digest(&content)));
    }

    Ok(digests)
}

/// SHA-256 of every file under `entries` on disk, keyed the same way as
/// [`content_digests`].
pub fn tree_digests(workspace: &Path, entries: &[&str]) -> Result<BTreeMap<String, String>> {
    let mut members = Vec::new();
    for entry in entries {
        let path = workspace.join(entry);
        if !path.exists() {
            return Err(ArtifactError::MissingInput(path));
        }
        collect_members(workspace, &path, &mut members)?;
    }

    let mut digests = BTreeMap::new();
    for member in members.into_iter().filter(|m| !m.is_dir) {
        let content = fs::read(&member.path)?;
        digests.insert(member.name, hex::encode(Sha256::digest(&content)));
    }
    Ok(digests)
}

/// Human-readable size, in the style of `du -sh`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["K", "M", "G", "T"];
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if value < 10.0 {
        format!("{value:.1}{}", UNITS[unit])
    } else {
        format!("{value:.0}{}", UNITS[unit])
    }
}

struct Member {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

/// Walk `path` depth-first in name order, recording every directory and file.
fn collect_members(workspace: &Path, path: &Path, out: &mut Vec<Member>) -> Result<()> {
    let name = member_name(workspace, path)?;
    if path.is_dir() {
        out.push(Member {
            name,
            path: path.to_path_buf(),
            is_dir: true,
        });
        let mut children: Vec<PathBuf> = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<_>>()?;
        children.sort();
        for child in children {
            collect_members(workspace, &child, out)?;
        }
    } else {
        out.push(Member {
            name,
            path: path.to_path_buf(),
            is_dir: false,
        });
    }
    Ok(())
}

fn member_name(workspace: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(workspace)
        .map_err(|_| ArtifactError::UnsafeArchiveEntry(path.display().to_string()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return Err(ArtifactError::UnsafeArchiveEntry(path.display().to_string())),
        }
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn member_options(path: &Path) -> Result<FileOptions> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(mode & 0o777))
}

#[cfg(not(unix))]
fn member_options(_path: &Path) -> Result<FileOptions> {
    Ok(FileOptions::default().compression_method(CompressionMethod::Deflated))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}
