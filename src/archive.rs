//! Byte-faithful directory archives and mtime normalization.
//!
//! Build contexts travel to the runtime as tar blobs, and result files come
//! back the same way. Content must round-trip exactly: arbitrary binary
//! payloads, symbolic links stored as links, permissions kept. Staged
//! contexts additionally get a single fixed mtime so that identical content
//! always hashes to the same build layer.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

/// Serializes the tree under `dir` into a tar blob. Symbolic links are
/// stored as links, not followed.
pub fn create_tar(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all("", dir)?;
    builder.into_inner()
}

/// Inverse of [`create_tar`]: writes files, directories and symlinks into
/// `dir` exactly as encoded.
pub fn extract_tar(bytes: &[u8], dir: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(bytes);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.unpack(dir)
}

/// Sets the modification time of `dir` and every entry below it to `when`.
/// Symlinks are left alone; their targets are covered by the walk.
pub fn normalize_mtimes(dir: &Path, when: DateTime<Utc>) -> io::Result<()> {
    let mtime = SystemTime::from(when);
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_symlink() {
            continue;
        }
        File::open(entry.path())?.set_modified(mtime)?;
    }
    Ok(())
}

/// Reads the single regular-file entry named `name` out of a tar blob.
/// Returns `None` when no such entry exists.
pub fn file_from_tar(bytes: &[u8], name: &str) -> io::Result<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(bytes);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let matches = entry
            .path()?
            .file_name()
            .map(|n| n == name)
            .unwrap_or(false);
        if matches {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(Some(content));
        }
    }
    Ok(None)
}
