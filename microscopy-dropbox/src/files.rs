//! File and folder moves and copies.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;

/// Copy a file, or a folder recursively, to `destination`. Returns the
/// number of regular files copied.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<usize> {
    if source.is_file() {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, destination)?;
        return Ok(1);
    }
    let mut copied = 0;
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Move `source` to `destination`, copying and deleting when a rename is
/// not possible (e.g. across file systems).
pub fn move_path(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    tracing::debug!(
        "Rename of {} failed, copying instead",
        source.display()
    );
    copy_tree(source, destination)?;
    if source.is_dir() {
        fs::remove_dir_all(source)?;
    } else {
        fs::remove_file(source)?;
    }
    Ok(())
}

/// Regular files below `root`, as sorted `/`-separated relative paths.
pub fn relative_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative: PathBuf = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push(parts.join("/"));
    }
    files.sort();
    Ok(files)
}
