//! Temp-then-rename helpers shared by the publishers.
//!
//! Artifacts are always built at a `.tmp` sibling of their final path and only
//! renamed into place once complete, so a reader of the final path sees either
//! the previous artifact or the new one, never a partial write.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{FilesetError, FilesetResult};

/// Appends `.{ext}` unless the file name already ends with it.
pub fn ensure_extension(path: &Path, ext: &str) -> PathBuf {
    let suffix = format!(".{ext}");
    let already = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase().ends_with(&suffix))
        .unwrap_or(false);
    if already {
        path.to_path_buf()
    } else {
        append(path, &suffix)
    }
}

/// `target` with `.tmp` appended to its file name.
pub fn temp_sibling(target: &Path) -> PathBuf {
    append(target, ".tmp")
}

fn append(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Creates the parent directory of `path` when it is missing.
pub fn ensure_parent(path: &Path) -> FilesetResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            fs::create_dir_all(parent).map_err(|e| FilesetError::io(parent, e))
        }
        _ => Ok(()),
    }
}

/// Moves a finished temp file over `target` in one rename.
pub fn commit_file(temp: &Path, target: &Path) -> FilesetResult<()> {
    fs::rename(temp, target).map_err(|e| FilesetError::io(target, e))
}

/// Writes `bytes` to `target` through its temp sibling. The temp file is
/// removed again when either step fails.
pub fn write_file(target: &Path, bytes: &[u8]) -> FilesetResult<()> {
    ensure_parent(target)?;
    let temp = temp_sibling(target);
    let written = fs::write(&temp, bytes)
        .map_err(|e| FilesetError::io(&temp, e))
        .and_then(|()| commit_file(&temp, target));
    if written.is_err() {
        // the original error matters more than a failed cleanup
        let _ = discard(&temp);
    }
    written
}

/// Replaces the directory `target` with the fully populated `staging` directory.
///
/// Removing the old tree and renaming are two steps; callers serialize this
/// against any reader of `target`.
pub fn replace_dir(staging: &Path, target: &Path) -> FilesetResult<()> {
    if target.exists() {
        fs::remove_dir_all(target).map_err(|e| FilesetError::io(target, e))?;
    }
    fs::rename(staging, target).map_err(|e| FilesetError::io(target, e))
}

/// Removes a leftover temp path, file or directory, if any.
pub fn discard(temp: &Path) -> FilesetResult<()> {
    let result = if temp.is_dir() {
        fs::remove_dir_all(temp)
    } else if temp.exists() {
        fs::remove_file(temp)
    } else {
        return Ok(());
    };
    result.map_err(|e| FilesetError::io(temp, e))
}
