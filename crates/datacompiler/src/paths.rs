//! Path helpers shared by every worker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use path_clean::PathClean;

/// Replace, add or strip the extension of `path`.
///
/// Only a `.` inside the base name counts, and never one at the very start of
/// it, so `.gitignore` has no extension. A leading `.` on `new_ext` is
/// ignored. An empty `new_ext` strips the extension.
pub fn with_extension(path: &str, new_ext: &str) -> String {
    let new_ext = new_ext.strip_prefix('.').unwrap_or(new_ext);
    let base_start = path.rfind(std::path::is_separator).map_or(0, |sep| sep + 1);
    let dot = path[base_start..]
        .rfind('.')
        .filter(|&pos| pos >= 1)
        .map(|pos| base_start + pos);

    match (dot, new_ext.is_empty()) {
        (Some(dot), false) => format!("{}.{}", &path[..dot], new_ext),
        (None, false) => format!("{path}.{new_ext}"),
        (Some(dot), true) => path[..dot].to_string(),
        (None, true) => path.to_string(),
    }
}

/// [`with_extension`] for filesystem paths.
pub fn with_extension_path(path: &Path, new_ext: &str) -> PathBuf {
    PathBuf::from(with_extension(&path.to_string_lossy(), new_ext))
}

/// Absolute, lexically cleaned form of `path`, relative paths taken from `base`.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf().clean()
    } else {
        base.join(path).clean()
    }
}

/// True if `path` exists and is a regular file. Any I/O error reads as false.
pub fn is_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// True if `path` exists and is a directory. Any I/O error reads as false.
pub fn is_directory(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Copy `source` over `target`, creating the target's parent directories.
pub fn copy_file(source: &Path, target: &Path) -> io::Result<u64> {
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, target)
}
