//! Filename normalization for the token database
//!
//! Every path entering the token database goes through [`normalize`] so that
//! different spellings of the same file (trailing separators, `.`/`..`
//! segments, case differences on case-insensitive filesystems) intern to the
//! same FileId.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Normalize a path into the canonical string form used as an interning key.
///
/// This is a purely lexical normalization: it does not touch the filesystem,
/// so paths to files that do not exist (yet) normalize consistently too.
pub fn normalize(path: &Path) -> String {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }

    let mut normalized = out.to_string_lossy().into_owned();
    while normalized.len() > 1 && (normalized.ends_with('/') || normalized.ends_with('\\')) {
        normalized.pop();
    }

    // Case-insensitive filesystem semantics on hosts that require them
    if cfg!(windows) {
        normalized = normalized.to_lowercase();
    }

    normalized
}

/// Last modification time of a file as seconds since the Unix epoch.
///
/// Returns 0 when the file is missing or the timestamp is unavailable; the
/// token database treats 0 as "never indexed".
pub fn file_mtime(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trailing_separator() {
        assert_eq!(
            normalize(Path::new("/home/user/project/")),
            normalize(Path::new("/home/user/project"))
        );
    }

    #[test]
    fn test_normalize_dot_segments() {
        assert_eq!(
            normalize(Path::new("/home/user/./project/../project/main.cpp")),
            normalize(Path::new("/home/user/project/main.cpp"))
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize(Path::new("/a/b/../c/./d/"));
        let twice = normalize(Path::new(&once));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_relative_path() {
        assert_eq!(normalize(Path::new("src/./main.c")), normalize(Path::new("src/main.c")));
    }

    #[test]
    fn test_file_mtime_missing_file() {
        assert_eq!(file_mtime(Path::new("/definitely/not/a/file.cpp")), 0);
    }

    #[test]
    fn test_file_mtime_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.c");
        std::fs::write(&path, "int x;").unwrap();
        assert!(file_mtime(&path) > 0);
    }
}
