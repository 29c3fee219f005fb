//! Filesystem boundary.
//!
//! Everything the engine wants from the local filesystem goes through here:
//! stat, directory listing, rename, mkdir, unlink, and the per-mount
//! identity helpers. Errors are classified into transient (locked file,
//! would-block) and permanent so callers can route the path to the retry
//! queue or mark the node not-seen.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tracing::warn;

use crate::fingerprint::FileFingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("path not found: {0}")]
    NotFound(PathBuf),
    #[error("transient filesystem error on {path}: {source}")]
    Transient {
        path: PathBuf,
        source: io::Error,
    },
    #[error("filesystem error on {path}: {source}")]
    Permanent {
        path: PathBuf,
        source: io::Error,
    },
}

impl FsError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FsError::Transient { .. })
    }

    fn classify(path: &Path, source: io::Error) -> Self {
        // EAGAIN / EBUSY / ETXTBSY: the entry is locked or mid-write
        const TRANSIENT_ERRNOS: [i32; 3] = [11, 16, 26];
        let transient = matches!(
            source.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
        ) || source
            .raw_os_error()
            .is_some_and(|code| TRANSIENT_ERRNOS.contains(&code));
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound(path.to_path_buf())
        } else if transient {
            FsError::Transient {
                path: path.to_path_buf(),
                source,
            }
        } else {
            FsError::Permanent {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Stat of a single entry.
#[derive(Debug, Clone, Copy)]
pub struct StatInfo {
    pub kind: NodeKind,
    pub size: i64,
    pub mtime: i64,
    pub fs_id: u64,
    pub is_symlink: bool,
}

/// One scanned directory entry. Transient: produced by a scan, compared in a
/// triplet row, never persisted.
#[derive(Debug, Clone)]
pub struct FsEntry {
    pub local_name: String,
    pub display_name: String,
    pub kind: NodeKind,
    pub fs_id: u64,
    pub short_name: Option<String>,
    pub size: i64,
    pub mtime: i64,
    pub is_symlink: bool,
    pub fingerprint: FileFingerprint,
}

pub fn stat(path: &Path, follow_symlinks: bool) -> Result<StatInfo, FsError> {
    let symlink_meta = path
        .symlink_metadata()
        .map_err(|e| FsError::classify(path, e))?;
    let is_symlink = symlink_meta.file_type().is_symlink();
    let meta = if follow_symlinks && is_symlink {
        path.metadata().map_err(|e| FsError::classify(path, e))?
    } else {
        symlink_meta
    };
    Ok(StatInfo {
        kind: if meta.is_dir() {
            NodeKind::Folder
        } else {
            NodeKind::File
        },
        size: meta.len() as i64,
        mtime: mtime_of(&meta),
        fs_id: fs_id_of(&meta),
        is_symlink,
    })
}

/// Stats one directory entry and, for regular files, samples its body into a
/// full fingerprint.
pub fn scan_entry(dir: &Path, leaf: &str) -> Result<FsEntry, FsError> {
    let path = dir.join(leaf);
    let info = stat(&path, false)?;
    let fingerprint = match info.kind {
        NodeKind::File if !info.is_symlink => {
            FileFingerprint::generate(&path, info.size, info.mtime)
                .map_err(|e| FsError::classify(&path, e))?
        }
        _ => FileFingerprint::metadata_only(info.size, info.mtime),
    };
    Ok(FsEntry {
        local_name: leaf.to_string(),
        display_name: leaf.to_string(),
        kind: info.kind,
        fs_id: info.fs_id,
        short_name: short_name(&path),
        size: info.size,
        mtime: info.mtime,
        is_symlink: info.is_symlink,
        fingerprint,
    })
}

/// Leaf names of `path`, in filesystem order. Entries whose names are not
/// valid UTF-8 are skipped with a warning; they cannot be represented in the
/// cloud namespace anyway.
pub fn read_dir_names(path: &Path) -> Result<Vec<String>, FsError> {
    let iter = std::fs::read_dir(path).map_err(|e| FsError::classify(path, e))?;
    let mut names = Vec::new();
    for entry in iter {
        let entry = entry.map_err(|e| FsError::classify(path, e))?;
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => warn!(dir = %path.display(), name = ?raw, "skipping non-UTF-8 entry"),
        }
    }
    Ok(names)
}

pub fn rename(src: &Path, dst: &Path, overwrite: bool) -> Result<(), FsError> {
    if !overwrite && dst.symlink_metadata().is_ok() {
        return Err(FsError::Permanent {
            path: dst.to_path_buf(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "destination exists"),
        });
    }
    std::fs::rename(src, dst).map_err(|e| FsError::classify(src, e))
}

pub fn mkdir(path: &Path, recursive: bool) -> Result<(), FsError> {
    let result = if recursive {
        std::fs::create_dir_all(path)
    } else {
        std::fs::create_dir(path)
    };
    result.map_err(|e| FsError::classify(path, e))
}

pub fn unlink(path: &Path) -> Result<(), FsError> {
    std::fs::remove_file(path).map_err(|e| FsError::classify(path, e))
}

/// Alternate 8.3-style leaf, on filesystems that have one. Unix filesystems
/// do not.
pub fn short_name(_path: &Path) -> Option<String> {
    None
}

/// Stable 64-bit identity for the mount holding `path`, surviving remounts.
pub fn fs_fingerprint(path: &Path) -> Result<u64, FsError> {
    let meta = path.metadata().map_err(|e| FsError::classify(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        // device ids are small integers; mix so zero never comes out
        Ok(meta.dev() ^ 0x6375_6d75_6c75_7366)
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        Ok(0x6375_6d75_6c75_7366)
    }
}

/// Whether fsids survive a close/reopen of the same entry. True for inode
/// based filesystems.
pub fn stable_fs_ids() -> bool {
    cfg!(unix)
}

fn mtime_of(meta: &Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn fs_id_of(meta: &Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.ino()
    }
    #[cfg(not(unix))]
    {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scan_entry_fingerprints_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let entry = scan_entry(dir.path(), "a.txt").unwrap();
        assert_eq!(entry.kind, NodeKind::File);
        assert_eq!(entry.size, 5);
        assert!(entry.fingerprint.valid);
        assert_ne!(entry.fs_id, 0);
    }

    #[test]
    fn rename_without_overwrite_refuses_existing_target() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"a").unwrap();
        std::fs::write(dir.path().join("b"), b"b").unwrap();
        let err = rename(&dir.path().join("a"), &dir.path().join("b"), false).unwrap_err();
        assert!(!err.is_transient());
        assert!(dir.path().join("a").exists());
    }

    #[test]
    fn unlink_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone");
        std::fs::write(&path, b"x").unwrap();
        unlink(&path).unwrap();
        assert!(matches!(stat(&path, false), Err(FsError::NotFound(_))));
    }
}
