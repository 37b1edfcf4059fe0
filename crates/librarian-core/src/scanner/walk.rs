use super::FileRecord;
use crate::config::AppConfig;
use crate::error::{FileError, IssueKind};
use glob::Pattern;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use walkdir::{DirEntry, WalkDir};

/// Lazy directory traversal producing [`FileRecord`]s.
///
/// Symlinks are not followed into directories. A link to a file is staged
/// under its own path with the target's size; a dangling link yields one
/// `BrokenSymlink` issue. Hidden entries, glob-ignored paths and files below
/// the size threshold are dropped silently.
pub struct Scanner {
    min_size: u64,
    skip_hidden: bool,
    ignore_patterns: Vec<Pattern>,
    excluded_dirs: Vec<PathBuf>,
}

impl Scanner {
    pub fn new(config: &AppConfig) -> Self {
        let ignore_patterns = config
            .ignore_patterns
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();

        Self {
            min_size: config.min_file_size_bytes,
            skip_hidden: config.skip_hidden,
            ignore_patterns,
            excluded_dirs: Vec::new(),
        }
    }

    /// Never descend into `dirs` (the library and staging areas).
    pub fn with_excluded_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.excluded_dirs = dirs;
        self
    }

    /// Restartable from the beginning; entries come out in file-name order
    /// so repeated scans of an unchanged tree assign the same `seq`.
    pub fn scan<'a>(
        &'a self,
        roots: &'a [PathBuf],
    ) -> impl Iterator<Item = Result<FileRecord, FileError>> + 'a {
        let mut seq = 0u64;
        roots
            .iter()
            .flat_map(move |root| self.walk_root(root))
            .map(move |item| {
                item.map(|mut record| {
                    record.seq = seq;
                    seq += 1;
                    record
                })
            })
    }

    fn walk_root<'a>(
        &'a self,
        root: &'a Path,
    ) -> impl Iterator<Item = Result<FileRecord, FileError>> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| e.depth() == 0 || !self.is_excluded(e.path(), e.file_name()))
            .filter_map(move |entry| match entry {
                Ok(entry) => self.inspect(&entry),
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf());
                    Some(Err(FileError::new(
                        path,
                        IssueKind::TransientAccess,
                        err.to_string(),
                    )))
                }
            })
    }

    fn is_excluded(&self, path: &Path, name: &OsStr) -> bool {
        if self.skip_hidden && name.to_string_lossy().starts_with('.') {
            return true;
        }
        self.excluded_dirs.iter().any(|dir| path == dir)
            || self
                .ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(path))
    }

    fn inspect(&self, entry: &DirEntry) -> Option<Result<FileRecord, FileError>> {
        let file_type = entry.file_type();
        let path = entry.path();

        let size = if file_type.is_symlink() {
            match fs::metadata(path) {
                Ok(meta) if meta.is_file() => meta.len(),
                Ok(_) => {
                    debug!("Not following symlink to non-file {}", path.display());
                    return None;
                }
                Err(err) => {
                    return Some(Err(FileError::new(
                        path,
                        IssueKind::BrokenSymlink,
                        format!("unreachable symlink target: {}", err),
                    )));
                }
            }
        } else if file_type.is_file() {
            match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    return Some(Err(FileError::new(
                        path,
                        IssueKind::TransientAccess,
                        err.to_string(),
                    )))
                }
            }
        } else {
            return None;
        };

        if size < self.min_size.max(1) {
            return None;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if path.to_str().is_none() {
            debug!("Non UTF-8 path staged by its raw bytes: {}", path.display());
        }

        Some(Ok(FileRecord {
            seq: 0,
            path: path.to_path_buf(),
            name,
            size,
        }))
    }
}
