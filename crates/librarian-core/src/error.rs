use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Staging error: {0}")]
    Staging(#[from] csv::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Fatal setup problem detected before any file is touched.
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("{0}")]
    Other(String),
}

/// What went wrong with a single file. Never fatal to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    TransientAccess,
    BrokenSymlink,
    StructuralCorruption,
    Timeout,
    RepairFailed,
    HashFailed,
    CopyFailed,
    IndexWriteFailed,
    Superseded,
    EnrichmentFailed,
    /// A worker panicked while analysing the file.
    AnalysisFailed,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientAccess => "transient_access",
            Self::BrokenSymlink => "broken_symlink",
            Self::StructuralCorruption => "structural_corruption",
            Self::Timeout => "timeout",
            Self::RepairFailed => "repair_failed",
            Self::HashFailed => "hash_failed",
            Self::CopyFailed => "copy_failed",
            Self::IndexWriteFailed => "index_write_failed",
            Self::Superseded => "superseded",
            Self::EnrichmentFailed => "enrichment_failed",
            Self::AnalysisFailed => "analysis_failed",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-file failure, carried as a value back to the engine.
#[derive(Debug, Clone, Error)]
#[error("{kind} on {}: {cause}", path.display())]
pub struct FileError {
    pub path: PathBuf,
    pub kind: IssueKind,
    pub cause: String,
}

impl FileError {
    pub fn new(path: impl AsRef<Path>, kind: IssueKind, cause: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            kind,
            cause: cause.into(),
        }
    }

    /// Classify an IO error into an access issue for `path`.
    pub fn from_io(path: impl AsRef<Path>, err: &std::io::Error) -> Self {
        Self::new(path, IssueKind::TransientAccess, err.to_string())
    }
}
