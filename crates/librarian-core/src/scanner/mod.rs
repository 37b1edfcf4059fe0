pub mod path_codec;
pub mod staging;
pub mod walk;

use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::report::RunReport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub use staging::{StagingBatches, StagingFile, StagingWriter};
pub use walk::Scanner;

/// A file discovered during scanning. Never mutated after staging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Discovery ordinal within the run.
    pub seq: u64,
    #[serde(with = "path_codec")]
    pub path: PathBuf,
    /// File name, lossily decoded when the path is not UTF-8.
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub files_staged: usize,
    pub bytes_staged: u64,
    pub skipped: usize,
    pub duration: Duration,
}

/// Walk `roots` and append every accepted record to an on-disk staging file.
/// Skips are recorded in `report`; only staging IO errors are fatal.
pub fn stage_files(
    scanner: &Scanner,
    roots: &[PathBuf],
    staging_path: &Path,
    flush_every: usize,
    report: &mut RunReport,
    progress: &dyn ProgressReporter,
) -> Result<(StagingFile, ScanStats), Error> {
    let start = Instant::now();
    let mut writer = StagingWriter::create(staging_path, flush_every)?;
    let mut stats = ScanStats::default();

    progress.on_scan_start();
    for item in scanner.scan(roots) {
        match item {
            Ok(record) => {
                writer.append(&record)?;
                stats.files_staged += 1;
                stats.bytes_staged += record.size;
                if stats.files_staged % 1000 == 0 {
                    progress.on_scan_progress(stats.files_staged, &record.path.to_string_lossy());
                    debug!("Staged {} files", stats.files_staged);
                }
            }
            Err(issue) => {
                stats.skipped += 1;
                report.record(issue);
            }
        }
    }

    let staging = writer.finish()?;
    stats.duration = start.elapsed();
    progress.on_scan_complete(stats.files_staged, stats.duration.as_secs_f64());
    info!(
        "Scan staged {} files ({} bytes), skipped {} in {:.2}s",
        stats.files_staged,
        stats.bytes_staged,
        stats.skipped,
        stats.duration.as_secs_f64()
    );
    Ok((staging, stats))
}
