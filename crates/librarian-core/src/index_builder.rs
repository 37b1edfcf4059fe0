use crate::dedup::DedupWinner;
use crate::error::{Error, FileError, IssueKind};
use crate::report::RunReport;
use crate::storage::{Database, IndexRecord, INDEX_FILE_NAME};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub copied: usize,
    pub failed: usize,
}

struct Pending {
    record: IndexRecord,
    destination: PathBuf,
}

/// Copies winners into `root/system/edition/category/filename` and writes one
/// index row per copied file. Failures are recorded and skipped.
pub struct IndexBuilder {
    root: PathBuf,
    db: Database,
    batch_size: usize,
    pending: Vec<Pending>,
    stats: CopyStats,
}

impl IndexBuilder {
    /// Open `root/library_index.sqlite` and clear it for this run.
    pub fn create(root: &Path, batch_size: usize) -> Result<Self, Error> {
        fs::create_dir_all(root)?;
        let db = Database::open(&root.join(INDEX_FILE_NAME))?;
        db.reset()?;
        Ok(Self::with_database(root, db, batch_size))
    }

    pub fn with_database(root: &Path, db: Database, batch_size: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            db,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            stats: CopyStats::default(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Only known facets become directories.
    pub fn destination_for(&self, winner: &DedupWinner) -> PathBuf {
        let c = &winner.analysis.classification;
        let mut dest = self.root.join(sanitize_component(&c.system));
        for facet in [c.edition.as_deref(), c.category.as_deref()].into_iter().flatten() {
            dest.push(sanitize_component(facet));
        }
        dest.push(sanitize_component(&winner.file_name));
        dest
    }

    pub fn add(&mut self, winner: &DedupWinner, report: &mut RunReport) {
        let source = winner.analysis.copy_source(&winner.record);
        let destination = self.destination_for(winner);

        let copied = destination
            .parent()
            .map(fs::create_dir_all)
            .unwrap_or(Ok(()))
            .and_then(|_| fs::copy(source, &destination));
        let size = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.failed += 1;
                report.record(FileError::new(
                    &winner.record.path,
                    IssueKind::CopyFailed,
                    format!("copy to {} failed: {}", destination.display(), e),
                ));
                return;
            }
        };
        debug!("Copied {} -> {}", source.display(), destination.display());

        let record = build_index_record(winner, &destination, size);
        self.pending.push(Pending {
            record,
            destination,
        });
        if self.pending.len() >= self.batch_size {
            self.flush(report);
        }
    }

    fn flush(&mut self, report: &mut RunReport) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let records: Vec<IndexRecord> = pending.iter().map(|p| p.record.clone()).collect();

        let rejected: Vec<(usize, String)> = match self.db.insert_index_batch(&records) {
            Ok(failures) => failures
                .into_iter()
                .map(|(i, e)| (i, e.to_string()))
                .collect(),
            Err(e) => {
                warn!("Index batch of {} records failed: {}", records.len(), e);
                (0..records.len()).map(|i| (i, e.to_string())).collect()
            }
        };

        for (i, cause) in &rejected {
            let entry = &pending[*i];
            // Keep copy and index row together.
            if let Err(e) = fs::remove_file(&entry.destination) {
                debug!("Could not remove unindexed copy {}: {}", entry.destination.display(), e);
            }
            report.record(FileError::new(
                &entry.record.source_path,
                IssueKind::IndexWriteFailed,
                cause.clone(),
            ));
        }
        self.stats.copied += pending.len() - rejected.len();
        self.stats.failed += rejected.len();
    }

    pub fn finish(mut self, report: &mut RunReport) -> (CopyStats, Database) {
        self.flush(report);
        (self.stats, self.db)
    }
}

fn build_index_record(winner: &DedupWinner, destination: &Path, size: u64) -> IndexRecord {
    let analysis = &winner.analysis;
    let c = &analysis.classification;
    IndexRecord {
        filename: winner.file_name.clone(),
        path: destination.to_string_lossy().into_owned(),
        mime_type: analysis.mime_type.clone(),
        size: size as i64,
        game_system: c.system.clone(),
        edition: c.edition.as_deref().map(str::to_string),
        category: c.category.as_deref().map(str::to_string),
        language: c.language.as_deref().map(str::to_string),
        hash: analysis.content_hash.clone(),
        source_path: winner.record.path.to_string_lossy().into_owned(),
        quality_score: i64::from(analysis.quality_score),
        repaired: analysis.repaired_path.is_some(),
        indexed_at: chrono::Utc::now().to_rfc3339(),
    }
}

/// One path component: separators replaced, never empty or a dot entry.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
