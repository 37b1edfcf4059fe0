use crate::classifier::{detect_mime, Classifier, KnowledgeCache};
use crate::config::{self, AppConfig};
use crate::dedup::{quality_score, AnalysisResult, Deduplicator};
use crate::document::sandbox::panic_message;
use crate::document::{
    is_pdf_candidate, DocumentOutcome, DocumentValidator, Isolation, TextSampler,
};
use crate::error::{Error, FileError, IssueKind};
use crate::hasher;
use crate::index_builder::{CopyStats, IndexBuilder};
use crate::progress::ProgressReporter;
use crate::report::{IssueSummary, RunReport};
use crate::resources::ResourceMonitor;
use crate::scanner::{self, FileRecord, ScanStats, Scanner, StagingFile};
use ahash::AHashMap;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const STAGING_FILE_NAME: &str = "scan.csv";
const REPAIR_DIR_NAME: &str = "repaired";
const WRITE_PROBE_NAME: &str = ".librarian_write_test";

/// Drives scan, validation, analysis, dedup and copy for one run.
pub struct LibraryEngine {
    config: AppConfig,
    isolation: Isolation,
    monitor: ResourceMonitor,
    knowledge: Option<Arc<KnowledgeCache>>,
    validator: Option<DocumentValidator>,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub scan_secs: f64,
    pub validation_secs: f64,
    pub analysis_secs: f64,
    pub copy_secs: f64,
    pub files_scanned: usize,
    pub files_analysed: usize,
    pub documents_validated: usize,
    pub documents_repaired: usize,
    pub documents_degraded: usize,
    pub superseded: usize,
    pub unique_files: usize,
    pub copied: usize,
    pub failed: usize,
    pub issues: IssueSummary,
}

/// Outcome of a scan-only run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub staging_path: PathBuf,
    pub files_staged: usize,
    pub bytes_staged: u64,
    pub skipped: usize,
    pub scan_secs: f64,
    pub issues: IssueSummary,
}

#[derive(Default)]
struct PhaseTotals {
    validation: Duration,
    analysis: Duration,
    validated: usize,
    repaired: usize,
    degraded: usize,
    analysed: usize,
    superseded: usize,
}

/// Shared, read-only per-run analysers.
struct Stages<'a> {
    config: &'a AppConfig,
    validator: &'a DocumentValidator,
    classifier: &'a Classifier,
}

struct Analysed {
    record: FileRecord,
    result: Result<AnalysisResult, FileError>,
    issues: Vec<FileError>,
}

impl LibraryEngine {
    pub fn new(config: AppConfig) -> Self {
        let isolation = Isolation::from_config(&config.documents);
        let monitor = ResourceMonitor::new(config.resources.clone());
        Self {
            config,
            isolation,
            monitor,
            knowledge: None,
            validator: None,
        }
    }

    pub fn with_monitor(mut self, monitor: ResourceMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Use an already loaded catalog instead of `knowledge_db`.
    pub fn with_knowledge(mut self, cache: Arc<KnowledgeCache>) -> Self {
        self.knowledge = Some(cache);
        self
    }

    pub fn with_validator(mut self, validator: DocumentValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Fatal configuration checks. Returns the readable, non-overlapping
    /// source roots.
    pub fn preflight(&self) -> Result<Vec<PathBuf>, Error> {
        if self.config.source_paths.is_empty() {
            return Err(Error::Setup("no source paths configured".to_string()));
        }
        if self.config.library_root.trim().is_empty() {
            return Err(Error::Setup("no library root configured".to_string()));
        }

        let mut roots = Vec::new();
        for dir in config::non_overlapping_directories(self.config.source_paths.clone()) {
            let path = PathBuf::from(&dir);
            match fs::read_dir(&path) {
                Ok(_) => roots.push(fs::canonicalize(&path).unwrap_or(path)),
                Err(e) => warn!("Skipping source root {}: {}", dir, e),
            }
        }
        if roots.is_empty() {
            return Err(Error::Setup(
                "none of the configured source roots is a readable directory".to_string(),
            ));
        }

        let library = self.config.library_path();
        fs::create_dir_all(&library).map_err(|e| {
            Error::Setup(format!("cannot create library root {}: {}", library.display(), e))
        })?;
        let probe = library.join(WRITE_PROBE_NAME);
        fs::write(&probe, b"ok")
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|e| {
                Error::Setup(format!("library root {} is not writable: {}", library.display(), e))
            })?;

        let staging = self.config.staging_path();
        fs::create_dir_all(&staging).map_err(|e| {
            Error::Setup(format!("cannot create staging dir {}: {}", staging.display(), e))
        })?;

        info!("Processing directories: {:?}", roots);
        Ok(roots)
    }

    /// Scan and stage only. The staging file is left in place.
    pub fn scan(&mut self, progress: &dyn ProgressReporter) -> Result<ScanOutcome, Error> {
        let roots = self.preflight()?;
        let mut report = RunReport::new();
        let (staging, stats) = self.stage(&roots, &mut report, progress)?;
        report.log_summary();
        Ok(ScanOutcome {
            staging_path: staging.path().to_path_buf(),
            files_staged: stats.files_staged,
            bytes_staged: stats.bytes_staged,
            skipped: stats.skipped,
            scan_secs: stats.duration.as_secs_f64(),
            issues: report.summary(),
        })
    }

    /// Run the full pipeline:
    /// 1. Scan source roots into on-disk staging
    /// 2. Per batch: validate documents, then hash and classify, then dedup
    /// 3. Copy winners into the library and write the index
    pub fn build(&mut self, progress: &dyn ProgressReporter) -> Result<RunSummary, Error> {
        let roots = self.preflight()?;
        let mut report = RunReport::new();
        self.monitor.log_usage("Start");

        // Phase 1: Scan
        info!("Scanning files...");
        let (staging, scan_stats) = self.stage(&roots, &mut report, progress)?;
        self.monitor.log_usage("After scan");

        // Phase 2: Validate, analyse, dedup
        info!("Analysing {} staged files...", staging.len());
        let knowledge = self.knowledge_cache();
        let sampler = TextSampler::new(
            self.isolation.clone(),
            Duration::from_secs(self.config.documents.timeout_secs.max(1)),
            self.config.documents.max_text_pages,
        );
        let classifier = Classifier::new(knowledge, &self.config.classifier, sampler);
        debug!("Classification tiers: {:?}", classifier.tier_names());
        let built_validator;
        let validator = match &self.validator {
            Some(v) => v,
            None => {
                built_validator = DocumentValidator::new(&self.config, self.isolation.clone());
                &built_validator
            }
        };

        let stages = Stages {
            config: &self.config,
            validator,
            classifier: &classifier,
        };
        let mut dedup = Deduplicator::new();
        let mut totals = PhaseTotals::default();
        let analysis_start = Instant::now();
        let batch_size = self
            .monitor
            .recommended_batch_size(self.config.batch_size)
            .max(1);
        debug!("Batch size: {}", batch_size);
        let mut files_done = 0usize;

        for (batch_index, batch) in staging.batches(batch_size)?.enumerate() {
            let batch = batch?;
            process_batch(
                &mut self.monitor,
                &stages,
                batch_index,
                &batch,
                &mut dedup,
                &mut totals,
                &mut report,
                progress,
            )?;
            files_done += batch.len();
            progress.on_batch_complete(files_done, staging.len());
        }
        let unique_files = dedup.len();
        progress.on_analysis_complete(unique_files, analysis_start.elapsed().as_secs_f64());
        info!(
            "Analysis completed in {:.2}s: {} files, {} unique, {} superseded",
            analysis_start.elapsed().as_secs_f64(),
            totals.analysed,
            unique_files,
            totals.superseded
        );
        self.monitor.log_usage("After analysis");

        // Phase 3: Copy and index
        info!("Copying {} files into {}...", unique_files, self.config.library_root);
        let copy_start = Instant::now();
        let copy_stats = self.copy_winners(dedup, &mut report, progress)?;
        let copy_duration = copy_start.elapsed();
        progress.on_copy_complete(copy_stats.copied, copy_stats.failed, copy_duration.as_secs_f64());

        if !self.config.keep_staging {
            self.clean_staging(&staging);
        }
        self.monitor.log_usage("End");
        report.log_summary();

        Ok(RunSummary {
            scan_secs: scan_stats.duration.as_secs_f64(),
            validation_secs: totals.validation.as_secs_f64(),
            analysis_secs: totals.analysis.as_secs_f64(),
            copy_secs: copy_duration.as_secs_f64(),
            files_scanned: scan_stats.files_staged,
            files_analysed: totals.analysed,
            documents_validated: totals.validated,
            documents_repaired: totals.repaired,
            documents_degraded: totals.degraded,
            superseded: totals.superseded,
            unique_files,
            copied: copy_stats.copied,
            failed: copy_stats.failed,
            issues: report.summary(),
        })
    }

    fn stage(
        &self,
        roots: &[PathBuf],
        report: &mut RunReport,
        progress: &dyn ProgressReporter,
    ) -> Result<(StagingFile, ScanStats), Error> {
        let excluded = [self.config.library_path(), self.config.staging_path()]
            .into_iter()
            .map(|p| fs::canonicalize(&p).unwrap_or(p))
            .collect();
        let scanner = Scanner::new(&self.config).with_excluded_dirs(excluded);
        let staging_path = self.config.staging_path().join(STAGING_FILE_NAME);
        scanner::stage_files(
            &scanner,
            roots,
            &staging_path,
            self.config.batch_size,
            report,
            progress,
        )
    }

    fn knowledge_cache(&self) -> Arc<KnowledgeCache> {
        if let Some(cache) = &self.knowledge {
            return cache.clone();
        }
        match &self.config.knowledge_db {
            Some(path) => Arc::new(KnowledgeCache::load(Path::new(path))),
            None => {
                info!("No knowledge store configured; using path and type heuristics only");
                Arc::new(KnowledgeCache::empty())
            }
        }
    }

    fn copy_winners(
        &self,
        dedup: Deduplicator,
        report: &mut RunReport,
        progress: &dyn ProgressReporter,
    ) -> Result<CopyStats, Error> {
        let winners = dedup.into_winners();
        let total = winners.len();
        progress.on_copy_start(total);

        let mut builder = IndexBuilder::create(&self.config.library_path(), self.config.batch_size)?;
        for (i, winner) in winners.iter().enumerate() {
            builder.add(winner, report);
            progress.on_copy_progress(i + 1, total);
        }
        let (stats, db) = builder.finish(report);
        if let Ok(counts) = db.system_counts() {
            for (system, count) in counts.iter().take(10) {
                debug!("Indexed {} files under {}", count, system);
            }
        }
        info!("Copied {} files, {} failed", stats.copied, stats.failed);
        Ok(stats)
    }

    fn clean_staging(&self, staging: &StagingFile) {
        if let Err(e) = fs::remove_file(staging.path()) {
            debug!("Could not remove staging file {}: {}", staging.path().display(), e);
        }
        let repaired = self.config.staging_path().join(REPAIR_DIR_NAME);
        if repaired.exists() {
            if let Err(e) = fs::remove_dir_all(&repaired) {
                warn!("Could not remove repair outputs {}: {}", repaired.display(), e);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn process_batch(
    monitor: &mut ResourceMonitor,
    stages: &Stages<'_>,
    batch_index: usize,
    batch: &[FileRecord],
    dedup: &mut Deduplicator,
    totals: &mut PhaseTotals,
    report: &mut RunReport,
    progress: &dyn ProgressReporter,
) -> Result<(), Error> {
    if monitor.under_memory_pressure() {
        let resources = monitor.config().clone();
        monitor.wait_until_free(
            resources.min_free_mb,
            Duration::from_secs(resources.pressure_wait_secs),
        );
    }
    let workers = monitor.worker_count();
    progress.on_batch_start(batch_index, batch.len(), workers);
    debug!(
        "Batch {}: {} files, {} workers",
        batch_index + 1,
        batch.len(),
        workers
    );

    // Validation: few threads, smallest documents first.
    let validation_start = Instant::now();
    let mut documents: Vec<&FileRecord> =
        batch.iter().filter(|r| is_pdf_candidate(&r.path)).collect();
    documents.sort_by_key(|r| (r.size, r.seq));
    let validation_threads = workers.min(stages.config.documents.validation_workers).max(1);
    let outcomes: AHashMap<u64, DocumentOutcome> = if documents.is_empty() {
        AHashMap::new()
    } else {
        run_scoped(validation_threads, "validate", || {
            documents
                .par_iter()
                .map(|r| (r.seq, stages.validator.validate(&r.path)))
                .collect::<Vec<_>>()
        })?
        .into_iter()
        .collect()
    };
    totals.validation += validation_start.elapsed();

    for outcome in documents.iter().filter_map(|r| outcomes.get(&r.seq)) {
        totals.validated += 1;
        if outcome.repair.is_some() {
            totals.repaired += 1;
        }
        if outcome.degraded {
            totals.degraded += 1;
        }
        for issue in &outcome.issues {
            report.record(issue.clone());
        }
    }

    // Analysis: hash, type and classify on the full worker count.
    let analysis_start = Instant::now();
    let size_threshold = stages.config.quality_size_bytes;
    let analysed: Vec<Analysed> = run_scoped(workers, "analyse", || {
        batch
            .par_iter()
            .map(|record| analyse(record, outcomes.get(&record.seq), stages.classifier, size_threshold))
            .collect()
    })?;
    totals.analysis += analysis_start.elapsed();

    // Reduction stays on this thread.
    for item in analysed {
        for issue in item.issues {
            report.record(issue);
        }
        match item.result {
            Ok(analysis) => {
                totals.analysed += 1;
                let hash = analysis.content_hash.clone();
                let admission = dedup.admit(item.record, analysis);
                if let Some(loser) = admission.superseded {
                    totals.superseded += 1;
                    report.record(FileError::new(
                        &loser.path,
                        IssueKind::Superseded,
                        format!(
                            "duplicate of {} (hash {})",
                            admission.winner_path.display(),
                            &hash[..hash.len().min(16)]
                        ),
                    ));
                }
            }
            Err(issue) => report.record(issue),
        }
    }
    Ok(())
}

/// Run `work` on a dedicated pool whose threads are all joined before this
/// returns, so one phase's memory is released before the next starts.
fn run_scoped<R, F>(threads: usize, name: &'static str, work: F) -> Result<R, Error>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    let result = ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(move |i| format!("{}-{}", name, i))
        .build_scoped(|thread| thread.run(), |pool| pool.install(work))?;
    Ok(result)
}

/// Analyse one file; a panic anywhere inside becomes that file's issue
/// instead of tearing down the batch.
fn analyse(
    record: &FileRecord,
    document: Option<&DocumentOutcome>,
    classifier: &Classifier,
    size_threshold: u64,
) -> Analysed {
    panic::catch_unwind(AssertUnwindSafe(|| {
        analyse_file(record, document, classifier, size_threshold)
    }))
    .unwrap_or_else(|payload| {
        warn!(
            "Analysis of {} panicked: {}",
            record.path.display(),
            panic_message(&payload)
        );
        Analysed {
            record: record.clone(),
            result: Err(FileError::new(
                &record.path,
                IssueKind::AnalysisFailed,
                format!("analysis panicked: {}", panic_message(&payload)),
            )),
            issues: Vec::new(),
        }
    })
}

fn analyse_file(
    record: &FileRecord,
    document: Option<&DocumentOutcome>,
    classifier: &Classifier,
    size_threshold: u64,
) -> Analysed {
    let content_hash = match hasher::content_hash(&record.path) {
        Ok(hash) => hash,
        Err(e) => {
            return Analysed {
                record: record.clone(),
                result: Err(FileError::new(&record.path, IssueKind::HashFailed, e.to_string())),
                issues: Vec::new(),
            }
        }
    };

    let mime_type = detect_mime(&record.path);
    let text_source = document
        .filter(|d| d.is_valid())
        .map(|d| d.accepted_path(&record.path));
    let classified =
        classifier.classify_document(&record.name, &record.path, &mime_type, text_source);
    let (document_valid, has_text) = document
        .map(|d| (d.is_valid(), d.has_text()))
        .unwrap_or((false, false));
    let repaired_path = document.and_then(|d| d.repair.as_ref().map(|r| r.path.clone()));

    let analysis = AnalysisResult {
        content_hash,
        mime_type,
        document_valid,
        has_text,
        quality_score: quality_score(has_text, document_valid, record.size, size_threshold),
        classification: classified.classification,
        repaired_path,
        degraded: document.map(|d| d.degraded).unwrap_or(false),
    };
    Analysed {
        record: record.clone(),
        result: Ok(analysis),
        issues: classified.issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_scoped_uses_requested_threads() {
        let seen = run_scoped(2, "t", rayon::current_num_threads).unwrap();
        assert_eq!(seen, 2);
        // Zero is clamped rather than meaning "one per core".
        assert_eq!(run_scoped(0, "t", rayon::current_num_threads).unwrap(), 1);
    }

    #[test]
    fn test_preflight_creates_library_and_staging() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        let config = AppConfig {
            source_paths: vec![
                src.join("nested").to_string_lossy().into_owned(),
                src.to_string_lossy().into_owned(),
                tmp.path().join("missing").to_string_lossy().into_owned(),
            ],
            library_root: tmp.path().join("lib").to_string_lossy().into_owned(),
            staging_dir: tmp.path().join("stage").to_string_lossy().into_owned(),
            ..AppConfig::default()
        };

        let roots = LibraryEngine::new(config).preflight().unwrap();
        assert_eq!(roots, vec![fs::canonicalize(&src).unwrap()]);
        assert!(tmp.path().join("lib").is_dir());
        assert!(tmp.path().join("stage").is_dir());
        assert!(!tmp.path().join("lib").join(WRITE_PROBE_NAME).exists());
    }

    #[test]
    fn test_unreadable_file_is_reported_not_fatal() {
        let tmp = tempdir().unwrap();
        let record = FileRecord {
            seq: 0,
            path: tmp.path().join("vanished.txt"),
            name: "vanished.txt".to_string(),
            size: 100,
        };
        let classifier = Classifier::with_tiers(Vec::new());
        let analysed = analyse(&record, None, &classifier, 10);
        let err = analysed.result.unwrap_err();
        assert_eq!(err.kind, IssueKind::HashFailed);
    }

    #[test]
    fn test_panicking_tier_is_reported_not_fatal() {
        use crate::classifier::{ClassificationTier, ClassifyInput, TierOutcome};

        struct Exploding;
        impl ClassificationTier for Exploding {
            fn name(&self) -> &'static str {
                "exploding"
            }
            fn classify(&self, _input: &ClassifyInput) -> Result<TierOutcome, String> {
                panic!("tier blew up")
            }
        }

        let tmp = tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        fs::write(&path, "session notes").unwrap();
        let record = FileRecord {
            seq: 0,
            path,
            name: "notes.txt".to_string(),
            size: 13,
        };
        let classifier = Classifier::with_tiers(vec![Box::new(Exploding)]);

        let batch = vec![record.clone(), record];
        let analysed: Vec<Analysed> = run_scoped(2, "t", || {
            batch
                .par_iter()
                .map(|r| analyse(r, None, &classifier, 10))
                .collect()
        })
        .unwrap();
        assert_eq!(analysed.len(), 2);
        for item in analysed {
            let err = item.result.unwrap_err();
            assert_eq!(err.kind, IssueKind::AnalysisFailed);
            assert!(err.cause.contains("tier blew up"));
        }
    }
}
