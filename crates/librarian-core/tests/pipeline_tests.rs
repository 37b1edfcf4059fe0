mod common;

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use common::{files_under, test_config, write_file, write_pdf};
use librarian_core::classifier::{KnowledgeCache, KnowledgeEntry};
use librarian_core::config::ResourceConfig;
use librarian_core::hasher::content_hash;
use librarian_core::resources::{MemoryProbe, MemorySnapshot};
use librarian_core::scanner::StagingFile;
use librarian_core::storage::{Database, INDEX_FILE_NAME};
use librarian_core::{Error, IssueKind, LibraryEngine, ProgressReporter, ResourceMonitor, SilentReporter};

/// Layout:
///   src/
///     .hidden/secret.pdf          hidden, never scanned
///     backup/old/Core Rulebook.pdf  same bytes as rules/Core Rulebook.pdf
///     broken/Broken.pdf           PDF header, garbage body
///     img/cover.png
///     notes.txt
///     other/Core Rulebook.pdf     different content, same name
///     rules/Core Rulebook.pdf
///     tiny.txt                    below the size floor
fn create_collection(src: &Path) {
    write_pdf(&src.join("rules").join("Core Rulebook.pdf"), "Core Rulebook One");
    write_file(
        &src.join("backup").join("old").join("Core Rulebook.pdf"),
        &fs::read(src.join("rules").join("Core Rulebook.pdf")).unwrap(),
    );
    write_pdf(&src.join("other").join("Core Rulebook.pdf"), "Core Rulebook Two");
    write_file(
        &src.join("broken").join("Broken.pdf"),
        b"%PDF-1.4\nthis body is not a PDF object graph at all\n",
    );
    write_file(&src.join("img").join("cover.png"), &[0x89, b'P', b'N', b'G', 1, 2, 3, 4, 5, 6, 7, 8]);
    write_file(&src.join("notes.txt"), b"session notes: the party entered the keep");
    write_file(&src.join("tiny.txt"), b"hi");
    write_pdf(&src.join(".hidden").join("secret.pdf"), "Secret");
}

#[test]
fn test_build_deduplicates_and_organises_library() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    create_collection(src.path());
    let config = test_config(src.path(), work.path());
    let library = work.path().join("library");

    let mut engine = LibraryEngine::new(config);
    let summary = engine.build(&SilentReporter).unwrap();

    assert_eq!(summary.files_scanned, 6);
    assert_eq!(summary.files_analysed, 6);
    assert_eq!(summary.unique_files, 5);
    assert_eq!(summary.superseded, 1);
    assert_eq!(summary.copied, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.documents_validated, 4);
    assert_eq!(summary.documents_degraded, 1);
    assert_eq!(summary.issues.counts.get(&IssueKind::Superseded), Some(&1));
    assert_eq!(summary.issues.counts.get(&IssueKind::RepairFailed), Some(&1));

    let pdfs = library.join("Documents").join("PDF");
    assert!(pdfs.join("Core Rulebook.pdf").is_file());
    assert!(pdfs.join("Core Rulebook_1.pdf").is_file());
    assert!(pdfs.join("Broken.pdf").is_file());
    assert!(library.join("Documents").join("Text").join("notes.txt").is_file());
    assert!(library.join("Media").join("Images").join("cover.png").is_file());
    assert!(!files_under(&library)
        .iter()
        .any(|p| p.file_name().unwrap() == "secret.pdf" || p.file_name().unwrap() == "tiny.txt"));

    let db = Database::open(&library.join(INDEX_FILE_NAME)).unwrap();
    assert_eq!(db.count_files().unwrap(), 5);

    // The shorter source path wins the duplicate pair and keeps its name
    // ordinal from discovery order.
    let rules_hash = content_hash(&src.path().join("rules").join("Core Rulebook.pdf")).unwrap();
    let row = db.find_by_hash(&rules_hash).unwrap().unwrap();
    assert!(row.source_path.ends_with("Core Rulebook.pdf"));
    assert!(row.source_path.contains("rules"));
    assert_eq!(row.filename, "Core Rulebook_1.pdf");
    assert_eq!(row.game_system, "Documents");
    assert_eq!(row.edition.as_deref(), Some("PDF"));

    // Every indexed row points at a file that exists with the recorded size.
    for row in db.all_files().unwrap() {
        let meta = fs::metadata(&row.path).unwrap();
        assert_eq!(meta.len() as i64, row.size);
    }

    // Source tree untouched; staging cleaned.
    assert!(src.path().join("backup").join("old").join("Core Rulebook.pdf").is_file());
    assert!(!work.path().join("staging").join("scan.csv").exists());
    assert!(!work.path().join("staging").join("repaired").exists());
}

#[test]
fn test_rebuild_is_idempotent() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    create_collection(src.path());
    let config = test_config(src.path(), work.path());
    let library = work.path().join("library");

    let first = LibraryEngine::new(config.clone()).build(&SilentReporter).unwrap();
    let copies = |dir: &Path| -> Vec<_> {
        files_under(dir)
            .into_iter()
            .filter(|p| !p.to_string_lossy().contains(INDEX_FILE_NAME))
            .collect()
    };
    let first_files = copies(&library);
    let first_rows: Vec<_> = Database::open(&library.join(INDEX_FILE_NAME))
        .unwrap()
        .all_files()
        .unwrap()
        .into_iter()
        .map(|r| (r.hash, r.path, r.filename))
        .collect();

    let second = LibraryEngine::new(config).build(&SilentReporter).unwrap();
    let second_rows: Vec<_> = Database::open(&library.join(INDEX_FILE_NAME))
        .unwrap()
        .all_files()
        .unwrap()
        .into_iter()
        .map(|r| (r.hash, r.path, r.filename))
        .collect();

    assert_eq!(first.copied, second.copied);
    assert_eq!(first_rows, second_rows);
    assert_eq!(first_files.len(), 5);
    assert_eq!(first_files, copies(&library));
}

#[test]
fn test_catalog_match_places_file_under_system_edition_category() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    write_pdf(
        &src.path().join("downloads").join("TSR9193 - Grand Duchy.pdf"),
        "The Grand Duchy of Karameikos",
    );
    let cache = KnowledgeCache::from_entries(vec![KnowledgeEntry {
        product_code: Some("TSR9193".to_string()),
        title: "GAZ1 The Grand Duchy of Karameikos".to_string(),
        system: "Dungeons & Dragons".to_string(),
        edition: Some("BECMI".to_string()),
        category: Some("Gazetteer".to_string()),
        language: Some("English".to_string()),
    }]);
    let config = test_config(src.path(), work.path());

    let mut engine = LibraryEngine::new(config).with_knowledge(Arc::new(cache));
    let summary = engine.build(&SilentReporter).unwrap();
    assert_eq!(summary.copied, 1);

    let dest = work
        .path()
        .join("library")
        .join("Dungeons & Dragons")
        .join("BECMI")
        .join("Gazetteer")
        .join("TSR9193 - Grand Duchy.pdf");
    assert!(dest.is_file());

    let db = Database::open(&work.path().join("library").join(INDEX_FILE_NAME)).unwrap();
    let rows = db.files_by_system("Dungeons & Dragons").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].category.as_deref(), Some("Gazetteer"));
    assert_eq!(rows[0].language.as_deref(), Some("English"));
}

#[test]
fn test_missing_knowledge_store_degrades_to_heuristics() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    write_pdf(&src.path().join("TSR9193.pdf"), "Gazetteer");
    let mut config = test_config(src.path(), work.path());
    config.knowledge_db = Some(work.path().join("missing.sqlite").to_string_lossy().into_owned());

    let summary = LibraryEngine::new(config).build(&SilentReporter).unwrap();
    assert_eq!(summary.copied, 1);
    assert!(work
        .path()
        .join("library")
        .join("Documents")
        .join("PDF")
        .join("TSR9193.pdf")
        .is_file());
}

struct TightMemory;

impl MemoryProbe for TightMemory {
    fn snapshot(&mut self) -> MemorySnapshot {
        MemorySnapshot {
            total_mb: 2048,
            available_mb: 100,
            used_mb: 1948,
            swap_total_mb: 1024,
            swap_used_mb: 800,
            process_rss_mb: Some(50),
        }
    }
}

#[derive(Default)]
struct WorkerLog {
    workers: Mutex<Vec<usize>>,
}

impl ProgressReporter for WorkerLog {
    fn on_batch_start(&self, _batch_index: usize, _batch_len: usize, workers: usize) {
        self.workers.lock().unwrap().push(workers);
    }
}

#[test]
fn test_low_memory_runs_single_worker_and_completes() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    for i in 0..5 {
        write_file(
            &src.path().join(format!("handout_{}.txt", i)),
            format!("handout number {} for the players", i).as_bytes(),
        );
    }
    let config = test_config(src.path(), work.path());
    let resources = ResourceConfig {
        pressure_wait_secs: 0,
        ..ResourceConfig::default()
    };
    let monitor = ResourceMonitor::with_probe(resources, Box::new(TightMemory));

    let log = WorkerLog::default();
    let mut engine = LibraryEngine::new(config).with_monitor(monitor);
    let summary = engine.build(&log).unwrap();

    assert_eq!(summary.copied, 5);
    let workers = log.workers.lock().unwrap();
    assert!(!workers.is_empty());
    assert!(workers.iter().all(|&w| w == 1));
}

#[test]
fn test_library_inside_source_is_not_rescanned() {
    let src = tempdir().unwrap();
    write_file(&src.path().join("rules.txt"), b"roll a d20 and add your modifier");
    let mut config = test_config(src.path(), src.path());
    config.library_root = src.path().join("library").to_string_lossy().into_owned();
    config.staging_dir = src.path().join("staging").to_string_lossy().into_owned();

    let first = LibraryEngine::new(config.clone()).build(&SilentReporter).unwrap();
    let second = LibraryEngine::new(config).build(&SilentReporter).unwrap();
    assert_eq!(first.files_scanned, 1);
    assert_eq!(second.files_scanned, 1);
    assert_eq!(second.copied, 1);
}

#[test]
fn test_scan_only_keeps_staging_file() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    create_collection(src.path());
    let config = test_config(src.path(), work.path());

    let outcome = LibraryEngine::new(config).scan(&SilentReporter).unwrap();
    assert_eq!(outcome.files_staged, 6);
    let staging = StagingFile::open(&outcome.staging_path).unwrap();
    assert_eq!(staging.len(), 6);
    assert!(!work.path().join("library").join(INDEX_FILE_NAME).exists());
}

#[test]
fn test_preflight_rejects_unusable_configuration() {
    let work = tempdir().unwrap();

    let mut config = test_config(&work.path().join("does-not-exist"), work.path());
    let err = LibraryEngine::new(config.clone()).build(&SilentReporter).unwrap_err();
    assert!(matches!(err, Error::Setup(_)));

    config.source_paths = vec![work.path().to_string_lossy().into_owned()];
    config.library_root = String::new();
    let err = LibraryEngine::new(config).preflight().unwrap_err();
    assert!(matches!(err, Error::Setup(_)));
}

#[test]
fn test_overlapping_roots_scan_each_file_once() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    write_file(&src.path().join("a").join("one.txt"), b"first file contents");
    write_file(&src.path().join("a").join("b").join("two.txt"), b"second file contents");
    let mut config = test_config(src.path(), work.path());
    config.source_paths = vec![
        src.path().join("a").join("b").to_string_lossy().into_owned(),
        src.path().join("a").to_string_lossy().into_owned(),
    ];

    let summary = LibraryEngine::new(config).build(&SilentReporter).unwrap();
    assert_eq!(summary.files_scanned, 2);
    assert_eq!(summary.superseded, 0);
}

#[test]
fn test_default_document_settings_accept_valid_pdf() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    write_pdf(&src.path().join("Player Handbook.pdf"), "Player Handbook");
    let config = librarian_core::AppConfig {
        source_paths: vec![src.path().to_string_lossy().into_owned()],
        library_root: work.path().join("library").to_string_lossy().into_owned(),
        staging_dir: work.path().join("staging").to_string_lossy().into_owned(),
        ..Default::default()
    };
    assert!(config.documents.isolate);
    assert!(config.documents.worker_program.is_none());

    let summary = LibraryEngine::new(config).build(&SilentReporter).unwrap();
    assert_eq!(summary.documents_validated, 1);
    assert_eq!(summary.documents_degraded, 0);
    assert_eq!(summary.documents_repaired, 0);
    assert_eq!(summary.issues.counts.get(&IssueKind::StructuralCorruption), None);
    assert_eq!(summary.issues.counts.get(&IssueKind::RepairFailed), None);
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_file_name_reaches_library() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    let raw = src.path().join(OsStr::from_bytes(b"Grimoire \xff.txt"));
    write_file(&raw, b"spells of the lost age, volume one");
    let config = test_config(src.path(), work.path());
    let library = work.path().join("library");

    let summary = LibraryEngine::new(config).build(&SilentReporter).unwrap();
    assert_eq!(summary.files_scanned, 1);
    assert_eq!(summary.copied, 1);
    assert_eq!(summary.failed, 0);
    assert!(library
        .join("Documents")
        .join("Text")
        .join("Grimoire \u{FFFD}.txt")
        .is_file());
}
