/// Trait for reporting build progress.
///
/// CLI implements with indicatif; library callers can use [`SilentReporter`].
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_progress(&self, _files_found: usize, _current_path: &str) {}
    fn on_scan_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_batch_start(&self, _batch_index: usize, _batch_len: usize, _workers: usize) {}
    fn on_batch_complete(&self, _files_done: usize, _total_files: usize) {}
    fn on_analysis_complete(&self, _unique_files: usize, _duration_secs: f64) {}
    fn on_copy_start(&self, _total: usize) {}
    fn on_copy_progress(&self, _copied: usize, _total: usize) {}
    fn on_copy_complete(&self, _copied: usize, _failed: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
