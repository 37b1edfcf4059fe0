pub mod classifier;
pub mod config;
pub mod dedup;
pub mod document;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod index_builder;
pub mod progress;
pub mod report;
pub mod resources;
pub mod scanner;
pub mod storage;

pub use config::AppConfig;
pub use engine::{LibraryEngine, RunSummary, ScanOutcome};
pub use error::{Error, FileError, IssueKind};
pub use progress::{ProgressReporter, SilentReporter};
pub use report::{IssueSummary, RunReport};
pub use resources::ResourceMonitor;
