//! Run-scoped issue ledger.
//!
//! Every per-file problem is logged once with its path and cause, counted by
//! kind, and a bounded sample is kept for the end-of-run summary. Identical
//! (kind, path, cause) triples are counted but not re-logged.

use crate::error::{FileError, IssueKind};
use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

const SAMPLES_PER_KIND: usize = 20;

#[derive(Debug, Default)]
pub struct RunReport {
    counts: BTreeMap<IssueKind, usize>,
    samples: BTreeMap<IssueKind, Vec<FileError>>,
    seen: AHashSet<(IssueKind, String, String)>,
    repeats: AHashMap<(IssueKind, String, String), usize>,
}

/// Serializable snapshot of the report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueSummary {
    pub counts: BTreeMap<IssueKind, usize>,
    pub samples: BTreeMap<IssueKind, Vec<(String, String)>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, issue: FileError) {
        *self.counts.entry(issue.kind).or_insert(0) += 1;

        let key = (
            issue.kind,
            issue.path.to_string_lossy().into_owned(),
            issue.cause.clone(),
        );
        if !self.seen.insert(key.clone()) {
            *self.repeats.entry(key).or_insert(1) += 1;
            return;
        }

        match issue.kind {
            IssueKind::Superseded => info!(
                "Superseded duplicate {}: {}",
                issue.path.display(),
                issue.cause
            ),
            kind => warn!("[{}] {}: {}", kind, issue.path.display(), issue.cause),
        }

        let samples = self.samples.entry(issue.kind).or_default();
        if samples.len() < SAMPLES_PER_KIND {
            samples.push(issue);
        }
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn samples(&self, kind: IssueKind) -> &[FileError] {
        self.samples.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn summary(&self) -> IssueSummary {
        IssueSummary {
            counts: self.counts.clone(),
            samples: self
                .samples
                .iter()
                .map(|(kind, list)| {
                    let pairs = list
                        .iter()
                        .map(|e| (e.path.to_string_lossy().into_owned(), e.cause.clone()))
                        .collect();
                    (*kind, pairs)
                })
                .collect(),
        }
    }

    /// Log per-kind totals and the most frequently repeated issues.
    pub fn log_summary(&self) {
        if self.counts.is_empty() {
            info!("No errors or warnings logged.");
            return;
        }
        for (kind, count) in &self.counts {
            info!("{}: {} occurrences", kind, count);
        }

        let mut frequent: Vec<_> = self.repeats.iter().collect();
        frequent.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for ((kind, path, cause), count) in frequent.into_iter().take(5) {
            info!("Most frequent: {} ({}) {} | {}", kind, count, path, cause);
        }
    }
}
