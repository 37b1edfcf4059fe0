//! Streaming content-hash deduplication.
//!
//! Only the `hash -> best candidate` table is kept across batches, so memory
//! grows with the number of distinct hashes rather than total files.

use crate::classifier::Classification;
use crate::scanner::FileRecord;
use ahash::{AHashMap, AHashSet};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Per-file analysis attached to a [`FileRecord`] for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub content_hash: String,
    pub mime_type: String,
    pub document_valid: bool,
    pub has_text: bool,
    pub classification: Classification,
    pub quality_score: u8,
    /// Accepted repair output, when the original failed validation.
    pub repaired_path: Option<PathBuf>,
    pub degraded: bool,
}

impl AnalysisResult {
    /// The bytes that should land in the library.
    pub fn copy_source<'a>(&'a self, record: &'a FileRecord) -> &'a Path {
        self.repaired_path.as_deref().unwrap_or(&record.path)
    }
}

/// Text (+4), structurally valid (+2), larger than the size threshold (+1).
pub fn quality_score(has_text: bool, document_valid: bool, size: u64, size_threshold: u64) -> u8 {
    let mut score = 0;
    if has_text {
        score += 4;
    }
    if document_valid {
        score += 2;
    }
    if size > size_threshold {
        score += 1;
    }
    score
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: FileRecord,
    pub analysis: AnalysisResult,
}

impl Candidate {
    /// Total order: score, then size, then shorter path, then smaller path.
    /// `Greater` means `self` should be kept.
    fn rank(&self, other: &Candidate) -> Ordering {
        self.analysis
            .quality_score
            .cmp(&other.analysis.quality_score)
            .then_with(|| self.record.size.cmp(&other.record.size))
            .then_with(|| {
                other
                    .record
                    .path
                    .as_os_str()
                    .len()
                    .cmp(&self.record.path.as_os_str().len())
            })
            .then_with(|| other.record.path.cmp(&self.record.path))
    }
}

#[derive(Debug, Clone)]
pub struct Admission {
    /// The admitted record is now the winner for its hash.
    pub accepted: bool,
    /// The record that lost the contest, if there was one.
    pub superseded: Option<FileRecord>,
    /// Winner for the hash after this admission.
    pub winner_path: PathBuf,
}

/// A surviving record with its final, collision-free filename.
#[derive(Debug, Clone)]
pub struct DedupWinner {
    pub record: FileRecord,
    pub analysis: AnalysisResult,
    pub file_name: String,
}

#[derive(Debug, Default)]
pub struct Deduplicator {
    best: AHashMap<String, Candidate>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, record: FileRecord, analysis: AnalysisResult) -> Admission {
        let incoming = Candidate { record, analysis };
        match self.best.get_mut(&incoming.analysis.content_hash) {
            None => {
                let winner_path = incoming.record.path.clone();
                self.best
                    .insert(incoming.analysis.content_hash.clone(), incoming);
                Admission {
                    accepted: true,
                    superseded: None,
                    winner_path,
                }
            }
            Some(current) => {
                if incoming.rank(current) == Ordering::Greater {
                    let loser = std::mem::replace(current, incoming);
                    Admission {
                        accepted: true,
                        superseded: Some(loser.record),
                        winner_path: current.record.path.clone(),
                    }
                } else {
                    Admission {
                        accepted: false,
                        winner_path: current.record.path.clone(),
                        superseded: Some(incoming.record),
                    }
                }
            }
        }
    }

    /// Number of distinct hashes seen.
    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }

    /// Winners in discovery order. Repeated filenames get `stem_N.ext`, numbered
    /// in that same order.
    pub fn into_winners(self) -> Vec<DedupWinner> {
        let mut candidates: Vec<Candidate> = self.best.into_values().collect();
        candidates.sort_by_key(|c| c.record.seq);

        let mut occurrences: AHashMap<String, usize> = AHashMap::new();
        let mut taken: AHashSet<String> = AHashSet::new();
        candidates
            .into_iter()
            .map(|candidate| {
                let file_name = unique_name(&candidate.record.name, &mut occurrences, &mut taken);
                DedupWinner {
                    record: candidate.record,
                    analysis: candidate.analysis,
                    file_name,
                }
            })
            .collect()
    }
}

fn unique_name(
    name: &str,
    occurrences: &mut AHashMap<String, usize>,
    taken: &mut AHashSet<String>,
) -> String {
    let key = name.to_lowercase();
    let count = occurrences.entry(key.clone()).or_insert(0);
    let mut candidate = if *count == 0 {
        name.to_string()
    } else {
        with_ordinal(name, *count)
    };
    *count += 1;
    // A generated name may clash with a real file already called `stem_N.ext`.
    while !taken.insert(candidate.to_lowercase()) {
        candidate = with_ordinal(name, *count);
        *count += 1;
    }
    candidate
}

fn with_ordinal(name: &str, ordinal: usize) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, ordinal, ext.to_string_lossy()),
        None => format!("{}_{}", stem, ordinal),
    }
}
