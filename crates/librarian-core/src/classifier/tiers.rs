use super::fuzzy::best_match;
use super::knowledge::{KnowledgeCache, KnowledgeEntry};
use super::normalize::normalize;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

const MIN_FUZZY_LEN: usize = 4;

/// A classification facet that is either known or explicitly unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Facet {
    Known(String),
    Unknown,
}

impl Facet {
    pub fn known(value: impl Into<String>) -> Self {
        Self::Known(value.into())
    }

    pub fn from_option(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Self::Known(v.to_string()),
            _ => Self::Unknown,
        }
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => f.write_str(v),
            Self::Unknown => f.write_str("-"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Classification {
    pub system: String,
    pub edition: Facet,
    pub category: Facet,
    pub language: Facet,
}

impl Classification {
    pub fn new(system: impl Into<String>, edition: Facet, category: Facet) -> Self {
        Self {
            system: system.into(),
            edition,
            category,
            language: Facet::Unknown,
        }
    }

    pub fn miscellaneous() -> Self {
        Self::new("Miscellaneous", Facet::Unknown, Facet::Unknown)
    }

    pub fn from_entry(entry: &KnowledgeEntry) -> Self {
        Self {
            system: entry.system.clone(),
            edition: Facet::from_option(entry.edition.as_deref()),
            category: Facet::from_option(entry.category.as_deref()),
            language: Facet::from_option(entry.language.as_deref()),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} / {}", self.system, self.edition, self.category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    Resolved(Classification),
    /// A coarse answer a later tier may still improve on.
    Provisional(Classification),
    NoMatch,
}

pub struct ClassifyInput<'a> {
    pub name: &'a str,
    pub path: &'a Path,
    pub mime: &'a str,
    /// Validated copy of a document whose text may be read; `None` for
    /// documents that failed or skipped validation.
    pub text_source: Option<&'a Path>,
}

/// One stage of the classification chain. Implementations must not mutate
/// shared state; `Err` means the tier itself failed and is treated as no match.
pub trait ClassificationTier: Send + Sync {
    fn name(&self) -> &'static str;
    fn classify(&self, input: &ClassifyInput) -> Result<TierOutcome, String>;
}

fn normalized_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    normalize(&stem)
}

/// Catalog code or title contained in the filename, longest key first.
pub struct ExactCatalogTier {
    cache: Arc<KnowledgeCache>,
}

impl ExactCatalogTier {
    pub fn new(cache: Arc<KnowledgeCache>) -> Self {
        Self { cache }
    }
}

impl ClassificationTier for ExactCatalogTier {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn classify(&self, input: &ClassifyInput) -> Result<TierOutcome, String> {
        let stem = normalized_stem(input.name);
        if stem.is_empty() {
            return Ok(TierOutcome::NoMatch);
        }
        Ok(self
            .cache
            .keys()
            .find(|(key, _)| stem.contains(key))
            .map(|(_, entry)| TierOutcome::Resolved(Classification::from_entry(entry)))
            .unwrap_or(TierOutcome::NoMatch))
    }
}

pub struct FuzzyCatalogTier {
    cache: Arc<KnowledgeCache>,
    threshold: f64,
}

impl FuzzyCatalogTier {
    pub fn new(cache: Arc<KnowledgeCache>, threshold: f64) -> Self {
        Self { cache, threshold }
    }
}

impl ClassificationTier for FuzzyCatalogTier {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn classify(&self, input: &ClassifyInput) -> Result<TierOutcome, String> {
        let stem = normalized_stem(input.name);
        if stem.len() < MIN_FUZZY_LEN {
            return Ok(TierOutcome::NoMatch);
        }
        let candidates = self
            .cache
            .keys()
            .filter(|(key, _)| key.len() >= MIN_FUZZY_LEN);
        Ok(match best_match(&stem, candidates, self.threshold) {
            Some((entry, _)) => TierOutcome::Resolved(Classification::from_entry(entry)),
            None => TierOutcome::NoMatch,
        })
    }
}

/// Parent directory names, nearest first, against system/edition keywords.
pub struct PathKeywordTier {
    cache: Arc<KnowledgeCache>,
    threshold: f64,
}

impl PathKeywordTier {
    pub fn new(cache: Arc<KnowledgeCache>, threshold: f64) -> Self {
        Self { cache, threshold }
    }

    fn heuristic(system: &str) -> TierOutcome {
        TierOutcome::Resolved(Classification::new(
            system,
            Facet::known("From Folder"),
            Facet::known("Heuristic"),
        ))
    }
}

impl ClassificationTier for PathKeywordTier {
    fn name(&self) -> &'static str {
        "path"
    }

    fn classify(&self, input: &ClassifyInput) -> Result<TierOutcome, String> {
        let segments: Vec<String> = input
            .path
            .parent()
            .map(|p| {
                p.iter()
                    .rev()
                    .map(|s| normalize(&s.to_string_lossy()))
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        for segment in &segments {
            if let Some(system) = self.cache.keyword(segment) {
                return Ok(Self::heuristic(system));
            }
        }
        for segment in segments.iter().filter(|s| s.len() >= MIN_FUZZY_LEN) {
            let candidates = self
                .cache
                .keywords()
                .filter(|(key, _)| key.len() >= MIN_FUZZY_LEN);
            if let Some((system, _)) = best_match(segment, candidates, self.threshold) {
                return Ok(Self::heuristic(system));
            }
        }
        Ok(TierOutcome::NoMatch)
    }
}

/// Coarse buckets by MIME type. Document and text buckets are provisional.
pub struct MimeBucketTier;

impl MimeBucketTier {
    pub fn bucket(mime: &str) -> TierOutcome {
        let mime = mime.to_ascii_lowercase();
        let major = mime.split('/').next().unwrap_or("");
        let resolved = |system: &str, edition: Facet| {
            TierOutcome::Resolved(Classification::new(system, edition, Facet::Unknown))
        };
        let provisional = |edition: &str| {
            TierOutcome::Provisional(Classification::new(
                "Documents",
                Facet::known(edition),
                Facet::Unknown,
            ))
        };

        match major {
            "video" => return resolved("Media", Facet::known("Video")),
            "audio" => return resolved("Media", Facet::known("Audio")),
            "image" => return resolved("Media", Facet::known("Images")),
            _ => {}
        }
        if ["zip", "rar", "7z", "x-tar", "gzip"]
            .iter()
            .any(|needle| mime.contains(needle))
        {
            return resolved("Archives", Facet::Unknown);
        }
        if mime.contains("pdf") {
            return provisional("PDF");
        }
        if ["msword", "officedocument", "opendocument"]
            .iter()
            .any(|needle| mime.contains(needle))
        {
            return provisional("Office");
        }
        if major == "text" {
            return provisional("Text");
        }
        if major == "application" {
            return resolved("Software & Data", Facet::Unknown);
        }
        TierOutcome::NoMatch
    }
}

impl ClassificationTier for MimeBucketTier {
    fn name(&self) -> &'static str {
        "mime"
    }

    fn classify(&self, input: &ClassifyInput) -> Result<TierOutcome, String> {
        Ok(Self::bucket(input.mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cache() -> Arc<KnowledgeCache> {
        Arc::new(KnowledgeCache::from_entries(vec![
            KnowledgeEntry {
                product_code: Some("TSR9193".to_string()),
                title: "The Grand Duchy of Karameikos".to_string(),
                system: "Dungeons & Dragons".to_string(),
                edition: Some("BECMI".to_string()),
                category: Some("Gazetteer".to_string()),
                language: None,
            },
            KnowledgeEntry {
                product_code: Some("TSR919".to_string()),
                title: "Some Other Module".to_string(),
                system: "Wrong System".to_string(),
                edition: None,
                category: None,
                language: None,
            },
            KnowledgeEntry {
                product_code: None,
                title: "Masks of Nyarlathotep".to_string(),
                system: "Call of Cthulhu".to_string(),
                edition: Some("7th Edition".to_string()),
                category: Some("Campaign".to_string()),
                language: None,
            },
        ]))
    }

    fn input<'a>(name: &'a str, path: &'a Path, mime: &'a str) -> ClassifyInput<'a> {
        ClassifyInput {
            name,
            path,
            mime,
            text_source: None,
        }
    }

    #[test]
    fn test_exact_prefers_longest_key() {
        let tier = ExactCatalogTier::new(cache());
        let path = PathBuf::from("/src/TSR9193_GAZ1.pdf");
        let outcome = tier
            .classify(&input("TSR9193_GAZ1.pdf", &path, "application/pdf"))
            .unwrap();
        let TierOutcome::Resolved(c) = outcome else {
            panic!("expected resolved, got {:?}", outcome);
        };
        assert_eq!(c.system, "Dungeons & Dragons");
        assert_eq!(c.edition, Facet::known("BECMI"));
        assert_eq!(c.category, Facet::known("Gazetteer"));
    }

    #[test]
    fn test_fuzzy_tolerates_misspelling() {
        let tier = FuzzyCatalogTier::new(cache(), 0.9);
        let path = PathBuf::from("/src/Masks of Nyarlathotap (scan).pdf");
        let outcome = tier
            .classify(&input("Masks of Nyarlathotap (scan).pdf", &path, "application/pdf"))
            .unwrap();
        let TierOutcome::Resolved(c) = outcome else {
            panic!("expected resolved, got {:?}", outcome);
        };
        assert_eq!(c.system, "Call of Cthulhu");
    }

    #[test]
    fn test_path_tier_uses_nearest_folder() {
        let tier = PathKeywordTier::new(cache(), 0.9);
        let path = PathBuf::from("/rpg/Call of Cthulhu/7th Edition/handout.pdf");
        let outcome = tier
            .classify(&input("handout.pdf", &path, "application/pdf"))
            .unwrap();
        assert_eq!(
            outcome,
            TierOutcome::Resolved(Classification::new(
                "Call of Cthulhu",
                Facet::known("From Folder"),
                Facet::known("Heuristic"),
            ))
        );
    }

    #[test]
    fn test_path_tier_no_signal() {
        let tier = PathKeywordTier::new(cache(), 0.9);
        let path = PathBuf::from("/home/user/Pictures/cat.png");
        assert_eq!(
            tier.classify(&input("cat.png", &path, "image/png")).unwrap(),
            TierOutcome::NoMatch
        );
    }

    #[test]
    fn test_mime_buckets() {
        let media = |edition: &str| {
            TierOutcome::Resolved(Classification::new(
                "Media",
                Facet::known(edition),
                Facet::Unknown,
            ))
        };
        assert_eq!(MimeBucketTier::bucket("image/png"), media("Images"));
        assert_eq!(MimeBucketTier::bucket("video/mp4"), media("Video"));
        assert_eq!(MimeBucketTier::bucket("audio/mpeg"), media("Audio"));
        assert!(matches!(
            MimeBucketTier::bucket("application/zip"),
            TierOutcome::Resolved(ref c) if c.system == "Archives"
        ));
        assert!(matches!(
            MimeBucketTier::bucket("application/pdf"),
            TierOutcome::Provisional(ref c) if c.edition == Facet::known("PDF")
        ));
        assert!(matches!(
            MimeBucketTier::bucket(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            TierOutcome::Provisional(ref c) if c.edition == Facet::known("Office")
        ));
        assert!(matches!(
            MimeBucketTier::bucket("application/octet-stream"),
            TierOutcome::Resolved(ref c) if c.system == "Software & Data"
        ));
        assert_eq!(MimeBucketTier::bucket(""), TierOutcome::NoMatch);
    }
}
