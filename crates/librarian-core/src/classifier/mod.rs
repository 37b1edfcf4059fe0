//! Ordered classification chain backed by the knowledge cache.

pub mod enrich;
pub mod fuzzy;
pub mod knowledge;
pub mod normalize;
pub mod tiers;

use crate::config::ClassifierConfig;
use crate::document::{inspect, TextSampler};
use crate::error::{FileError, IssueKind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub use enrich::{IsbnEnrichmentTier, IsbnResolver, OpenLibraryResolver};
pub use knowledge::{KnowledgeCache, KnowledgeEntry};
pub use normalize::normalize;
pub use tiers::{
    Classification, ClassificationTier, ClassifyInput, ExactCatalogTier, Facet, FuzzyCatalogTier,
    MimeBucketTier, PathKeywordTier, TierOutcome,
};

/// Classification plus which tier produced it and any tier failures.
#[derive(Debug, Clone)]
pub struct ClassifyResult {
    pub classification: Classification,
    /// `None` for the Miscellaneous fallback.
    pub tier: Option<&'static str>,
    pub issues: Vec<FileError>,
}

pub struct Classifier {
    tiers: Vec<Box<dyn ClassificationTier>>,
}

impl Classifier {
    /// Catalog tiers, path heuristics, MIME buckets and, when enabled,
    /// ISBN enrichment, in that order.
    pub fn new(cache: Arc<KnowledgeCache>, config: &ClassifierConfig, sampler: TextSampler) -> Self {
        let mut tiers: Vec<Box<dyn ClassificationTier>> = vec![
            Box::new(ExactCatalogTier::new(cache.clone())),
            Box::new(FuzzyCatalogTier::new(cache.clone(), config.fuzzy_threshold)),
            Box::new(PathKeywordTier::new(cache.clone(), config.fuzzy_threshold)),
            Box::new(MimeBucketTier),
        ];

        if config.isbn_lookup {
            let timeout = Duration::from_secs(config.isbn_timeout_secs.max(1));
            match OpenLibraryResolver::new(&config.isbn_endpoint, timeout) {
                Ok(resolver) => {
                    match IsbnEnrichmentTier::new(cache, Arc::new(resolver), sampler) {
                        Ok(tier) => tiers.push(Box::new(tier)),
                        Err(e) => error!("ISBN enrichment disabled: {}", e),
                    }
                }
                Err(e) => warn!("ISBN enrichment disabled, HTTP client unavailable: {}", e),
            }
        }

        Self { tiers }
    }

    pub fn with_tiers(tiers: Vec<Box<dyn ClassificationTier>>) -> Self {
        Self { tiers }
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Total: always returns a classification.
    pub fn classify(&self, name: &str, path: &Path, mime: &str) -> Classification {
        self.classify_detailed(name, path, mime).classification
    }

    /// First resolved outcome wins; otherwise the first provisional one;
    /// otherwise Miscellaneous.
    pub fn classify_detailed(&self, name: &str, path: &Path, mime: &str) -> ClassifyResult {
        self.classify_document(name, path, mime, None)
    }

    /// As [`Classifier::classify_detailed`], with the validated document
    /// content-based tiers may read.
    pub fn classify_document(
        &self,
        name: &str,
        path: &Path,
        mime: &str,
        text_source: Option<&Path>,
    ) -> ClassifyResult {
        let input = ClassifyInput {
            name,
            path,
            mime,
            text_source,
        };
        let mut provisional: Option<(Classification, &'static str)> = None;
        let mut issues = Vec::new();

        for tier in &self.tiers {
            match tier.classify(&input) {
                Ok(TierOutcome::Resolved(classification)) => {
                    return ClassifyResult {
                        classification,
                        tier: Some(tier.name()),
                        issues,
                    }
                }
                Ok(TierOutcome::Provisional(classification)) => {
                    provisional.get_or_insert((classification, tier.name()));
                }
                Ok(TierOutcome::NoMatch) => {}
                Err(cause) => issues.push(FileError::new(path, IssueKind::EnrichmentFailed, cause)),
            }
        }

        match provisional {
            Some((classification, tier)) => ClassifyResult {
                classification,
                tier: Some(tier),
                issues,
            },
            None => ClassifyResult {
                classification: Classification::miscellaneous(),
                tier: None,
                issues,
            },
        }
    }
}

/// MIME type from the extension, overridden by a `%PDF-` header.
pub fn detect_mime(path: &Path) -> String {
    if matches!(inspect::read_header(path), Ok(Some(_))) {
        return "application/pdf".to_string();
    }
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::knowledge::fixtures::write_catalog;
    use super::*;
    use crate::config::ClassifierConfig;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn catalog_classifier() -> (tempfile::TempDir, Classifier) {
        let tmp = tempdir().unwrap();
        let db = tmp.path().join("knowledge.sqlite");
        write_catalog(&db);
        let cache = Arc::new(KnowledgeCache::load(&db));
        let classifier =
            Classifier::new(cache, &ClassifierConfig::default(), TextSampler::in_process(10));
        (tmp, classifier)
    }

    #[test]
    fn test_exact_product_code_wins() {
        let (_tmp, classifier) = catalog_classifier();
        // The folder names another system; the code in the filename decides.
        let path = PathBuf::from("/rpg/Kult/TSR9193_GAZ1.pdf");
        let result = classifier.classify_detailed("TSR9193_GAZ1.pdf", &path, "application/pdf");
        assert_eq!(result.tier, Some("exact"));
        assert_eq!(result.classification.system, "Dungeons & Dragons");
        assert_eq!(result.classification.edition, Facet::known("BECMI"));
        assert_eq!(result.classification.category, Facet::known("Gazetteer"));
        assert_eq!(result.classification.language, Facet::known("English"));
    }

    #[test]
    fn test_image_without_domain_signal_is_media() {
        let (_tmp, classifier) = catalog_classifier();
        let path = PathBuf::from("/home/user/Pictures/holiday_0042.png");
        let result = classifier.classify_detailed("holiday_0042.png", &path, "image/png");
        assert_eq!(result.tier, Some("mime"));
        assert_eq!(
            result.classification,
            Classification::new("Media", Facet::known("Images"), Facet::Unknown)
        );
    }

    #[test]
    fn test_folder_heuristic_applies_before_mime() {
        let (_tmp, classifier) = catalog_classifier();
        let path = PathBuf::from("/rpg/Kult/handouts/map.jpg");
        let result = classifier.classify_detailed("map.jpg", &path, "image/jpeg");
        assert_eq!(result.tier, Some("path"));
        assert_eq!(result.classification.system, "Kult");
    }

    #[test]
    fn test_classification_is_total() {
        let classifier = Classifier::new(
            Arc::new(KnowledgeCache::empty()),
            &ClassifierConfig::default(),
            TextSampler::in_process(10),
        );
        let c = classifier.classify("", Path::new(""), "");
        assert_eq!(c, Classification::miscellaneous());
        let c = classifier.classify("weird.xyz", Path::new("/x/weird.xyz"), "chemical/x-pdb");
        assert_eq!(c.system, "Miscellaneous");
        let c = classifier.classify("doc.pdf", Path::new("/x/doc.pdf"), "application/pdf");
        assert_eq!(c, Classification::new("Documents", Facet::known("PDF"), Facet::Unknown));
    }

    #[test]
    fn test_later_resolved_tier_beats_provisional() {
        struct Always;
        impl ClassificationTier for Always {
            fn name(&self) -> &'static str {
                "always"
            }
            fn classify(&self, _input: &ClassifyInput) -> Result<TierOutcome, String> {
                Ok(TierOutcome::Resolved(Classification::new(
                    "Refined",
                    Facet::Unknown,
                    Facet::Unknown,
                )))
            }
        }
        let classifier = Classifier::with_tiers(vec![Box::new(MimeBucketTier), Box::new(Always)]);
        let result = classifier.classify_detailed("a.pdf", Path::new("/a.pdf"), "application/pdf");
        assert_eq!(result.tier, Some("always"));
        assert_eq!(result.classification.system, "Refined");
    }

    #[test]
    fn test_detect_mime_sniffs_pdf_header() {
        let tmp = tempdir().unwrap();
        let disguised = tmp.path().join("download.bin");
        fs::write(&disguised, b"%PDF-1.6 body").unwrap();
        let image = tmp.path().join("cover.png");
        fs::write(&image, b"\x89PNG not really").unwrap();

        assert_eq!(detect_mime(&disguised), "application/pdf");
        assert_eq!(detect_mime(&image), "image/png");
        assert_eq!(detect_mime(&tmp.path().join("x.unknownext")), "application/octet-stream");
    }
}
