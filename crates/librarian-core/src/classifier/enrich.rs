//! Content-based enrichment: ISBNs found in document text, resolved to a
//! title through an external reference lookup.

use super::knowledge::KnowledgeCache;
use super::normalize::normalize;
use super::tiers::{Classification, ClassificationTier, ClassifyInput, Facet, TierOutcome};
use crate::document::TextSampler;
use dashmap::DashMap;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const ISBN_PATTERN: &str =
    r"\b(?:ISBN(?:-1[03])?:?\s*)?((?:97[89][- ]?)?\d{1,5}[- ]?\d{1,7}[- ]?\d{1,7}[- ]?[\dXx])\b";
const TEXT_SAMPLE_BYTES: u64 = 64 * 1024;
const MAX_CANDIDATES: usize = 3;

/// Resolves an ISBN to a title. `Ok(None)` means the lookup succeeded but
/// knew nothing about it.
pub trait IsbnResolver: Send + Sync {
    fn resolve(&self, isbn: &str) -> Result<Option<String>, String>;
}

/// Open Library books API, with a per-run cache shared across workers.
pub struct OpenLibraryResolver {
    client: reqwest::blocking::Client,
    endpoint: String,
    cache: DashMap<String, Option<String>>,
}

impl OpenLibraryResolver {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("librarian/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            cache: DashMap::new(),
        })
    }

    fn fetch(&self, isbn: &str) -> Result<Option<String>, String> {
        let url = format!(
            "{}?bibkeys=ISBN:{}&format=json&jscmd=data",
            self.endpoint, isbn
        );
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| format!("ISBN lookup for {} failed: {}", isbn, e))?;

        Ok(body
            .get(format!("ISBN:{}", isbn))
            .and_then(|book| book.get("title"))
            .and_then(|title| title.as_str())
            .map(str::to_string))
    }
}

impl IsbnResolver for OpenLibraryResolver {
    fn resolve(&self, isbn: &str) -> Result<Option<String>, String> {
        if let Some(hit) = self.cache.get(isbn) {
            return Ok(hit.clone());
        }
        let title = self.fetch(isbn)?;
        self.cache.insert(isbn.to_string(), title.clone());
        Ok(title)
    }
}

/// Checksum-valid ISBNs in `text`, separators removed, first-seen order.
pub fn find_isbns(pattern: &Regex, text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for caps in pattern.captures_iter(text) {
        let Some(raw) = caps.get(1) else { continue };
        let digits: String = raw
            .as_str()
            .chars()
            .filter(|c| !matches!(c, '-' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if is_valid_isbn(&digits) && !found.contains(&digits) {
            found.push(digits);
        }
    }
    found
}

pub fn is_valid_isbn(isbn: &str) -> bool {
    let chars: Vec<char> = isbn.chars().collect();
    match chars.len() {
        10 => {
            let mut sum = 0u32;
            for (i, c) in chars.iter().enumerate() {
                let value = match (c, i) {
                    ('X', 9) => 10,
                    (c, _) => match c.to_digit(10) {
                        Some(d) => d,
                        None => return false,
                    },
                };
                sum += value * (10 - i as u32);
            }
            sum % 11 == 0
        }
        13 => {
            let mut sum = 0u32;
            for (i, c) in chars.iter().enumerate() {
                let Some(d) = c.to_digit(10) else {
                    return false;
                };
                sum += if i % 2 == 0 { d } else { d * 3 };
            }
            sum % 10 == 0
        }
        _ => false,
    }
}

/// Runs only for plain text files and validated PDFs that no earlier tier
/// resolved.
pub struct IsbnEnrichmentTier {
    cache: Arc<KnowledgeCache>,
    resolver: Arc<dyn IsbnResolver>,
    pattern: Regex,
    sampler: TextSampler,
}

impl IsbnEnrichmentTier {
    pub fn new(
        cache: Arc<KnowledgeCache>,
        resolver: Arc<dyn IsbnResolver>,
        sampler: TextSampler,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            cache,
            resolver,
            pattern: Regex::new(ISBN_PATTERN)?,
            sampler,
        })
    }

    fn text_sample(&self, input: &ClassifyInput) -> Result<String, String> {
        if input.mime.starts_with("application/pdf") {
            return match input.text_source {
                Some(source) => self.sampler.sample(source),
                None => Err("document not validated".to_string()),
            };
        }
        let mut buf = Vec::new();
        File::open(input.path)
            .and_then(|f| f.take(TEXT_SAMPLE_BYTES).read_to_end(&mut buf))
            .map_err(|e| e.to_string())?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl ClassificationTier for IsbnEnrichmentTier {
    fn name(&self) -> &'static str {
        "isbn"
    }

    fn classify(&self, input: &ClassifyInput) -> Result<TierOutcome, String> {
        if !(input.mime.starts_with("application/pdf") || input.mime.starts_with("text/")) {
            return Ok(TierOutcome::NoMatch);
        }
        // Image-only documents simply have nothing to scan.
        let text = match self.text_sample(input) {
            Ok(text) => text,
            Err(cause) => {
                debug!("No text to scan in {}: {}", input.path.display(), cause);
                return Ok(TierOutcome::NoMatch);
            }
        };

        let mut last_error = None;
        for isbn in find_isbns(&self.pattern, &text).into_iter().take(MAX_CANDIDATES) {
            match self.resolver.resolve(&isbn) {
                Ok(Some(title)) => {
                    debug!("ISBN {} in {} resolved to '{}'", isbn, input.path.display(), title);
                    if let Some(entry) = self.cache.lookup(&normalize(&title)) {
                        return Ok(TierOutcome::Resolved(Classification::from_entry(entry)));
                    }
                    return Ok(TierOutcome::Resolved(Classification::new(
                        title,
                        Facet::Unknown,
                        Facet::known("ISBN/Book"),
                    )));
                }
                Ok(None) => continue,
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(TierOutcome::NoMatch),
        }
    }
}
