use serde::Serialize;

/// One row of the output index: a copied dedup winner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexRecord {
    pub filename: String,
    /// Destination path inside the library.
    pub path: String,
    pub mime_type: String,
    pub size: i64,
    pub game_system: String,
    pub edition: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    /// Content hash of the source file.
    pub hash: String,
    pub source_path: String,
    pub quality_score: i64,
    /// The copied bytes are an accepted repair, not the source file.
    pub repaired: bool,
    pub indexed_at: String,
}
