//! Read-only product catalog loaded into memory once per run.

use super::normalize::normalize;
use ahash::AHashMap;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use tracing::{info, warn};

const MIN_EXACT_KEY_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeEntry {
    pub product_code: Option<String>,
    pub title: String,
    pub system: String,
    pub edition: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
}

/// Exact-match keys (codes and titles) and path keywords (systems and
/// editions), all normalized. Immutable after construction.
#[derive(Debug, Default)]
pub struct KnowledgeCache {
    entries: Vec<KnowledgeEntry>,
    /// Longest key first.
    keys: Vec<(String, usize)>,
    key_index: AHashMap<String, usize>,
    /// Longest keyword first; maps to a system name.
    keywords: Vec<(String, String)>,
    keyword_index: AHashMap<String, String>,
}

impl KnowledgeCache {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the catalog, or return an empty cache with a warning when it is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            warn!(
                "Knowledge store {} not found; classification limited to path and type heuristics",
                path.display()
            );
            return Self::empty();
        }
        match Self::try_load(path) {
            Ok(cache) => {
                info!(
                    "Loaded {} catalog entries ({} keys, {} keywords) from {}",
                    cache.entries.len(),
                    cache.keys.len(),
                    cache.keywords.len(),
                    path.display()
                );
                cache
            }
            Err(e) => {
                warn!("Knowledge store {} unreadable: {}", path.display(), e);
                Self::empty()
            }
        }
    }

    pub fn try_load(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let language_column = if has_column(&conn, "products", "language")? {
            "language"
        } else {
            "NULL"
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT product_code, title, game_system, edition, category, {}
             FROM products
             WHERE game_system IS NOT NULL AND game_system != ''",
            language_column
        ))?;
        let mut entries = stmt
            .query_map([], |row| {
                Ok(KnowledgeEntry {
                    product_code: row.get(0)?,
                    title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    system: row.get(2)?,
                    edition: row.get(3)?,
                    category: row.get(4)?,
                    language: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if has_table(&conn, "alternate_titles")? {
            let mut stmt = conn.prepare(
                "SELECT alt_title, product_code, game_system, edition, category
                 FROM alternate_titles
                 WHERE game_system IS NOT NULL AND game_system != ''",
            )?;
            let alternates = stmt
                .query_map([], |row| {
                    Ok(KnowledgeEntry {
                        title: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        product_code: row.get(1)?,
                        system: row.get(2)?,
                        edition: row.get(3)?,
                        category: row.get(4)?,
                        language: None,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            entries.extend(alternates);
        }

        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<KnowledgeEntry>) -> Self {
        let mut key_index: AHashMap<String, usize> = AHashMap::new();
        let mut keyword_index: AHashMap<String, String> = AHashMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            let code = entry.product_code.as_deref().map(normalize);
            for key in code.into_iter().chain(std::iter::once(normalize(&entry.title))) {
                if key.len() >= MIN_EXACT_KEY_LEN {
                    key_index.entry(key).or_insert(idx);
                }
            }

            let system_key = normalize(&entry.system);
            if !system_key.is_empty() {
                keyword_index
                    .entry(system_key)
                    .or_insert_with(|| entry.system.clone());
            }
            if let Some(edition) = entry.edition.as_deref() {
                let edition_key = normalize(edition);
                if !edition_key.is_empty() {
                    keyword_index
                        .entry(edition_key)
                        .or_insert_with(|| entry.system.clone());
                }
            }
        }

        let mut keys: Vec<(String, usize)> =
            key_index.iter().map(|(k, v)| (k.clone(), *v)).collect();
        keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        let mut keywords: Vec<(String, String)> = keyword_index
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        keywords.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            entries,
            keys,
            key_index,
            keywords,
            keyword_index,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Normalized keys with their entries, longest first.
    pub fn keys(&self) -> impl Iterator<Item = (&str, &KnowledgeEntry)> {
        self.keys
            .iter()
            .map(move |(k, idx)| (k.as_str(), &self.entries[*idx]))
    }

    /// Entry whose normalized code or title equals `key`.
    pub fn lookup(&self, key: &str) -> Option<&KnowledgeEntry> {
        self.key_index.get(key).map(|idx| &self.entries[*idx])
    }

    /// Normalized system/edition keywords with their system, longest first.
    pub fn keywords(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keywords.iter().map(|(k, s)| (k.as_str(), s.as_str()))
    }

    pub fn keyword(&self, key: &str) -> Option<&str> {
        self.keyword_index.get(key).map(String::as_str)
    }
}

fn has_table(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|n| n == column))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rusqlite::Connection;
    use std::path::Path;

    /// Small catalog in the layout the scraper produces.
    pub fn write_catalog(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE products (
                 product_code TEXT, title TEXT, game_system TEXT,
                 edition TEXT, category TEXT, source_url TEXT, language TEXT
             );
             INSERT INTO products VALUES
                 ('TSR9193', 'GAZ1 The Grand Duchy of Karameikos', 'Dungeons & Dragons',
                  'BECMI', 'Gazetteer', 'https://example.invalid/gaz1', 'English'),
                 ('TSR2100', 'Player''s Handbook', 'Advanced Dungeons & Dragons',
                  '2nd Edition', 'Core Rules', NULL, 'English'),
                 ('CB7060', 'Kult Divinity Lost', 'Kult',
                  'Divinity Lost', 'Core Rules', NULL, NULL),
                 (NULL, 'Aventurische Götter', 'Das Schwarze Auge',
                  '5. Edition', 'Regionalband', NULL, 'German');
             CREATE TABLE alternate_titles (
                 alt_title TEXT, product_code TEXT, game_system TEXT,
                 edition TEXT, category TEXT
             );
             INSERT INTO alternate_titles VALUES
                 ('Karameikos Gazetteer', 'TSR9193', 'Dungeons & Dragons', 'BECMI', 'Gazetteer');",
        )
        .unwrap();
    }
}
