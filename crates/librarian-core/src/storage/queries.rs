use super::models::IndexRecord;
use super::sqlite::Database;
use rusqlite::{params, Result, Row};
use tracing::debug;

const SELECT_COLUMNS: &str = "filename, path, mime_type, size, game_system, edition, category, \
     language, hash, source_path, quality_score, repaired, indexed_at";

fn row_to_record(row: &Row) -> Result<IndexRecord> {
    Ok(IndexRecord {
        filename: row.get(0)?,
        path: row.get(1)?,
        mime_type: row.get(2)?,
        size: row.get(3)?,
        game_system: row.get(4)?,
        edition: row.get(5)?,
        category: row.get(6)?,
        language: row.get(7)?,
        hash: row.get(8)?,
        source_path: row.get(9)?,
        quality_score: row.get(10)?,
        repaired: row.get(11)?,
        indexed_at: row.get(12)?,
    })
}

impl Database {
    // ── Writes ───────────────────────────────────────────────────

    pub fn insert_index_record(&self, record: &IndexRecord) -> Result<()> {
        self.connection().execute(
            "INSERT INTO files (filename, path, mime_type, size, game_system, edition, \
             category, language, hash, source_path, quality_score, repaired, indexed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.filename,
                record.path,
                record.mime_type,
                record.size,
                record.game_system,
                record.edition,
                record.category,
                record.language,
                record.hash,
                record.source_path,
                record.quality_score,
                record.repaired,
                record.indexed_at,
            ],
        )?;
        Ok(())
    }

    /// Insert a batch in one transaction. A failing row does not abort the
    /// others; its position and error are returned. `Err` means the
    /// transaction itself failed and nothing from this batch was written.
    pub fn insert_index_batch(
        &self,
        records: &[IndexRecord],
    ) -> Result<Vec<(usize, rusqlite::Error)>> {
        let tx = self.connection().unchecked_transaction()?;
        let mut failures = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if let Err(e) = self.insert_index_record(record) {
                failures.push((i, e));
            }
        }
        tx.commit()?;
        debug!(
            "Committed {} index records ({} rejected)",
            records.len() - failures.len(),
            failures.len()
        );
        Ok(failures)
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn count_files(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
    }

    pub fn find_by_hash(&self, hash: &str) -> Result<Option<IndexRecord>> {
        match self.connection().query_row(
            &format!("SELECT {} FROM files WHERE hash = ?1", SELECT_COLUMNS),
            params![hash],
            row_to_record,
        ) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn files_by_system(&self, game_system: &str) -> Result<Vec<IndexRecord>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM files WHERE game_system = ?1 ORDER BY path",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![game_system], row_to_record)?;
        rows.collect()
    }

    pub fn all_files(&self) -> Result<Vec<IndexRecord>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("SELECT {} FROM files ORDER BY path", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], row_to_record)?;
        rows.collect()
    }

    /// `(game_system, file count)` ordered by count, largest first.
    pub fn system_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.connection().prepare(
            "SELECT game_system, COUNT(*) AS n FROM files \
             GROUP BY game_system ORDER BY n DESC, game_system",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }
}
