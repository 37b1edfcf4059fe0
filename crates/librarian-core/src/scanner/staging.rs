//! On-disk staging of scan results.
//!
//! The scan writes one CSV row per [`FileRecord`] so that discovery never
//! holds the whole tree in memory; the pipeline then reads the file back in
//! fixed-size batches.

use super::FileRecord;
use crate::error::Error;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct StagingWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    flush_every: usize,
    pending: usize,
    written: usize,
}

impl StagingWriter {
    pub fn create(path: &Path, flush_every: usize) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let writer = csv::Writer::from_path(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            flush_every: flush_every.max(1),
            pending: 0,
            written: 0,
        })
    }

    pub fn append(&mut self, record: &FileRecord) -> Result<(), Error> {
        self.writer.serialize(record)?;
        self.pending += 1;
        self.written += 1;
        if self.pending >= self.flush_every {
            self.writer.flush()?;
            self.pending = 0;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<StagingFile, Error> {
        self.writer.flush()?;
        debug!("Staging file {} holds {} records", self.path.display(), self.written);
        Ok(StagingFile {
            path: self.path,
            len: self.written,
        })
    }
}

/// A completed staging file. Batches can be re-read any number of times.
#[derive(Debug, Clone)]
pub struct StagingFile {
    path: PathBuf,
    len: usize,
}

impl StagingFile {
    /// Re-open an existing staging file, counting its rows.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut len = 0;
        for row in reader.records() {
            row?;
            len += 1;
        }
        Ok(Self {
            path: path.to_path_buf(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn batches(&self, batch_size: usize) -> Result<StagingBatches, Error> {
        let reader = csv::Reader::from_path(&self.path)?;
        Ok(StagingBatches {
            rows: reader.into_deserialize(),
            batch_size: batch_size.max(1),
            failed: false,
        })
    }
}

/// Lazily reads consecutive batches of records. Stops after the first error.
pub struct StagingBatches {
    rows: csv::DeserializeRecordsIntoIter<File, FileRecord>,
    batch_size: usize,
    failed: bool,
}

impl Iterator for StagingBatches {
    type Item = Result<Vec<FileRecord>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.rows.next() {
                Some(Ok(record)) => batch.push(record),
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e.into()));
                }
                None => break,
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}
