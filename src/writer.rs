use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{JobError, JobResult};
use crate::models::{TrialRow, UpsertOutcome};

/// A reporting table keyed by `compound_key`. Rows of the batch replace any
/// stored row with the same key; everything else is appended.
#[async_trait]
pub trait Destination {
    async fn upsert(&self, batch: &[TrialRow]) -> JobResult<UpsertOutcome>;
}

/// Replace-if-exists, insert-otherwise over an in-memory table. Stored rows
/// keep their order; batch rows are appended after them.
pub fn merge_by_key(
    existing: Vec<TrialRow>,
    batch: &[TrialRow],
) -> (Vec<TrialRow>, UpsertOutcome) {
    let incoming: HashSet<&str> = batch
        .iter()
        .map(|row| row.compound_key.as_str())
        .collect();
    let before = existing.len();
    let mut merged: Vec<TrialRow> = existing
        .into_iter()
        .filter(|row| !incoming.contains(row.compound_key.as_str()))
        .collect();
    let replaced = before - merged.len();
    merged.extend_from_slice(batch);

    let outcome = UpsertOutcome {
        replaced,
        inserted: batch.len(),
    };
    (merged, outcome)
}

/// Keeps the reporting table in a CSV file. The merged table is written to
/// a sibling file and renamed over the original.
#[derive(Debug, Clone)]
pub struct CsvDestination {
    path: PathBuf,
}

impl CsvDestination {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&self) -> JobResult<Vec<TrialRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader =
            csv::Reader::from_path(&self.path).map_err(|source| self.csv_error(source))?;
        reader
            .deserialize()
            .collect::<Result<Vec<TrialRow>, _>>()
            .map_err(|source| self.csv_error(source))
    }

    fn write_all(&self, rows: &[TrialRow]) -> JobResult<()> {
        let staging = self.path.with_extension("csv.tmp");
        let mut writer =
            csv::Writer::from_path(&staging).map_err(|source| self.csv_error(source))?;
        for row in rows {
            writer.serialize(row).map_err(|source| self.csv_error(source))?;
        }
        writer.flush().map_err(|source| self.io_error(source))?;
        drop(writer);
        std::fs::rename(&staging, &self.path).map_err(|source| self.io_error(source))
    }

    fn csv_error(&self, source: csv::Error) -> JobError {
        JobError::Csv {
            path: self.path.clone(),
            source,
        }
    }

    fn io_error(&self, source: std::io::Error) -> JobError {
        JobError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl Destination for CsvDestination {
    async fn upsert(&self, batch: &[TrialRow]) -> JobResult<UpsertOutcome> {
        if batch.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let (merged, outcome) = merge_by_key(self.read_all()?, batch);
        self.write_all(&merged)?;
        Ok(outcome)
    }
}
