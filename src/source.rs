use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{JobError, JobResult};
use crate::models::DriverWeekRecord;

/// Yields the extracted (driver, week) rows for one country, with the
/// lagged history columns already filled in.
#[async_trait]
pub trait RecordSource {
    async fn fetch(&self, country: &str) -> JobResult<Vec<DriverWeekRecord>>;
}

/// A CSV export of the extraction query, one header per query column.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RecordSource for CsvSource {
    async fn fetch(&self, country: &str) -> JobResult<Vec<DriverWeekRecord>> {
        let csv_error = |source| JobError::Csv {
            path: self.path.clone(),
            source,
        };
        let mut reader = csv::Reader::from_path(&self.path).map_err(csv_error)?;
        let mut records = Vec::new();

        for result in reader.deserialize::<DriverWeekRecord>() {
            let record = result.map_err(csv_error)?;
            if record.country == country {
                records.push(record);
            }
        }

        tracing::debug!(path = %self.path.display(), rows = records.len(), "read extract");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTRACT: &str = concat!(
        "drn,moove_week,country,product,week_date,",
        "score,last_week_ago_score,two_weeks_ago_score,",
        "asked_remittance,last_week_ago_asked_remittance,two_weeks_ago_asked_remittance,",
        "cumulative_outstanding\n",
        "D-1,4,GB,uber,2026-03-02,7.5,6.0,,120.0,110.0,,15.0\n",
        "D-2,1,GB,,2026-03-02,,,,,,,0.0\n",
        "D-3,6,KE,bolt,2026-03-02,8.0,8.0,8.0,50.0,50.0,50.0,1.0\n",
    );

    #[tokio::test]
    async fn reads_rows_for_country() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extract.csv");
        std::fs::write(&path, EXTRACT).unwrap();

        let records = CsvSource::new(&path).fetch("GB").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].drn, "D-1");
        assert_eq!(records[0].week_score, Some(7.5));
        assert_eq!(records[0].two_weeks_ago_score, None);
        assert_eq!(records[0].two_weeks_ago_asked_remittance, None);
        assert_eq!(records[1].product, None);
        assert_eq!(records[1].cumulative_outstanding, Some(0.0));
    }

    #[tokio::test]
    async fn missing_file_is_csv_error() {
        let err = CsvSource::new("/nonexistent/extract.csv")
            .fetch("GB")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Csv { .. }));
    }
}
