use chrono::{DateTime, NaiveDate, Utc};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::JobResult;
use crate::event::TrialEvent;
use crate::models::{LabelCount, TrialLabel, TrialRow, UpsertOutcome};
use crate::preprocess::{self, TryOutBasis};
use crate::source::RecordSource;
use crate::writer::Destination;

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub country: String,
    pub week: NaiveDate,
    pub request_time: DateTime<Utc>,
    pub extracted: usize,
    pub batch: Vec<TrialRow>,
    pub outcome: UpsertOutcome,
}

impl RunReport {
    /// Rows per label, in the fixed label order; labels with no rows are kept.
    pub fn label_counts(&self) -> Vec<LabelCount> {
        TrialLabel::ALL
            .iter()
            .map(|label| LabelCount {
                label: *label,
                count: self
                    .batch
                    .iter()
                    .filter(|row| row.try_out_label == *label)
                    .count(),
            })
            .collect()
    }
}

/// One scheduled run: extract the country's rows, label the target week and
/// upsert the batch. Any failure aborts the run.
pub async fn run_trial<S, D>(
    source: &S,
    destination: &D,
    event: &TrialEvent,
    basis: TryOutBasis,
    now: DateTime<Utc>,
) -> JobResult<RunReport>
where
    S: RecordSource + ?Sized,
    D: Destination + ?Sized,
{
    let country = event.country()?.to_string();
    let week = event.target_week(now.date_naive())?;
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("trial_run", %run_id, %country, %week);

    async move {
        let records = source.fetch(&country).await?;
        tracing::info!(rows = records.len(), "extracted driver weeks");

        let batch = preprocess::build_batch(&records, week, now, basis)?;
        if batch.is_empty() {
            tracing::warn!("no rows for target week, nothing to write");
        } else {
            tracing::info!(rows = batch.len(), "labelled batch");
        }

        let outcome = destination.upsert(&batch).await?;
        tracing::info!(
            replaced = outcome.replaced,
            inserted = outcome.inserted,
            "upserted batch"
        );

        Ok(RunReport {
            run_id,
            country,
            week,
            request_time: now,
            extracted: records.len(),
            batch,
            outcome,
        })
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::models::DriverWeekRecord;
    use crate::writer::merge_by_key;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticSource {
        records: Vec<DriverWeekRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordSource for StaticSource {
        async fn fetch(&self, country: &str) -> JobResult<Vec<DriverWeekRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .records
                .iter()
                .filter(|record| record.country == country)
                .cloned()
                .collect())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RecordSource for FailingSource {
        async fn fetch(&self, _country: &str) -> JobResult<Vec<DriverWeekRecord>> {
            Err(JobError::Extraction(sqlx::Error::RowNotFound))
        }
    }

    #[derive(Default)]
    struct MemoryTable {
        rows: Mutex<Vec<TrialRow>>,
    }

    #[async_trait]
    impl Destination for MemoryTable {
        async fn upsert(&self, batch: &[TrialRow]) -> JobResult<UpsertOutcome> {
            let mut rows = self.rows.lock().unwrap();
            let (merged, outcome) = merge_by_key(std::mem::take(&mut *rows), batch);
            *rows = merged;
            Ok(outcome)
        }
    }

    fn now() -> DateTime<Utc> {
        // Wednesday, so the default target week is Monday 2026-03-02
        Utc.with_ymd_and_hms(2026, 3, 11, 7, 30, 0).unwrap()
    }

    fn record(
        drn: &str,
        moove_week: i64,
        week_date: NaiveDate,
        score: Option<f64>,
    ) -> DriverWeekRecord {
        DriverWeekRecord {
            drn: drn.to_string(),
            moove_week,
            country: "GB".to_string(),
            product: Some("uber".to_string()),
            week_date,
            week_score: score,
            last_week_ago_score: Some(7.0),
            two_weeks_ago_score: Some(7.0),
            asked_remittance: Some(200.0),
            last_week_ago_asked_remittance: Some(200.0),
            two_weeks_ago_asked_remittance: Some(200.0),
            cumulative_outstanding: Some(50.0),
        }
    }

    fn source() -> StaticSource {
        let target = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let previous = NaiveDate::from_ymd_opt(2026, 2, 23).unwrap();
        let mut other_country = record("D-9", 5, target, Some(9.0));
        other_country.country = "KE".to_string();
        StaticSource {
            records: vec![
                record("D-1", 3, previous, Some(7.0)),
                record("D-1", 4, target, Some(7.0)),
                record("D-2", 4, target, Some(5.0)),
                record("D-3", 2, target, None),
                other_country,
            ],
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn labels_default_week_and_writes_batch() {
        let source = source();
        let table = MemoryTable::default();
        let event = TrialEvent::new("GB", None);

        let report = run_trial(&source, &table, &event, TryOutBasis::Window, now())
            .await
            .unwrap();

        assert_eq!(report.week, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(report.extracted, 4);
        assert_eq!(report.outcome, UpsertOutcome { replaced: 0, inserted: 3 });

        let rows = table.rows.lock().unwrap().clone();
        let labels: Vec<(&str, TrialLabel)> = rows
            .iter()
            .map(|row| (row.compound_key.as_str(), row.try_out_label))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("D-1_4", TrialLabel::Qualify),
                ("D-2_4", TrialLabel::ExtendTrial),
                ("D-3_2", TrialLabel::ContinueTrial),
            ]
        );

        let counts = report.label_counts();
        assert_eq!(counts.len(), TrialLabel::ALL.len());
        assert_eq!(counts[1].label, TrialLabel::Qualify);
        assert_eq!(counts[1].count, 1);
    }

    #[tokio::test]
    async fn rerunning_same_week_is_idempotent() {
        let source = source();
        let table = MemoryTable::default();
        let event = TrialEvent::new("GB", Some("2026-03-02".to_string()));

        run_trial(&source, &table, &event, TryOutBasis::Window, now())
            .await
            .unwrap();
        let first = table.rows.lock().unwrap().clone();

        let second = run_trial(&source, &table, &event, TryOutBasis::Window, now())
            .await
            .unwrap();
        assert_eq!(second.outcome.replaced, 3);
        assert_eq!(*table.rows.lock().unwrap(), first);
    }

    #[tokio::test]
    async fn invalid_event_fails_before_extraction() {
        let source = source();
        let table = MemoryTable::default();
        let event = TrialEvent::new("", None);

        let err = run_trial(&source, &table, &event, TryOutBasis::Window, now())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidEvent(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn extraction_failure_skips_write() {
        let table = MemoryTable::default();
        let event = TrialEvent::new("GB", None);

        let err = run_trial(&FailingSource, &table, &event, TryOutBasis::Window, now())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Extraction(_)));
        assert!(table.rows.lock().unwrap().is_empty());
    }
}
