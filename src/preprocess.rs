use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{JobError, JobResult};
use crate::models::{DriverWeekRecord, TrialRow};
use crate::rules::{self, TrialFacts};

/// Which value feeds the `try_out_score` used by the qualification rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TryOutBasis {
    /// Lower of the rounded median and mean over the three-week score window.
    #[default]
    Window,
    /// The current week's score.
    WeekScore,
}

impl FromStr for TryOutBasis {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "window" => Ok(TryOutBasis::Window),
            "week-score" | "week_score" => Ok(TryOutBasis::WeekScore),
            other => Err(format!(
                "unknown try-out basis `{other}` (expected `window` or `week-score`)"
            )),
        }
    }
}

/// Window aggregates over the present scores of one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TryOutAggregates {
    pub median_try_out: Option<f64>,
    pub mean_try_out: Option<f64>,
}

impl TryOutAggregates {
    pub fn from_record(record: &DriverWeekRecord) -> Self {
        let mut values: Vec<f64> = record.scores().into_iter().flatten().collect();
        Self {
            mean_try_out: mean(&values).map(f64::round_ties_even),
            median_try_out: median(&mut values).map(f64::round_ties_even),
        }
    }

    pub fn minimum(&self) -> Option<f64> {
        match (self.median_try_out, self.mean_try_out) {
            (Some(median), Some(mean)) => Some(median.min(mean)),
            (median, mean) => median.or(mean),
        }
    }
}

pub fn try_out_score(record: &DriverWeekRecord, basis: TryOutBasis) -> Option<f64> {
    match basis {
        TryOutBasis::Window => TryOutAggregates::from_record(record).minimum(),
        TryOutBasis::WeekScore => record.scores()[0],
    }
}

pub fn facts_for(record: &DriverWeekRecord, basis: TryOutBasis) -> TrialFacts {
    TrialFacts {
        moove_week: record.moove_week,
        try_out_score: try_out_score(record, basis),
        week_score: record.week_score,
        last_week_ago_score: record.last_week_ago_score,
        two_weeks_ago_score: record.two_weeks_ago_score,
        cumulative_outstanding: record.cumulative_outstanding,
        asked_remittance: record.asked_remittance,
        last_week_ago_asked_remittance: record.last_week_ago_asked_remittance,
        two_weeks_ago_asked_remittance: record.two_weeks_ago_asked_remittance,
    }
}

/// Labels every extracted row that falls in `week`. All rows share
/// `request_time`; a repeated compound key rejects the whole batch.
pub fn build_batch(
    records: &[DriverWeekRecord],
    week: NaiveDate,
    request_time: DateTime<Utc>,
    basis: TryOutBasis,
) -> JobResult<Vec<TrialRow>> {
    let mut seen = HashSet::new();
    let mut batch = Vec::new();

    for record in records.iter().filter(|record| record.week_date == week) {
        let compound_key = record.compound_key();
        if !seen.insert(compound_key.clone()) {
            return Err(JobError::DuplicateKey(compound_key));
        }

        let facts = facts_for(record, basis);
        batch.push(TrialRow {
            drn: record.drn.clone(),
            moove_week: record.moove_week,
            country: record.country.clone(),
            product: record.product.clone(),
            week_date: record.week_date,
            try_out_label: rules::classify(&facts),
            week_score: record.week_score,
            last_week_ago_score: record.last_week_ago_score,
            two_weeks_ago_score: record.two_weeks_ago_score,
            try_out_score: facts.try_out_score,
            cumulative_outstanding: record.cumulative_outstanding,
            request_time,
            compound_key,
        });
    }

    Ok(batch)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrialLabel;
    use chrono::TimeZone;

    fn week() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn record(drn: &str, moove_week: i64, scores: [Option<f64>; 3]) -> DriverWeekRecord {
        DriverWeekRecord {
            drn: drn.to_string(),
            moove_week,
            country: "GB".to_string(),
            product: Some("uber".to_string()),
            week_date: week(),
            week_score: scores[0],
            last_week_ago_score: scores[1],
            two_weeks_ago_score: scores[2],
            asked_remittance: Some(100.0),
            last_week_ago_asked_remittance: Some(100.0),
            two_weeks_ago_asked_remittance: Some(100.0),
            cumulative_outstanding: Some(20.0),
        }
    }

    #[test]
    fn aggregates_skip_missing_scores() {
        let aggregates =
            TryOutAggregates::from_record(&record("D-1", 5, [Some(7.0), None, Some(4.0)]));
        // median and mean of [7, 4] are both 5.5, which rounds to even
        assert_eq!(aggregates.median_try_out, Some(6.0));
        assert_eq!(aggregates.mean_try_out, Some(6.0));

        let empty = TryOutAggregates::from_record(&record("D-2", 5, [None, None, None]));
        assert_eq!(empty.minimum(), None);
    }

    #[test]
    fn window_basis_takes_lower_aggregate() {
        let row = record("D-1", 5, [Some(9.0), Some(6.0), Some(2.0)]);
        let aggregates = TryOutAggregates::from_record(&row);
        assert_eq!(aggregates.median_try_out, Some(6.0));
        assert_eq!(aggregates.mean_try_out, Some(6.0));

        let skewed = record("D-1", 5, [Some(9.0), Some(8.0), Some(1.0)]);
        // median 8, mean 6
        assert_eq!(try_out_score(&skewed, TryOutBasis::Window), Some(6.0));
        assert_eq!(try_out_score(&skewed, TryOutBasis::WeekScore), Some(9.0));
    }

    #[test]
    fn ties_round_to_even() {
        let row = record("D-1", 5, [Some(6.5), None, None]);
        assert_eq!(try_out_score(&row, TryOutBasis::Window), Some(6.0));
        let row = record("D-1", 5, [Some(7.5), None, None]);
        assert_eq!(try_out_score(&row, TryOutBasis::Window), Some(8.0));
    }

    #[test]
    fn batch_keeps_only_target_week() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 6, 0, 0).unwrap();
        let mut earlier = record("D-1", 3, [Some(7.0), None, None]);
        earlier.week_date = week() - chrono::Duration::days(7);
        let records = vec![
            earlier,
            record("D-1", 4, [Some(7.0), Some(7.0), None]),
            record("D-2", 2, [None, None, None]),
        ];

        let batch = build_batch(&records, week(), now, TryOutBasis::Window).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|row| row.request_time == now));
        assert_eq!(batch[0].compound_key, "D-1_4");
        assert_eq!(batch[0].try_out_label, TrialLabel::Qualify);
        assert_eq!(batch[1].compound_key, "D-2_2");
        assert_eq!(batch[1].try_out_label, TrialLabel::ContinueTrial);
    }

    #[test]
    fn duplicate_keys_reject_batch() {
        let now = Utc::now();
        let records = vec![
            record("D-1", 4, [Some(7.0), None, None]),
            record("D-1", 4, [Some(5.0), None, None]),
        ];
        let err = build_batch(&records, week(), now, TryOutBasis::Window).unwrap_err();
        assert!(matches!(err, JobError::DuplicateKey(key) if key == "D-1_4"));
    }

    #[test]
    fn parses_basis_names() {
        assert_eq!("window".parse::<TryOutBasis>(), Ok(TryOutBasis::Window));
        assert_eq!("Week-Score".parse::<TryOutBasis>(), Ok(TryOutBasis::WeekScore));
        assert!("median".parse::<TryOutBasis>().is_err());
    }
}
