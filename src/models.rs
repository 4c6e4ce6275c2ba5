use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One extracted (driver, week) row, carrying the score and remittance
/// history the warehouse query lags over the previous two weeks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverWeekRecord {
    pub drn: String,
    pub moove_week: i64,
    pub country: String,
    pub product: Option<String>,
    pub week_date: NaiveDate,
    #[serde(rename = "score")]
    pub week_score: Option<f64>,
    pub last_week_ago_score: Option<f64>,
    pub two_weeks_ago_score: Option<f64>,
    pub asked_remittance: Option<f64>,
    pub last_week_ago_asked_remittance: Option<f64>,
    pub two_weeks_ago_asked_remittance: Option<f64>,
    pub cumulative_outstanding: Option<f64>,
}

impl DriverWeekRecord {
    pub fn compound_key(&self) -> String {
        compound_key(&self.drn, self.moove_week)
    }

    /// The score family in window order: current, one week ago, two weeks ago.
    pub fn scores(&self) -> [Option<f64>; 3] {
        [
            present(self.week_score),
            present(self.last_week_ago_score),
            present(self.two_weeks_ago_score),
        ]
    }
}

pub fn compound_key(drn: &str, moove_week: i64) -> String {
    format!("{drn}_{moove_week}")
}

/// Treats NaN as a missing value, the way warehouse exports encode nulls.
pub fn present(value: Option<f64>) -> Option<f64> {
    value.filter(|v| !v.is_nan())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrialLabel {
    #[serde(rename = "Continue Trial")]
    ContinueTrial,
    #[serde(rename = "Qualify")]
    Qualify,
    #[serde(rename = "Extend trial")]
    ExtendTrial,
    #[serde(rename = "No data for 3 weeks")]
    NoDataForThreeWeeks,
    #[serde(rename = "Does not Qualify")]
    DoesNotQualify,
}

impl TrialLabel {
    pub const ALL: [TrialLabel; 5] = [
        TrialLabel::ContinueTrial,
        TrialLabel::Qualify,
        TrialLabel::ExtendTrial,
        TrialLabel::NoDataForThreeWeeks,
        TrialLabel::DoesNotQualify,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrialLabel::ContinueTrial => "Continue Trial",
            TrialLabel::Qualify => "Qualify",
            TrialLabel::ExtendTrial => "Extend trial",
            TrialLabel::NoDataForThreeWeeks => "No data for 3 weeks",
            TrialLabel::DoesNotQualify => "Does not Qualify",
        }
    }
}

impl fmt::Display for TrialLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A labelled row as written to the reporting table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRow {
    pub drn: String,
    pub moove_week: i64,
    pub country: String,
    pub product: Option<String>,
    pub week_date: NaiveDate,
    pub try_out_label: TrialLabel,
    pub week_score: Option<f64>,
    pub last_week_ago_score: Option<f64>,
    pub two_weeks_ago_score: Option<f64>,
    pub try_out_score: Option<f64>,
    pub cumulative_outstanding: Option<f64>,
    pub request_time: DateTime<Utc>,
    pub compound_key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub replaced: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone)]
pub struct LabelCount {
    pub label: TrialLabel,
    pub count: usize,
}
