use chrono::{Datelike, Duration, NaiveDate};
use serde::Deserialize;

use crate::error::{JobError, JobResult};

/// Trigger payload: `{"country": "GB", "week": "2026-03-02"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrialEvent {
    pub country: String,
    #[serde(default)]
    pub week: Option<String>,
}

impl TrialEvent {
    pub fn new(country: impl Into<String>, week: Option<String>) -> Self {
        Self {
            country: country.into(),
            week,
        }
    }

    pub fn from_json(payload: &str) -> JobResult<Self> {
        serde_json::from_str(payload).map_err(|err| JobError::InvalidEvent(err.to_string()))
    }

    /// The country filter, matched exactly against the scoring input.
    pub fn country(&self) -> JobResult<&str> {
        let country = self.country.as_str();
        if country.trim().is_empty() {
            return Err(JobError::InvalidEvent("country must not be blank".to_string()));
        }
        if country.trim() != country {
            return Err(JobError::InvalidEvent(format!(
                "country `{country}` has surrounding whitespace"
            )));
        }
        Ok(country)
    }

    /// The week to evaluate: the explicit `week`, or the Monday of the
    /// previous calendar week relative to `today`.
    pub fn target_week(&self, today: NaiveDate) -> JobResult<NaiveDate> {
        match self.week.as_deref().map(str::trim).filter(|week| !week.is_empty()) {
            Some(week) => NaiveDate::parse_from_str(week, "%Y-%m-%d").map_err(|err| {
                JobError::InvalidEvent(format!("week `{week}` is not YYYY-MM-DD: {err}"))
            }),
            None => Ok(previous_week_start(today)),
        }
    }
}

pub fn previous_week_start(today: NaiveDate) -> NaiveDate {
    let days_since_monday = i64::from(today.weekday().num_days_from_monday());
    today - Duration::days(days_since_monday + 7)
}
