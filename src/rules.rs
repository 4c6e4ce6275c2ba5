use crate::models::{present, TrialLabel};

pub const PASSING_SCORE: f64 = 6.0;
pub const OUTSTANDING_RATIO: f64 = 0.35;
pub const DECISION_WEEK: i64 = 4;
pub const NO_DATA_WEEK: i64 = 6;

/// The fields the qualification rule looks at for one driver week.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrialFacts {
    pub moove_week: i64,
    pub try_out_score: Option<f64>,
    pub week_score: Option<f64>,
    pub last_week_ago_score: Option<f64>,
    pub two_weeks_ago_score: Option<f64>,
    pub cumulative_outstanding: Option<f64>,
    pub asked_remittance: Option<f64>,
    pub last_week_ago_asked_remittance: Option<f64>,
    pub two_weeks_ago_asked_remittance: Option<f64>,
}

/// Classifies a driver week. Rules are checked in order and the first match
/// wins; any comparison with a missing operand is false.
pub fn classify(facts: &TrialFacts) -> TrialLabel {
    let week = facts.moove_week;
    let try_out = present(facts.try_out_score);
    let current = present(facts.week_score);
    let last = present(facts.last_week_ago_score);
    let two_ago = present(facts.two_weeks_ago_score);
    let outstanding = present(facts.cumulative_outstanding);

    if week < DECISION_WEEK {
        return TrialLabel::ContinueTrial;
    }

    let three_week_remittance = sum(&[
        facts.asked_remittance,
        facts.last_week_ago_asked_remittance,
        facts.two_weeks_ago_asked_remittance,
    ]);
    if passes(try_out) && passes(current) && within_ratio(outstanding, three_week_remittance) {
        return TrialLabel::Qualify;
    }

    if week == DECISION_WEEK && fails(current) && passes(last) && passes(two_ago) {
        return TrialLabel::ExtendTrial;
    }

    if week == DECISION_WEEK && (current.is_none() || last.is_none() || two_ago.is_none()) {
        return TrialLabel::ExtendTrial;
    }

    let prior_remittance = sum(&[
        facts.last_week_ago_asked_remittance,
        facts.two_weeks_ago_asked_remittance,
    ]);
    if current.is_none()
        && week >= NO_DATA_WEEK
        && passes(try_out)
        && within_ratio(outstanding, prior_remittance)
    {
        return TrialLabel::Qualify;
    }

    if current.is_none() && last.is_none() && two_ago.is_none() && week >= NO_DATA_WEEK {
        return TrialLabel::NoDataForThreeWeeks;
    }

    TrialLabel::DoesNotQualify
}

fn passes(score: Option<f64>) -> bool {
    matches!(score, Some(value) if value >= PASSING_SCORE)
}

fn fails(score: Option<f64>) -> bool {
    matches!(score, Some(value) if value < PASSING_SCORE)
}

fn within_ratio(outstanding: Option<f64>, remittance: Option<f64>) -> bool {
    match (outstanding, remittance) {
        (Some(outstanding), Some(remittance)) => outstanding < OUTSTANDING_RATIO * remittance,
        _ => false,
    }
}

fn sum(terms: &[Option<f64>]) -> Option<f64> {
    terms
        .iter()
        .try_fold(0.0, |total, term| present(*term).map(|value| total + value))
}
