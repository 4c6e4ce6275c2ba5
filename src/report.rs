use std::collections::BTreeMap;
use std::fmt::Write;

use crate::job::RunReport;
use crate::models::{TrialLabel, TrialRow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSummary {
    pub product: String,
    pub drivers: usize,
    pub qualified: usize,
}

pub fn summarize_by_product(batch: &[TrialRow]) -> Vec<ProductSummary> {
    let mut map: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    for row in batch {
        let entry = map
            .entry(row.product.as_deref().unwrap_or("unknown"))
            .or_insert((0, 0));
        entry.0 += 1;
        if row.try_out_label == TrialLabel::Qualify {
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<ProductSummary> = map
        .into_iter()
        .map(|(product, (drivers, qualified))| ProductSummary {
            product: product.to_string(),
            drivers,
            qualified,
        })
        .collect();

    summaries.sort_by(|a, b| b.drivers.cmp(&a.drivers));
    summaries
}

pub fn build_report(report: &RunReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Four Week Trial Report");
    let _ = writeln!(
        output,
        "Generated for {} (week of {}, run {} at {})",
        report.country,
        report.week,
        report.run_id,
        report.request_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(
        output,
        "{} extracted rows, {} labelled, {} replaced in destination",
        report.extracted,
        report.batch.len(),
        report.outcome.replaced
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Label Mix");

    if report.batch.is_empty() {
        let _ = writeln!(output, "No drivers scored for this week.");
    } else {
        for count in report.label_counts() {
            let _ = writeln!(output, "- {}: {}", count.label, count.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Products");

    let products = summarize_by_product(&report.batch);
    if products.is_empty() {
        let _ = writeln!(output, "No drivers scored for this week.");
    } else {
        for summary in products.iter() {
            let _ = writeln!(
                output,
                "- {}: {} drivers, {} qualified",
                summary.product, summary.drivers, summary.qualified
            );
        }
    }

    let mut follow_up: Vec<&TrialRow> = report
        .batch
        .iter()
        .filter(|row| {
            matches!(
                row.try_out_label,
                TrialLabel::ExtendTrial | TrialLabel::NoDataForThreeWeeks
            )
        })
        .collect();
    follow_up.sort_by(|a, b| b.moove_week.cmp(&a.moove_week).then(a.drn.cmp(&b.drn)));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Follow-up");

    if follow_up.is_empty() {
        let _ = writeln!(output, "No extended or silent drivers this week.");
    } else {
        for row in follow_up.iter().take(20) {
            let _ = writeln!(
                output,
                "- {} (week {}): {}, outstanding {}",
                row.drn,
                row.moove_week,
                row.try_out_label,
                format_amount(row.cumulative_outstanding)
            );
        }
    }

    output
}

fn format_amount(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.2}"),
        None => "n/a".to_string(),
    }
}
