//! Per-window summary CSV
//!
//! A flat projection of [`ActivitySummary`] values: fixed leading columns,
//! then a `.num`/`.dur` pair for every on/off metric and for total sync time.
//! Durations are in milliseconds.

use crate::summary::{ActivitySummary, BoolMetric};
use crate::types::Dist;
use std::fmt::Write as _;

const LEADING_COLUMNS: [&str; 7] = [
    "start_ms",
    "end_ms",
    "reason",
    "active",
    "initial_battery_level",
    "final_battery_level",
    "date",
];

const TOTAL_SYNC: &str = "TotalSyncSummary";

/// Header row of the summary CSV
pub fn summary_csv_header() -> String {
    let mut columns: Vec<String> = LEADING_COLUMNS.iter().map(|c| c.to_string()).collect();
    let names = BoolMetric::ALL
        .iter()
        .map(|m| m.summary_name())
        .chain(std::iter::once(TOTAL_SYNC));
    for name in names {
        columns.push(format!("{}.num", name));
        columns.push(format!("{}.dur", name));
    }
    columns.join(",")
}

fn push_dist(row: &mut String, dist: Dist) {
    let _ = write!(row, ",{},{}", dist.num, dist.total_ms);
}

/// One CSV row for `summary`, without trailing newline
pub fn summary_csv_row(summary: &ActivitySummary) -> String {
    let mut row = format!(
        "{},{},{},{},{},{},{}",
        summary.start_ms,
        summary.end_ms,
        summary.reason.map(|r| r.to_string()).unwrap_or_default(),
        summary.active,
        summary.initial_battery_level,
        summary.final_battery_level,
        summary.date
    );
    for metric in BoolMetric::ALL {
        push_dist(&mut row, summary.bool_dist(metric));
    }
    push_dist(&mut row, summary.total_sync);
    row
}

/// Header and one row per window
pub fn summary_csv(summaries: &[ActivitySummary]) -> String {
    let mut out = summary_csv_header();
    out.push('\n');
    for summary in summaries {
        out.push_str(&summary_csv_row(summary));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryFormat;
    use crate::summary::CloseReason;

    #[test]
    fn test_columns_line_up() {
        let header = summary_csv_header();
        assert!(header.starts_with("start_ms,end_ms,reason,active,"));
        assert!(header.contains(",ScreenOnSummary.num,ScreenOnSummary.dur,"));
        assert!(header.ends_with("TotalSyncSummary.num,TotalSyncSummary.dur"));

        let summary = ActivitySummary::new(SummaryFormat::BatteryLevel);
        let row = summary_csv_row(&summary);
        assert_eq!(row.split(',').count(), header.split(',').count());
    }

    #[test]
    fn test_row_values() {
        let mut summary = ActivitySummary::new(SummaryFormat::BatteryLevel);
        summary.start_ms = 1000;
        summary.end_ms = 5000;
        summary.reason = Some(CloseReason::Level);
        summary.initial_battery_level = 80;
        summary.final_battery_level = 79;
        summary.bool_dist_mut(BoolMetric::CpuRunning).add(1500);

        let row = summary_csv_row(&summary);
        assert!(row.starts_with("1000,5000,LEVEL,true,80,79,,1,1500,0,0"));

        let csv = summary_csv(&[summary]);
        assert_eq!(csv.lines().count(), 2);
    }
}
