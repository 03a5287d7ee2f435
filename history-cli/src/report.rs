//! Report generation
//!
//! Renders an [`AnalysisReport`] as plain text (one block per window) or JSON.

use anyhow::Result;
use history_analyzer::human_readable::format_delta;
use history_analyzer::{
    ActivitySummary, AnalysisReport, BoolMetric, Dist, ServiceMetric, ValueMetric,
};
use std::collections::BTreeMap;
use std::fmt::Write as _;

const RULE: &str = "═══════════════════════════════════════════════";

/// Per-entity tables, in print order
const TABLES: [Table; 15] = [
    Table::Value(ValueMetric::DataConnection),
    Table::Service(ServiceMetric::Connectivity),
    Table::Service(ServiceMetric::WakeLock),
    Table::Service(ServiceMetric::LongWakeLock),
    Table::Service(ServiceMetric::TopApplication),
    Table::Service(ServiceMetric::Sync),
    Table::Service(ServiceMetric::WakeupReason),
    Table::Service(ServiceMetric::ForegroundProcess),
    Table::Value(ValueMetric::Health),
    Table::Value(ValueMetric::PlugType),
    Table::Value(ValueMetric::ChargingStatus),
    Table::Value(ValueMetric::PhoneState),
    Table::Value(ValueMetric::DozeMode),
    Table::Service(ServiceMetric::ActiveProcess),
    Table::Service(ServiceMetric::ScheduledJob),
];

#[derive(Clone, Copy)]
enum Table {
    Value(ValueMetric),
    Service(ServiceMetric),
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Value(m) => m.summary_name(),
            Table::Service(m) => m.summary_name(),
        }
    }

    fn dists(self, summary: &ActivitySummary) -> Option<&BTreeMap<String, Dist>> {
        match self {
            Table::Value(m) => summary.value_dists(m),
            Table::Service(m) => summary.service_dists(m),
        }
    }
}

/// `1h02m03s004ms` style duration
fn duration(ms: i64) -> String {
    match format_delta(ms) {
        Some(d) => d.trim_start_matches('+').to_string(),
        None => format!("{}ms", ms),
    }
}

fn write_dist(out: &mut String, label: &str, dist: Dist, window_ms: i64) {
    let (count_rate, secs_rate) = dist.rates_per_hour(window_ms);
    let _ = writeln!(
        out,
        "{:>40} => Rate (per hr): ({:5.2} , {:10.2} secs)\tTotal: ({:5}, {:>16}, {:>16})",
        label,
        count_rate,
        secs_rate,
        dist.num,
        duration(dist.total_ms),
        duration(dist.max_ms)
    );
}

/// Entries sorted by total duration, then count, largest first
fn sorted_entries(dists: &BTreeMap<String, Dist>) -> Vec<(&String, Dist)> {
    let mut entries: Vec<(&String, Dist)> = dists.iter().map(|(k, v)| (k, *v)).collect();
    entries.sort_by(|a, b| (b.1.total_ms, b.1.num).cmp(&(a.1.total_ms, a.1.num)));
    entries
}

fn write_table(out: &mut String, name: &str, dists: &BTreeMap<String, Dist>, window_ms: i64) {
    let entries: Vec<_> = sorted_entries(dists)
        .into_iter()
        .filter(|(_, d)| d.total_ms > 0)
        .collect();
    if entries.is_empty() {
        return;
    }
    let _ = writeln!(out, "{}\n---------------------", name);
    for (entity, dist) in entries {
        write_dist(out, entity, dist, window_ms);
    }
    out.push('\n');
}

/// Text block for one window
pub fn render_window(index: usize, summary: &ActivitySummary) -> String {
    let mut out = String::new();
    let window_ms = summary.duration_ms();

    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(
        out,
        "  Window {}: {} - {} ({})",
        index,
        summary.start_ms,
        summary.end_ms,
        summary.reason.map(|r| r.to_string()).unwrap_or_default()
    );
    let _ = writeln!(out, "{}\n", RULE);
    let _ = writeln!(out, "Date: {}", summary.date);
    let _ = writeln!(out, "Duration: {}", duration(window_ms));

    let drop = summary.initial_battery_level - summary.final_battery_level;
    let _ = writeln!(
        out,
        "Battery level: {} -> {} = {}",
        summary.initial_battery_level, summary.final_battery_level, drop
    );
    if window_ms > 0 {
        let per_hour = f64::from(drop) / (window_ms as f64 / 3_600_000.0);
        let _ = writeln!(out, "Drop rate per hour: {:.2} pct/hr", per_hour);
    }
    out.push('\n');

    for metric in BoolMetric::ALL {
        let dist = summary.bool_dist(metric);
        if !dist.is_empty() {
            write_dist(&mut out, metric.summary_name(), dist, window_ms);
        }
    }
    out.push('\n');

    for table in TABLES {
        if let Some(dists) = table.dists(summary) {
            write_table(&mut out, table.name(), dists, window_ms);
        }
    }
    let _ = writeln!(
        out,
        "TotalSyncTime: {}, TotalSyncNum: {}",
        duration(summary.total_sync.total_ms),
        summary.total_sync.num
    );

    if !summary.power_state_summary.is_empty() {
        let _ = writeln!(out, "\nLow power states\n---------------------");
        for state in summary.power_state_summary.values() {
            let _ = writeln!(
                out,
                "{:>40} => time: {:>16}, count: {}",
                state.name,
                duration(state.time_ms),
                state.count
            );
        }
    }
    if !summary.dcpu.is_empty() || !summary.dpst.is_empty() {
        let _ = writeln!(
            out,
            "\nCPU step records: {} Dcpu, {} Dpst",
            summary.dcpu.len(),
            summary.dpst.len()
        );
    }
    out
}

/// Full text report: every window, then the collected errors
pub fn render_text(report: &AnalysisReport) -> String {
    let mut out = String::new();
    if let Some(version) = report.device_version {
        let _ = writeln!(out, "Checkin version: {}", version);
    }
    if report.timestamps_altered {
        let _ = writeln!(out, "Note: TIME values were corrected during normalization");
    }
    if let Some(at) = report.overflow_ms {
        let _ = writeln!(out, "Note: history overflowed at {}", at);
    }
    if report.summaries.is_empty() {
        let _ = writeln!(out, "No activity windows found");
    }

    for (i, summary) in report.summaries.iter().enumerate() {
        out.push('\n');
        out.push_str(&render_window(i + 1, summary));
    }

    if report.has_errors() {
        let _ = writeln!(out, "\nErrors ({})\n---------------------", report.errors.len());
        for err in &report.errors {
            let _ = writeln!(out, "{}", err);
        }
    }
    out
}

pub fn render_json(report: &AnalysisReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_analyzer::{analyze_history, AnalyzerConfig};

    #[test]
    fn test_sorted_by_total_then_count() {
        let mut dists = BTreeMap::new();
        dists.insert("a".to_string(), Dist { num: 1, total_ms: 100, max_ms: 100 });
        dists.insert("b".to_string(), Dist { num: 3, total_ms: 500, max_ms: 200 });
        dists.insert("c".to_string(), Dist { num: 5, total_ms: 100, max_ms: 40 });

        let names: Vec<&str> = sorted_entries(&dists).iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_duration_format() {
        assert_eq!(duration(0), "0");
        assert_eq!(duration(2356), "2s356ms");
        assert_eq!(duration(3_600_000), "1h00m00s000ms");
    }

    #[test]
    fn test_render_text() {
        let report = analyze_history(
            "9,hsp,1,10005,\"*alarm*\"\n9,h,0:RESET:TIME:1422620451417\n9,h,0,Bl=80\n9,h,1000,+S,+w=1\n9,h,2000,-S,-w\n9,h,600000,+Zz",
            AnalyzerConfig::new(),
        );
        let text = render_text(&report);

        assert!(text.contains("Window 1: 1422620451417 - 1422621054417 (END)"));
        assert!(text.contains("Date: 2015-01-30"));
        assert!(text.contains("ScreenOnSummary => Rate (per hr)"));
        assert!(text.contains("WakeLockSummary\n---------------------"));
        assert!(text.contains("*alarm* => Rate (per hr)"));
        assert!(text.contains("Errors (1)"));
        assert!(!text.contains("PerAppSyncSummary"));
    }

    #[test]
    fn test_render_json() {
        let report = analyze_history("9,h,0:RESET:TIME:1000\n9,h,1000,+S\n9,h,1000,-S", AnalyzerConfig::new());
        let json: serde_json::Value = serde_json::from_str(&render_json(&report).unwrap()).unwrap();
        assert_eq!(json["summaries"][0]["start_ms"], 1000);
        assert_eq!(json["timestamps_altered"], false);
    }
}
