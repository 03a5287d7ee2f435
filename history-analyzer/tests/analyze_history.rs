//! End-to-end tests: raw history text in, windows/timeline/errors out

use history_analyzer::{
    AnalysisReport, Analyzer, AnalyzerConfig, AnalyzerError, BoolMetric, CloseReason, CsvTimeline,
    Dist, ServiceMetric, SummaryFormat, TokenError, ValueMetric,
};

const RESET: &str = "9,h,0:RESET:TIME:1000000";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn history(lines: &[&str]) -> String {
    lines.join("\n")
}

fn analyze_with(lines: &[&str], config: AnalyzerConfig) -> (AnalysisReport, CsvTimeline) {
    init_logging();
    let mut timeline = CsvTimeline::new();
    let report = Analyzer::new()
        .with_config(config)
        .analyze(&history(lines), &mut timeline);
    (report, timeline)
}

fn analyze(lines: &[&str]) -> AnalysisReport {
    analyze_with(lines, AnalyzerConfig::new()).0
}

fn token_errors(report: &AnalysisReport) -> Vec<TokenError> {
    report
        .errors
        .iter()
        .filter_map(|e| match e {
            AnalyzerError::Token { source, .. } => Some(source.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn screen_on_interval_is_counted_once() {
    let report = analyze(&["9,h,0:RESET:TIME:1422620451417", "9,h,1000,+S", "9,h,2000,-S"]);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.summaries.len(), 1);
    assert_eq!(
        report.summaries[0].bool_dist(BoolMetric::Screen),
        Dist { num: 1, total_ms: 2000, max_ms: 2000 }
    );
    assert_eq!(report.summaries[0].reason, Some(CloseReason::End));
}

#[test]
fn back_to_back_resets_emit_nothing() {
    let report = analyze(&["9,h,0:RESET:TIME:1000", "9,h,0:RESET:TIME:2000"]);
    assert!(report.summaries.is_empty());
}

#[test]
fn level_change_closes_exactly_one_window() {
    let report = analyze(&["9,h,0:RESET:TIME:1422620451417", "9,h,500,Bl=80", "9,h,500,Bl=79"]);

    assert_eq!(report.summaries.len(), 1);
    let window = &report.summaries[0];
    assert_eq!(window.reason, Some(CloseReason::Level));
    assert_eq!(window.initial_battery_level, 80);
    assert_eq!(window.final_battery_level, 79);
    assert_eq!(window.end_ms - window.start_ms, 1000);
}

#[test]
fn total_time_format_ignores_level_changes() {
    let (report, _) = analyze_with(
        &[RESET, "9,h,500,Bl=80", "9,h,500,Bl=79", "9,h,500,Bl=78"],
        AnalyzerConfig::new().with_summary_format(SummaryFormat::TotalTime),
    );
    assert_eq!(report.summaries.len(), 1);
    assert_eq!(report.summaries[0].initial_battery_level, 80);
    assert_eq!(report.summaries[0].final_battery_level, 78);
}

#[test]
fn overflow_keeps_trailing_level_reading() {
    let (report, timeline) = analyze_with(
        &[
            RESET,
            "9,h,500,Bl=80",
            "9,h,500:*OVERFLOW*",
            "9,h,1000,Bl=80",
            "9,h,2000,Bl=79",
            "9,h,3000,+S",
        ],
        AnalyzerConfig::new(),
    );

    assert_eq!(report.overflow_ms, Some(1_001_000));
    assert_eq!(report.summaries.len(), 1);
    assert_eq!(report.summaries[0].end_ms, 1_001_000);

    let rows: Vec<String> = timeline.entries().iter().map(|e| e.to_csv_row()).collect();
    assert_eq!(
        rows,
        vec!["level,int,1000500,1004000,80,", "level,int,1004000,1007000,79,"]
    );
}

#[test]
fn unknown_key_does_not_stop_the_line() {
    let report = analyze(&[RESET, "9,h,1000,+S,+Zz,+g", "9,h,1000,-S,-g"]);

    assert_eq!(token_errors(&report), vec![TokenError::UnknownKey("Zz".into())]);
    let window = &report.summaries[0];
    assert_eq!(window.bool_dist(BoolMetric::Screen).total_ms, 1000);
    assert_eq!(window.bool_dist(BoolMetric::Gps).total_ms, 1000);
}

#[test]
fn second_negative_edge_is_an_error() {
    let report = analyze(&[RESET, "9,h,1000,-S", "9,h,1000,-S"]);

    assert_eq!(token_errors(&report), vec![TokenError::TwoNegative("Screen")]);
    assert_eq!(
        report.summaries[0].bool_dist(BoolMetric::Screen),
        Dist { num: 1, total_ms: 1000, max_ms: 1000 }
    );
}

#[test]
fn single_holder_wakelock() {
    let report = analyze(&[
        r#"9,hsp,1,10005,"*alarm*""#,
        RESET,
        "9,h,1000,+w=1",
        "9,h,3000,-w",
        "9,h,1000,+w",
    ]);

    let window = &report.summaries[0];
    assert_eq!(
        window.service_dist(ServiceMetric::WakeLock, "*alarm*"),
        Dist { num: 1, total_ms: 3000, max_ms: 3000 }
    );
    // An anonymous holder in the middle of a window cannot be attributed
    assert_eq!(token_errors(&report), vec![TokenError::WakelockMidWindow]);
}

#[test]
fn wakelock_in_replaces_single_holder() {
    let report = analyze(&[
        r#"9,hsp,1,10005,"*alarm*""#,
        r#"9,hsp,2,10010,"GCM_CONN""#,
        RESET,
        "9,h,1000,+Ewl=2",
        "9,h,500,+w=1",
        "9,h,1500,-Ewl=2,-w",
    ]);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let window = &report.summaries[0];
    assert_eq!(window.service_dist(ServiceMetric::WakeLock, "GCM_CONN").total_ms, 2000);
    assert!(window.service_dist(ServiceMetric::WakeLock, "*alarm*").is_empty());
}

#[test]
fn wakeup_reason_is_cut_short_by_a_wakelock() {
    let report = analyze(&[
        r#"9,hsp,2,0,"Abort:Pending Wakeup Sources""#,
        r#"9,hsp,3,1000,"*alarm*""#,
        RESET,
        "9,h,1000,+r,wr=2",
        "9,h,500,+w=3",
        "9,h,1500,-r,-w",
    ]);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let window = &report.summaries[0];
    assert_eq!(window.bool_dist(BoolMetric::CpuRunning).total_ms, 2000);
    assert_eq!(
        window.service_dist(ServiceMetric::WakeupReason, "Abort:Pending Wakeup Sources"),
        Dist { num: 1, total_ms: 500, max_ms: 500 }
    );
    assert_eq!(window.service_dist(ServiceMetric::WakeLock, "*alarm*").total_ms, 1500);
}

#[test]
fn wakeup_reason_before_cpu_running() {
    let report = analyze(&[
        r#"9,hsp,2,0,"Abort:Pending Wakeup Sources""#,
        RESET,
        "9,h,1000,wr=2",
        "9,h,1000,-r",
    ]);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let window = &report.summaries[0];
    assert_eq!(window.bool_dist(BoolMetric::CpuRunning).total_ms, 2000);
    assert_eq!(
        window.service_dist(ServiceMetric::WakeupReason, "Abort:Pending Wakeup Sources").total_ms,
        2000
    );
}

#[test]
fn pending_wakeup_reason_survives_a_window_close() {
    let reason = "Abort:Pending Wakeup Sources";
    let report = analyze(&[
        r#"9,hsp,2,0,"Abort:Pending Wakeup Sources""#,
        r#"9,hsp,3,1000,"*alarm*""#,
        RESET,
        "9,h,0,Bl=80",
        "9,h,1000,+r,wr=2",
        "9,h,100,+w=3",
        "9,h,400,Bl=79",
        "9,h,500,-r",
    ]);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.summaries.len(), 2);

    let first = &report.summaries[0];
    assert_eq!(first.reason, Some(CloseReason::Level));
    assert_eq!(
        first.service_dist(ServiceMetric::WakeupReason, reason),
        Dist { num: 1, total_ms: 100, max_ms: 100 }
    );

    let second = &report.summaries[1];
    assert_eq!(
        second.service_dist(ServiceMetric::WakeupReason, reason),
        Dist { num: 1, total_ms: 0, max_ms: 0 }
    );
    assert_eq!(
        second.bool_dist(BoolMetric::CpuRunning),
        Dist { num: 1, total_ms: 500, max_ms: 500 }
    );
}

#[test]
fn repeated_wakeup_reasons_while_idle() {
    let (report, timeline) = analyze_with(
        &[
            r#"9,hsp,2,0,"Abort:Pending Wakeup Sources""#,
            RESET,
            "9,h,1000,+r,wr=2",
            "9,h,500,-r",
            "9,h,100,wr=2",
            "9,h,100,wr=2",
            "9,h,5000,+S",
            "9,h,1000,-S",
        ],
        AnalyzerConfig::new(),
    );

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let window = &report.summaries[0];
    assert_eq!(
        window.bool_dist(BoolMetric::CpuRunning),
        Dist { num: 1, total_ms: 500, max_ms: 500 }
    );
    assert_eq!(
        window.service_dist(ServiceMetric::WakeupReason, "Abort:Pending Wakeup Sources"),
        Dist { num: 2, total_ms: 1000, max_ms: 500 }
    );

    let cpu_rows: Vec<String> = timeline
        .entries()
        .iter()
        .map(|e| e.to_csv_row())
        .filter(|row| row.starts_with("CPU running,"))
        .collect();
    assert_eq!(cpu_rows, vec!["CPU running,bool,1001000,1001500,true,"]);
}

#[test]
fn reset_discards_state_carried_from_the_previous_window() {
    let report = analyze(&[
        RESET,
        "9,h,1000,+S",
        "9,h,1000,+g",
        "9,h,0:RESET:TIME:2000000",
        "9,h,1000,+g",
        "9,h,1000,-g",
    ]);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.summaries.len(), 2);

    let before = &report.summaries[0];
    assert_eq!(before.reason, Some(CloseReason::Reset));
    assert_eq!(before.bool_dist(BoolMetric::Screen), Dist { num: 1, total_ms: 1000, max_ms: 1000 });

    let after = &report.summaries[1];
    assert_eq!(after.start_ms, 2_000_000);
    assert!(after.bool_dist(BoolMetric::Screen).is_empty());
    assert_eq!(after.bool_dist(BoolMetric::Gps), Dist { num: 1, total_ms: 1000, max_ms: 1000 });
}

#[test]
fn first_value_seen_mid_window_keeps_the_earlier_time() {
    let report = analyze(&[RESET, "9,h,1000,Pcn=lte", "9,h,1000,Pcn=hspa"]);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let data = report.summaries[0].value_dists(ValueMetric::DataConnection).unwrap();
    assert_eq!(data[""], Dist { num: 1, total_ms: 1000, max_ms: 1000 });
    assert_eq!(data["lte"], Dist { num: 1, total_ms: 1000, max_ms: 1000 });
    assert_eq!(data["hspa"], Dist { num: 1, total_ms: 0, max_ms: 0 });
}

#[test]
fn overflowing_delta_skips_the_line() {
    let huge = format!("9,h,{},+g", i64::MAX);
    let report = analyze(&[RESET, huge.as_str(), "9,h,1000,+S", "9,h,1000,-S"]);

    assert_eq!(token_errors(&report), vec![TokenError::ClockOverflow(i64::MAX)]);
    let window = &report.summaries[0];
    assert_eq!(window.end_ms, 1_002_000);
    assert_eq!(window.bool_dist(BoolMetric::Screen).total_ms, 1000);
    assert!(window.bool_dist(BoolMetric::Gps).is_empty());
}

#[test]
fn cpu_stop_without_start_mid_window() {
    let report = analyze(&[RESET, "9,h,1000,+r", "9,h,1000,-r", "9,h,1000,-r"]);
    assert_eq!(token_errors(&report), vec![TokenError::CpuNotRunning]);
    assert_eq!(report.summaries[0].bool_dist(BoolMetric::CpuRunning).num, 1);
}

#[test]
fn charging_interval_is_not_reported() {
    let report = analyze(&[
        RESET,
        "9,h,0,Bs=d,Bl=50",
        "9,h,1000,+S",
        "9,h,1000,Bs=c",
        "9,h,5000,Bl=51",
        "9,h,1000,Bs=d",
        "9,h,2000,-S",
    ]);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.summaries.len(), 2);

    let before = &report.summaries[0];
    assert_eq!(before.reason, Some(CloseReason::Charging));
    assert_eq!(before.bool_dist(BoolMetric::Screen).total_ms, 1000);
    assert_eq!(before.value_dists(ValueMetric::ChargingStatus).unwrap()["d"].total_ms, 2000);

    let after = &report.summaries[1];
    assert_eq!(after.start_ms, 1_008_000);
    assert_eq!(after.initial_battery_level, 51);
    assert_eq!(after.bool_dist(BoolMetric::Screen).total_ms, 2000);
}

#[test]
fn total_sync_merges_overlapping_syncs() {
    let report = analyze(&[
        r#"9,hsp,4,10005,"gmail-ls""#,
        r#"9,hsp,5,10010,"com.google.android.gms""#,
        RESET,
        "9,h,1000,+Esy=4",
        "9,h,1000,+Esy=5",
        "9,h,1000,-Esy=4",
        "9,h,2000,-Esy=5",
    ]);

    let window = &report.summaries[0];
    assert_eq!(window.service_dist(ServiceMetric::Sync, "gmail-ls").total_ms, 2000);
    assert_eq!(window.service_dist(ServiceMetric::Sync, "com.google.android.gms").total_ms, 3000);
    assert_eq!(window.total_sync, Dist { num: 2, total_ms: 4000, max_ms: 4000 });
}

#[test]
fn connectivity_suspend_and_resume() {
    let report = analyze(&[
        r#"9,hsp,6,1,"CONNECTED""#,
        r#"9,hsp,7,1,"SUSPENDED""#,
        r#"9,hsp,8,1,"DISCONNECTED""#,
        RESET,
        "9,h,1000,Ecn=6",
        "9,h,1000,Ecn=7",
        "9,h,1000,Ecn=6",
        "9,h,1000,Ecn=8",
        "9,h,1000,Ecn=8",
    ]);

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(
        report.summaries[0].service_dist(ServiceMetric::Connectivity, "TYPE_WIFI"),
        Dist { num: 2, total_ms: 2000, max_ms: 1000 }
    );
}

#[test]
fn doze_mode_infers_initial_state() {
    let report = analyze(&[RESET, "9,h,1000,-di", "9,h,2000,+di", "9,h,500,-di"]);
    let doze = report.summaries[0].value_dists(ValueMetric::DozeMode).unwrap();
    assert_eq!(doze["full"], Dist { num: 2, total_ms: 1500, max_ms: 1000 });
    assert_eq!(doze["off"].total_ms, 2000);

    let report = analyze(&[RESET, "9,h,1000,di=off", "9,h,1000,di=full"]);
    let doze = report.summaries[0].value_dists(ValueMetric::DozeMode).unwrap();
    assert_eq!(doze["light"].total_ms, 1000);
    assert_eq!(doze["off"].total_ms, 1000);
}

#[test]
fn bare_wifi_running_value_is_ignored() {
    let report = analyze(&[RESET, "9,h,1000,Wr=28", "9,h,1000,+Wr", "9,h,1000,-Wr"]);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.summaries[0].bool_dist(BoolMetric::WifiRunning).total_ms, 1000);
}

#[test]
fn screen_wake_reason_annotates_the_screen_entry() {
    let (report, timeline) = analyze_with(
        &[
            r#"9,hsp,9,1000,"android.policy:POWER""#,
            RESET,
            "9,h,1000,+S,Esw=9",
            "9,h,1000,Esw=9",
            "9,h,1000,-S",
        ],
        AnalyzerConfig::new(),
    );

    assert_eq!(
        token_errors(&report),
        vec![TokenError::ScreenReasonTwice("android.policy:POWER".into())]
    );
    assert_eq!(
        timeline.entries()[0].to_csv_row(),
        "Screen,bool,1001000,1003000,true,android.policy:POWER"
    );
}

#[test]
fn cpu_step_records() {
    let report = analyze(&[
        RESET,
        "9,h,1000,Bl=80",
        "9,h,1000,Dcpu=1200:340,10025:120:45,1000:80:20,Dpst=100,20,3,4,5,900",
        "9,h,1000,Dpst=1,2,+S",
    ]);

    let window = &report.summaries[0];
    assert_eq!(window.dcpu.len(), 1);
    assert_eq!(window.dcpu[0].apps.len(), 2);
    assert_eq!(window.dcpu[0].apps[0].package, "10025");
    assert_eq!(window.dpst.len(), 1);
    assert_eq!(window.dpst[0].idle, 900);

    // The interrupted record is reported, the screen still turns on
    assert!(matches!(
        token_errors(&report).as_slice(),
        [TokenError::IncompleteRecord { record: "Dpst", .. }]
    ));
    assert_eq!(window.bool_dist(BoolMetric::Screen).num, 1);
}

#[test]
fn low_power_states_are_differenced() {
    let (report, timeline) = analyze_with(
        &[
            RESET,
            r#"9,h,1000,Dpss="state_1 name=XO time=1000 count=10""#,
            r#"9,h,1000,Dpss="state_1 name=XO time=1500 count=12""#,
        ],
        AnalyzerConfig::new(),
    );

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let window = &report.summaries[0];
    assert_eq!(window.power_states.len(), 1);
    assert_eq!((window.power_states[0].time_ms, window.power_states[0].count), (500, 2));
    assert_eq!(window.power_state_summary["XO"].time_ms, 500);
    assert_eq!(
        timeline.entries()[0].to_csv_row(),
        "Low power state,service,1002000,1002000,XO,time=500ms count=2"
    );
}

#[test]
fn missing_pool_entry_is_reported() {
    let report = analyze(&[RESET, "9,h,1000,+Etp=42"]);
    assert_eq!(
        token_errors(&report),
        vec![TokenError::MissingPoolEntry { desc: "Top app", index: "42".into() }]
    );
}

#[test]
fn corrected_timeline_is_flagged() {
    let report = analyze(&["9,h,0:RESET:TIME:1000000", "9,h,2000:TIME:5000", "9,h,1000,+S", "9,h,3000:TIME:1006000"]);
    assert!(report.timestamps_altered);

    let again = analyze(&["9,h,0:RESET:TIME:1000000", "9,h,2000:TIME:1002000", "9,h,1000,+S", "9,h,3000:TIME:1006000"]);
    assert!(!again.timestamps_altered);
}
