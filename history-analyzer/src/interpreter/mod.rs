//! Line interpreter
//!
//! Drives the running clock over the normalized history, registers string
//! pool entries, handles the control lines and feeds every data token to the
//! device state (see `update.rs`). Window boundaries are managed here.

mod update;

use crate::config::{AnalyzerConfig, SummaryFormat};
use crate::formats::{classify, sanitize, scrub_pii, HistoryLine, Token};
use crate::human_readable::DeltaMapping;
use crate::packages::{app_id_from_str, PackageResolver};
use crate::state::{DeviceState, WindowClock};
use crate::summary::{self, ActivitySummary, CloseReason};
use crate::timeline::{EntryKind, OpenEntry, TimelineSink};
use crate::types::{AnalyzerError, EntityRef, TimestampMs, TokenError};
use log::{debug, trace, warn};
use std::collections::BTreeMap;

/// TIME values before this instant (2005-08-17T12:00:00Z) count from boot
/// rather than from the epoch
pub const WALL_CLOCK_CUTOFF_MS: TimestampMs = 1_124_280_000_000;

/// Timeline description of the battery level entry
pub const LEVEL_DESC: &str = "level";

/// Everything the interpreter produced for one log
#[derive(Debug, Default)]
pub struct Interpretation {
    pub summaries: Vec<ActivitySummary>,
    pub errors: Vec<AnalyzerError>,
    pub device_version: Option<i32>,
    pub overflow_ms: Option<TimestampMs>,
    pub time_to_delta: BTreeMap<TimestampMs, String>,
    pub pool: BTreeMap<String, EntityRef>,
}

/// Result of scanning the lines after an overflow marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OverflowScan {
    clock: TimestampMs,
    level_change: Option<(TimestampMs, i64)>,
}

pub struct Interpreter<'a> {
    format: SummaryFormat,
    scrub_pii: bool,
    resolver: &'a dyn PackageResolver,
    sink: &'a mut dyn TimelineSink,

    now: TimestampMs,
    state: DeviceState,
    window: ActivitySummary,
    summaries: Vec<ActivitySummary>,
    pool: BTreeMap<String, EntityRef>,

    errors: Vec<AnalyzerError>,
    deltas: DeltaMapping,
    device_version: Option<i32>,
    overflow_ms: Option<TimestampMs>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        config: &AnalyzerConfig,
        resolver: &'a dyn PackageResolver,
        sink: &'a mut dyn TimelineSink,
    ) -> Self {
        Self {
            format: config.summary_format,
            scrub_pii: config.scrub_pii,
            resolver,
            sink,
            now: 0,
            state: DeviceState::new(),
            window: ActivitySummary::new(config.summary_format),
            summaries: Vec::new(),
            pool: BTreeMap::new(),
            errors: Vec::new(),
            deltas: DeltaMapping::new(),
            device_version: None,
            overflow_ms: None,
        }
    }

    /// Interpret every line, then close the last window
    pub fn run(mut self, lines: &[String]) -> Interpretation {
        for (i, line) in lines.iter().enumerate() {
            let parsed = match classify(line) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!("{}", err);
                    self.errors.push(err);
                    continue;
                }
            };
            if let HistoryLine::Overflow { delta } = parsed {
                self.overflow(line, delta, &lines[i + 1..]);
                break;
            }
            self.dispatch(line, &parsed);
            if let Some(delta) = parsed.delta() {
                self.deltas.add(self.now, delta);
            }
        }
        self.finish()
    }

    fn dispatch(&mut self, line: &str, parsed: &HistoryLine<'_>) {
        match *parsed {
            HistoryLine::StringPool { index, uid, service } => self.register(index, uid, service),
            HistoryLine::Next => self.pool.clear(),
            HistoryLine::Version { version } => {
                if version.is_some() {
                    self.device_version = version;
                }
            }
            HistoryLine::Legacy => {}
            HistoryLine::Reset { time, .. } => self.reset(time),
            HistoryLine::Shutdown { delta } => {
                if self.advance(line, delta) {
                    self.sink.start_reboot(self.now);
                }
            }
            HistoryLine::Start { .. } => self.start(),
            HistoryLine::Time { time, .. } => self.wall_time(time),
            // Handled by `run`, which stops dispatching
            HistoryLine::Overflow { .. } => {}
            HistoryLine::Data { delta, body } => self.data(line, delta, body),
        }
    }

    pub(crate) fn clock(&self) -> WindowClock {
        WindowClock {
            now: self.now,
            window_start: self.window.start_ms,
            active: self.window.active,
        }
    }

    fn register(&mut self, index: &str, uid: &str, service: &str) {
        let service = service.trim_matches('"');
        let service = if self.scrub_pii {
            scrub_pii(service)
        } else {
            service.to_string()
        };
        if app_id_from_str(uid).is_none() {
            let err = AnalyzerError::InvalidUid {
                index: index.to_string(),
                uid: uid.to_string(),
            };
            warn!("{}", err);
            self.errors.push(err);
        }

        let mut entity = EntityRef::new(service, uid);
        entity.package = self.resolver.resolve(&entity.service, uid);
        self.pool.insert(index.to_string(), entity);
    }

    pub(crate) fn lookup(&self, index: &str, desc: &'static str) -> Result<EntityRef, TokenError> {
        self.pool
            .get(index)
            .cloned()
            .ok_or_else(|| TokenError::MissingPoolEntry {
                desc,
                index: index.to_string(),
            })
    }

    fn reset(&mut self, time: TimestampMs) {
        if self.window.start_ms > 0 {
            self.sink.close_all(self.now);
            self.close_window(true, CloseReason::Reset);
        }
        debug!("history reset at {}", time);
        self.now = time;
        self.window.start_ms = time;
        self.window.end_ms = time;
    }

    fn start(&mut self) {
        self.sink.close_all(self.now);
        if !self.sink.has_reboot() {
            self.sink.start_reboot(self.now);
        }
        self.close_window(true, CloseReason::Start);
        debug!("device restarted at {}", self.now);
        // Time restarts from boot until the next TIME line
        self.now = 0;
    }

    fn wall_time(&mut self, time: TimestampMs) {
        let empty = self.window.start_ms == self.window.end_ms;
        let first_wall_clock = self.window.start_ms < WALL_CLOCK_CUTOFF_MS && time > WALL_CLOCK_CUTOFF_MS;
        if empty || first_wall_clock {
            self.window.start_ms = time;
            self.window.end_ms = time;
        }
        self.now = time;
        self.sink.end_reboot(time);
    }

    /// Move the clock forward by a line's delta. A delta that would overflow
    /// is reported and the line skipped.
    fn advance(&mut self, line: &str, delta: i64) -> bool {
        match self.now.checked_add(delta) {
            Some(now) => {
                self.now = now;
                self.window.end_ms = now;
                true
            }
            None => {
                self.report(line, &delta.to_string(), TokenError::ClockOverflow(delta));
                false
            }
        }
    }

    fn data(&mut self, line: &str, delta: i64, body: Option<&str>) {
        if !self.advance(line, delta) {
            return;
        }
        let Some(body) = body else {
            return;
        };

        for part in sanitize(body) {
            let Some(token) = Token::parse(&part) else {
                continue;
            };
            trace!("{} {}{}={}", self.now, token.transition, token.key, token.value);

            let continuation = token.key.starts_with(|c: char| c.is_ascii_digit());
            if !continuation {
                self.state.dcpu_open = false;
                if token.key != "Dpst" {
                    if let Some(source) = self.state.dpst.interrupt() {
                        self.report(line, "Dpst", source);
                    }
                }
            }

            if let Err(source) = self.apply(&token) {
                self.report(line, &part, source);
            }
        }

        if let Some(source) = self.state.dpst.interrupt() {
            self.report(line, "Dpst", source);
        }
        self.state.dcpu_open = false;
    }

    fn report(&mut self, line: &str, token: &str, source: TokenError) {
        let err = AnalyzerError::Token {
            line: line.to_string(),
            token: token.to_string(),
            source,
        };
        warn!("{}", err);
        self.errors.push(err);
    }

    /// Close the current window and open the next one.
    ///
    /// Empty windows are dropped, inactive (charging) windows are concluded
    /// but not kept. A reset also discards the device state.
    pub(crate) fn close_window(&mut self, reset: bool, reason: CloseReason) {
        let next = ActivitySummary::new(self.format);
        if self.window.start_ms != self.window.end_ms {
            let clock = self.clock();
            self.window.reason = Some(reason);
            self.state.conclude(clock, &mut self.window);
            self.window.total_sync = summary::total_sync(&self.state.sync_intervals);
            self.window.stamp_date();
            debug!(
                "closing window {}..{} ({}), active={}",
                self.window.start_ms, self.window.end_ms, reason, self.window.active
            );

            let closed = std::mem::replace(&mut self.window, next);
            if closed.active {
                self.summaries.push(closed);
            }
        } else {
            self.window = next;
        }
        self.state.sync_intervals.clear();

        if reset {
            debug!("discarding device state ({})", reason);
            self.state = DeviceState::new();
        } else {
            let level = self
                .state
                .battery_level
                .value
                .and_then(|v| i32::try_from(v).ok())
                .unwrap_or(-1);
            self.window.start_ms = self.now;
            self.window.end_ms = self.now;
            self.window.initial_battery_level = level;
            self.window.final_battery_level = level;
        }
    }

    /// The buffer wrapped: only battery level readings after this point are
    /// trusted, and only to finish the level timeline.
    fn overflow(&mut self, line: &str, delta: i64, rest: &[String]) {
        self.advance(line, delta);
        self.overflow_ms = Some(self.now);
        debug!("history overflow at {}, {} lines not interpreted", self.now, rest.len());

        let scan = scan_after_overflow(rest, self.now, self.state.battery_level.value);
        let level_end = scan.level_change.map_or(scan.clock, |(at, _)| at);
        self.sink.close(LEVEL_DESC, "", level_end);
        self.sink.close_all(self.now);

        if let Some((at, level)) = scan.level_change {
            self.sink
                .open("", OpenEntry::new(LEVEL_DESC, EntryKind::Int, at, level.to_string()));
            self.sink.close(LEVEL_DESC, "", scan.clock);
        }
    }

    fn finish(mut self) -> Interpretation {
        self.sink.close_all(self.now);
        self.sink.end_reboot(self.now);
        if self.window.active {
            self.close_window(true, CloseReason::End);
        }

        Interpretation {
            summaries: self.summaries,
            errors: self.errors,
            device_version: self.device_version,
            overflow_ms: self.overflow_ms,
            time_to_delta: self.deltas.into_map(),
            pool: self.pool,
        }
    }
}

/// Follow the clock over the lines after an overflow and find the first
/// battery level that differs from `level`. Stops at the next reboot or reset.
fn scan_after_overflow(rest: &[String], start: TimestampMs, level: Option<i64>) -> OverflowScan {
    let mut scan = OverflowScan {
        clock: start,
        level_change: None,
    };

    for line in rest {
        match classify(line) {
            Ok(HistoryLine::Start { .. }) | Ok(HistoryLine::Reset { .. }) => break,
            Ok(HistoryLine::Time { time, .. }) => scan.clock = time,
            Ok(HistoryLine::Shutdown { delta }) | Ok(HistoryLine::Overflow { delta }) => {
                match scan.clock.checked_add(delta) {
                    Some(clock) => scan.clock = clock,
                    None => break,
                }
            }
            Ok(HistoryLine::Data { delta, body }) => {
                let Some(clock) = scan.clock.checked_add(delta) else {
                    break;
                };
                scan.clock = clock;
                if scan.level_change.is_some() {
                    continue;
                }
                let Some(body) = body else {
                    continue;
                };
                let reading = sanitize(body).iter().find_map(|part| {
                    let token = Token::parse(part)?;
                    (token.key == "Bl").then(|| token.value.parse::<i64>().ok()).flatten()
                });
                if let Some(value) = reading.filter(|v| Some(*v) != level) {
                    scan.level_change = Some((scan.clock, value));
                }
            }
            _ => {}
        }
    }
    scan
}
