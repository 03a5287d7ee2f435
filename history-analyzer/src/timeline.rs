//! Timeline entries
//!
//! The interpreter reports intervals to a [`TimelineSink`]. Entries are opened
//! when a state starts and closed when it ends; the sink keys open entries by
//! `(metric, identifier)` so several services can be open for one metric.

use crate::types::TimestampMs;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Header line of the timeline CSV
pub const TIMELINE_HEADER: &str = "metric,type,start_time,end_time,value,opt";

/// Description used for reboot intervals
pub const REBOOT_DESC: &str = "Reboot";

/// Value type of a timeline entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Bool,
    Int,
    String,
    Service,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Bool => "bool",
            EntryKind::Int => "int",
            EntryKind::String => "string",
            EntryKind::Service => "service",
        }
    }
}

/// The start of an interval that has not been closed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenEntry {
    pub desc: String,
    pub kind: EntryKind,
    pub start_ms: TimestampMs,
    pub value: String,
    /// Extra data, the UID for service entries or an annotation
    pub opt: String,
}

impl OpenEntry {
    pub fn new(desc: &str, kind: EntryKind, start_ms: TimestampMs, value: impl Into<String>) -> Self {
        Self {
            desc: desc.to_string(),
            kind,
            start_ms,
            value: value.into(),
            opt: String::new(),
        }
    }

    /// Builder method: attach the optional column
    pub fn with_opt(mut self, opt: impl Into<String>) -> Self {
        self.opt = opt.into();
        self
    }

    fn finish(self, end_ms: TimestampMs) -> TimelineEntry {
        TimelineEntry {
            desc: self.desc,
            kind: self.kind,
            start_ms: self.start_ms,
            end_ms,
            value: self.value,
            opt: self.opt,
        }
    }
}

/// A finished timeline row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub desc: String,
    pub kind: EntryKind,
    pub start_ms: TimestampMs,
    pub end_ms: TimestampMs,
    pub value: String,
    pub opt: String,
}

impl TimelineEntry {
    /// CSV row without trailing newline
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.desc,
            self.kind.as_str(),
            self.start_ms,
            self.end_ms,
            self.value,
            self.opt
        )
    }
}

/// Receiver for timeline entries produced during analysis
pub trait TimelineSink {
    /// Open an interval for `(entry.desc, ident)`. An interval already open
    /// under the same key is closed at `entry.start_ms` first. Entries with
    /// an empty value are not recorded.
    fn open(&mut self, ident: &str, entry: OpenEntry);

    /// Record a zero-length event
    fn instant(&mut self, entry: OpenEntry);

    /// Whether an interval is open for `(desc, ident)`
    fn has_open(&self, desc: &str, ident: &str) -> bool;

    /// Close the interval for `(desc, ident)` at `end_ms`, if one is open
    fn close(&mut self, desc: &str, ident: &str, end_ms: TimestampMs);

    /// Close every open interval at `end_ms`
    fn close_all(&mut self, end_ms: TimestampMs);

    /// Start of a reboot interval
    fn start_reboot(&mut self, at_ms: TimestampMs);

    /// Close the pending reboot interval, if any
    fn end_reboot(&mut self, at_ms: TimestampMs);

    fn has_reboot(&self) -> bool;

    /// Overwrite the optional column of an open interval
    fn set_annotation(&mut self, desc: &str, ident: &str, opt: &str);
}

/// Collects timeline rows in memory and renders them as CSV
#[derive(Debug, Default)]
pub struct CsvTimeline {
    open: BTreeMap<(String, String), OpenEntry>,
    reboot: Option<OpenEntry>,
    rows: Vec<TimelineEntry>,
}

impl CsvTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished rows in the order they were closed
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.rows
    }

    /// Render the header and every finished row
    pub fn to_csv(&self) -> String {
        let mut out = String::with_capacity(TIMELINE_HEADER.len() + self.rows.len() * 48);
        out.push_str(TIMELINE_HEADER);
        out.push('\n');
        for row in &self.rows {
            let _ = writeln!(out, "{}", row.to_csv_row());
        }
        out
    }

    pub fn into_entries(self) -> Vec<TimelineEntry> {
        self.rows
    }
}

impl TimelineSink for CsvTimeline {
    fn open(&mut self, ident: &str, entry: OpenEntry) {
        let key = (entry.desc.clone(), ident.to_string());
        if let Some(previous) = self.open.remove(&key) {
            self.rows.push(previous.finish(entry.start_ms));
        }
        if entry.value.is_empty() {
            return;
        }
        self.open.insert(key, entry);
    }

    fn instant(&mut self, entry: OpenEntry) {
        let at = entry.start_ms;
        self.rows.push(entry.finish(at));
    }

    fn has_open(&self, desc: &str, ident: &str) -> bool {
        self.open.contains_key(&(desc.to_string(), ident.to_string()))
    }

    fn close(&mut self, desc: &str, ident: &str, end_ms: TimestampMs) {
        if let Some(entry) = self.open.remove(&(desc.to_string(), ident.to_string())) {
            self.rows.push(entry.finish(end_ms));
        }
    }

    fn close_all(&mut self, end_ms: TimestampMs) {
        let open = std::mem::take(&mut self.open);
        self.rows
            .extend(open.into_values().map(|entry| entry.finish(end_ms)));
    }

    fn start_reboot(&mut self, at_ms: TimestampMs) {
        self.reboot = Some(OpenEntry::new(REBOOT_DESC, EntryKind::Bool, at_ms, "true"));
    }

    fn end_reboot(&mut self, at_ms: TimestampMs) {
        if let Some(entry) = self.reboot.take() {
            self.rows.push(entry.finish(at_ms));
        }
    }

    fn has_reboot(&self) -> bool {
        self.reboot.is_some()
    }

    fn set_annotation(&mut self, desc: &str, ident: &str, opt: &str) {
        if let Some(entry) = self.open.get_mut(&(desc.to_string(), ident.to_string())) {
            entry.opt = opt.to_string();
        }
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTimeline;

impl TimelineSink for NullTimeline {
    fn open(&mut self, _ident: &str, _entry: OpenEntry) {}
    fn instant(&mut self, _entry: OpenEntry) {}
    fn has_open(&self, _desc: &str, _ident: &str) -> bool {
        false
    }
    fn close(&mut self, _desc: &str, _ident: &str, _end_ms: TimestampMs) {}
    fn close_all(&mut self, _end_ms: TimestampMs) {}
    fn start_reboot(&mut self, _at_ms: TimestampMs) {}
    fn end_reboot(&mut self, _at_ms: TimestampMs) {}
    fn has_reboot(&self) -> bool {
        false
    }
    fn set_annotation(&mut self, _desc: &str, _ident: &str, _opt: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_and_render() {
        let mut timeline = CsvTimeline::new();
        timeline.open("", OpenEntry::new("Screen", EntryKind::Bool, 1000, "true"));
        assert!(timeline.has_open("Screen", ""));
        timeline.close("Screen", "", 3000);
        assert!(!timeline.has_open("Screen", ""));

        assert_eq!(
            timeline.to_csv(),
            "metric,type,start_time,end_time,value,opt\nScreen,bool,1000,3000,true,\n"
        );
    }

    #[test]
    fn test_reopen_closes_previous_interval() {
        let mut timeline = CsvTimeline::new();
        timeline.open("", OpenEntry::new("level", EntryKind::Int, 100, "80"));
        timeline.open("", OpenEntry::new("level", EntryKind::Int, 600, "79"));
        timeline.close_all(900);

        let rows = timeline.entries();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].start_ms, rows[0].end_ms, rows[0].value.as_str()), (100, 600, "80"));
        assert_eq!((rows[1].start_ms, rows[1].end_ms, rows[1].value.as_str()), (600, 900, "79"));
    }

    #[test]
    fn test_services_are_keyed_separately() {
        let mut timeline = CsvTimeline::new();
        let entry = |name: &str| OpenEntry::new("Top app", EntryKind::Service, 10, name).with_opt("10010");
        timeline.open("com.a", entry("com.a"));
        timeline.open("com.b", entry("com.b"));
        timeline.set_annotation("Top app", "com.b", "note");
        timeline.close("Top app", "com.a", 50);
        timeline.close_all(70);

        let rows = timeline.entries();
        assert_eq!(rows[0].to_csv_row(), "Top app,service,10,50,com.a,10010");
        assert_eq!(rows[1].to_csv_row(), "Top app,service,10,70,com.b,note");
    }

    #[test]
    fn test_reboot_and_empty_values() {
        let mut timeline = CsvTimeline::new();
        timeline.open("", OpenEntry::new("Data connection", EntryKind::String, 5, ""));
        assert!(!timeline.has_open("Data connection", ""));

        assert!(!timeline.has_reboot());
        timeline.start_reboot(200);
        assert!(timeline.has_reboot());
        timeline.end_reboot(900);
        timeline.end_reboot(1000);
        assert_eq!(timeline.entries().len(), 1);
        assert_eq!(timeline.entries()[0].to_csv_row(), "Reboot,bool,200,900,true,");
    }

    #[test]
    fn test_null_timeline_records_nothing() {
        let mut sink = NullTimeline;
        sink.open("", OpenEntry::new("Screen", EntryKind::Bool, 1, "true"));
        sink.start_reboot(2);
        assert!(!sink.has_open("Screen", ""));
        assert!(!sink.has_reboot());
    }
}
