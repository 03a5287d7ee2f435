//! Mapping from absolute timestamps to the cumulative deltas printed by the
//! human-readable history dump (`+1d01h33m33s000ms`).

use crate::types::TimestampMs;
use std::collections::BTreeMap;

/// Accumulates line deltas and remembers the formatted running total per timestamp
#[derive(Debug, Clone, Default)]
pub struct DeltaMapping {
    cumulative_ms: i64,
    time_to_delta: BTreeMap<TimestampMs, String>,
}

impl DeltaMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the running total and map `timestamp` to it.
    ///
    /// A zero timestamp means the clock was reset (after START); the delta
    /// still counts but nothing is recorded.
    pub fn add(&mut self, timestamp: TimestampMs, delta: i64) {
        self.cumulative_ms = self.cumulative_ms.saturating_add(delta);
        if timestamp != 0 {
            if let Some(formatted) = format_delta(self.cumulative_ms) {
                self.time_to_delta.insert(timestamp, formatted);
            }
        }
    }

    pub fn cumulative_ms(&self) -> i64 {
        self.cumulative_ms
    }

    pub fn into_map(self) -> BTreeMap<TimestampMs, String> {
        self.time_to_delta
    }
}

/// Format a non-negative delta; the leading unit is unpadded and non-zero
pub fn format_delta(delta: i64) -> Option<String> {
    if delta < 0 {
        return None;
    }
    if delta == 0 {
        return Some("0".to_string());
    }

    let ms = delta % 1000;
    let secs_total = delta / 1000;
    if secs_total == 0 {
        return Some(format!("+{}ms", ms));
    }
    let mut rest = format!("{:03}ms", ms);

    let s = secs_total % 60;
    let mins_total = secs_total / 60;
    if mins_total == 0 {
        return Some(format!("+{}s{}", s, rest));
    }
    rest = format!("{:02}s{}", s, rest);

    let m = mins_total % 60;
    let hours_total = mins_total / 60;
    if hours_total == 0 {
        return Some(format!("+{}m{}", m, rest));
    }
    rest = format!("{:02}m{}", m, rest);

    let h = hours_total % 24;
    let days = hours_total / 24;
    if days == 0 {
        return Some(format!("+{}h{}", h, rest));
    }
    Some(format!("+{}d{:02}h{}", days, h, rest))
}
