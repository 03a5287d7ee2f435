//! Temporal cells
//!
//! Every tracked attribute is one of four cell kinds. They share the same
//! inputs: the window clock, the token's transition/value and the timeline
//! sink; each applies its own transition policy.

use crate::timeline::{EntryKind, OpenEntry, TimelineSink};
use crate::types::{Dist, EntityRef, TimestampMs, TokenError, Transition};
use std::collections::BTreeMap;

/// Current time and the bounds of the open window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowClock {
    pub now: TimestampMs,
    pub window_start: TimestampMs,
    pub active: bool,
}

impl WindowClock {
    /// Time elapsed since `since`, clipped to the window start
    pub fn elapsed(&self, since: TimestampMs) -> i64 {
        self.now - since.max(self.window_start)
    }

    /// Fold the interval since `since` into `dist` when the window is active
    pub fn fold(&self, dist: &mut Dist, since: TimestampMs) {
        if self.active {
            dist.add(self.elapsed(since));
        }
    }
}

/// On/off attribute. Intervals are counted on the negative edge only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoolCell {
    pub start: TimestampMs,
    pub value: bool,
}

impl BoolCell {
    pub fn assign(
        &mut self,
        clock: WindowClock,
        dist: &mut Dist,
        tr: Transition,
        desc: &'static str,
        sink: &mut dyn TimelineSink,
    ) -> Result<(), TokenError> {
        let turn_on = match tr {
            Transition::Positive => true,
            Transition::Negative => {
                if !self.value {
                    // Only the first implicit close in a window is legal
                    if dist.num != 0 {
                        return Err(TokenError::TwoNegative(desc));
                    }
                    // Already on when the window started
                    self.value = true;
                    self.start = clock.window_start;
                    sink.open("", Self::entry(desc, self.start));
                }
                false
            }
            Transition::None => {
                return Err(TokenError::UnknownTransition {
                    desc,
                    transition: String::new(),
                })
            }
        };

        match (self.value, turn_on) {
            (true, false) => {
                clock.fold(dist, self.start);
                self.value = false;
                self.start = clock.now;
                sink.close(desc, "", clock.now);
            }
            (false, true) => {
                self.value = true;
                self.start = clock.now;
                sink.open("", Self::entry(desc, clock.now));
            }
            _ => {}
        }
        Ok(())
    }

    fn entry(desc: &str, start: TimestampMs) -> OpenEntry {
        OpenEntry::new(desc, EntryKind::Bool, start, "true")
    }

    /// Fold the open interval at a window close without ending it
    pub fn fold_open(&mut self, clock: WindowClock, dist: &mut Dist) {
        if self.value {
            clock.fold(dist, self.start);
            self.start = clock.now;
        }
    }

    pub fn rebase(&mut self, now: TimestampMs) {
        if self.start != 0 {
            self.start = now;
        }
    }
}

/// Numeric reading (level, temperature, voltage); no distribution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntCell {
    pub start: TimestampMs,
    pub value: Option<i64>,
}

impl IntCell {
    pub fn assign(
        &mut self,
        now: TimestampMs,
        raw: &str,
        desc: &'static str,
        sink: &mut dyn TimelineSink,
    ) -> Result<i64, TokenError> {
        let value: i64 = raw.parse().map_err(|_| TokenError::ParseInt {
            desc,
            value: raw.to_string(),
        })?;
        self.value = Some(value);
        self.start = now;
        sink.open("", OpenEntry::new(desc, EntryKind::Int, now, value.to_string()));
        Ok(value)
    }

    pub fn rebase(&mut self, now: TimestampMs) {
        if self.start != 0 {
            self.start = now;
        }
    }
}

/// Key for the time a cell spent before its first value, on a value change
pub const UNREPORTED_VALUE: &str = "";

/// Key for the same time when a window closes before any value was seen
pub const DEFAULT_VALUE: &str = "default";

/// Enumerated attribute with one distribution per value
///
/// An empty value means "not reported yet". Its time is still folded, under
/// [`UNREPORTED_VALUE`] or [`DEFAULT_VALUE`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringCell {
    pub start: TimestampMs,
    pub value: String,
}

impl StringCell {
    pub fn assign(
        &mut self,
        clock: WindowClock,
        dists: &mut BTreeMap<String, Dist>,
        value: &str,
        desc: &'static str,
        sink: &mut dyn TimelineSink,
    ) {
        if self.value == value {
            return;
        }
        clock.fold(dists.entry(self.value.clone()).or_default(), self.start);
        self.start = clock.now;
        self.value = value.to_string();
        sink.open("", OpenEntry::new(desc, EntryKind::String, clock.now, value));
    }

    /// Set the value the cell held since the window start, before any edge was seen
    pub fn assume_since_window_start(
        &mut self,
        clock: WindowClock,
        value: &str,
        desc: &'static str,
        sink: &mut dyn TimelineSink,
    ) {
        self.start = clock.window_start;
        self.value = value.to_string();
        sink.open("", OpenEntry::new(desc, EntryKind::String, clock.window_start, value));
    }

    pub fn fold_open(&mut self, clock: WindowClock, dists: &mut BTreeMap<String, Dist>) {
        let key = if self.value.is_empty() { DEFAULT_VALUE } else { self.value.as_str() };
        clock.fold(dists.entry(key.to_string()).or_default(), self.start);
        self.start = clock.now;
    }

    pub fn rebase(&mut self, now: TimestampMs) {
        if self.start != 0 {
            self.start = now;
        }
    }
}

/// One active instance inside an [`EntityTracker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEntity {
    pub start: TimestampMs,
    pub entity: EntityRef,
}

/// Concurrently active entities, keyed by string pool index
///
/// Distributions are keyed by service name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityTracker {
    active: BTreeMap<String, ActiveEntity>,
}

impl EntityTracker {
    fn entry(desc: &str, start: TimestampMs, entity: &EntityRef) -> OpenEntry {
        OpenEntry::new(desc, EntryKind::Service, start, entity.service.clone()).with_opt(entity.uid.clone())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn assign(
        &mut self,
        clock: WindowClock,
        dists: &mut BTreeMap<String, Dist>,
        tr: Transition,
        index: &str,
        entity: &EntityRef,
        desc: &'static str,
        sink: &mut dyn TimelineSink,
    ) -> Result<(), TokenError> {
        match tr {
            Transition::None => {
                // Active since the window started
                self.active.insert(
                    index.to_string(),
                    ActiveEntity {
                        start: clock.window_start,
                        entity: entity.clone(),
                    },
                );
                if !sink.has_open(desc, &entity.service) {
                    sink.open(&entity.service, Self::entry(desc, clock.window_start, entity));
                }
            }
            Transition::Positive => {
                if self.active.contains_key(index) {
                    return Err(TokenError::TwoPositive(desc));
                }
                self.active.insert(
                    index.to_string(),
                    ActiveEntity {
                        start: clock.now,
                        entity: entity.clone(),
                    },
                );
                sink.open(&entity.service, Self::entry(desc, clock.now, entity));
            }
            Transition::Negative => {
                let start = match self.active.remove(index) {
                    Some(active) => active.start,
                    None => {
                        let seen = dists.get(&entity.service).map_or(0, |d| d.num);
                        if seen != 0 {
                            return Err(TokenError::TwoNegative(desc));
                        }
                        sink.open(&entity.service, Self::entry(desc, clock.window_start, entity));
                        clock.window_start
                    }
                };
                clock.fold(dists.entry(entity.service.clone()).or_default(), start);
                sink.close(desc, &entity.service, clock.now);
            }
        }
        Ok(())
    }

    /// Start time of the entity registered under `index`, if active
    pub fn start_of(&self, index: &str) -> Option<TimestampMs> {
        self.active.get(index).map(|a| a.start)
    }

    pub fn fold_open(&mut self, clock: WindowClock, dists: &mut BTreeMap<String, Dist>) {
        for active in self.active.values_mut() {
            clock.fold(dists.entry(active.entity.service.clone()).or_default(), active.start);
            active.start = clock.now;
        }
    }

    pub fn rebase(&mut self, now: TimestampMs) {
        for active in self.active.values_mut() {
            if active.start != 0 {
                active.start = now;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveEntity> {
        self.active.values()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{CsvTimeline, NullTimeline};

    fn clock(now: i64) -> WindowClock {
        WindowClock {
            now,
            window_start: 100,
            active: true,
        }
    }

    #[test]
    fn test_bool_counts_negative_edges() {
        let mut cell = BoolCell::default();
        let mut dist = Dist::default();
        let mut sink = CsvTimeline::new();

        cell.assign(clock(1000), &mut dist, Transition::Positive, "Screen", &mut sink).unwrap();
        assert_eq!(dist.num, 0);
        cell.assign(clock(3000), &mut dist, Transition::Negative, "Screen", &mut sink).unwrap();
        cell.assign(clock(4000), &mut dist, Transition::Positive, "Screen", &mut sink).unwrap();
        cell.assign(clock(4500), &mut dist, Transition::Negative, "Screen", &mut sink).unwrap();

        assert_eq!(dist, Dist { num: 2, total_ms: 2500, max_ms: 2000 });
        assert_eq!(sink.entries().len(), 2);
        assert_eq!(sink.entries()[0].to_csv_row(), "Screen,bool,1000,3000,true,");
    }

    #[test]
    fn test_bool_implicit_start_once() {
        let mut cell = BoolCell::default();
        let mut dist = Dist::default();
        let mut sink = NullTimeline;

        cell.assign(clock(600), &mut dist, Transition::Negative, "GPS", &mut sink).unwrap();
        assert_eq!(dist, Dist { num: 1, total_ms: 500, max_ms: 500 });

        let err = cell.assign(clock(900), &mut dist, Transition::Negative, "GPS", &mut sink);
        assert_eq!(err, Err(TokenError::TwoNegative("GPS")));
        assert_eq!(dist.num, 1);

        assert!(matches!(
            cell.assign(clock(900), &mut dist, Transition::None, "GPS", &mut sink),
            Err(TokenError::UnknownTransition { .. })
        ));
    }

    #[test]
    fn test_bool_inactive_window_does_not_count() {
        let mut cell = BoolCell::default();
        let mut dist = Dist::default();
        let inactive = WindowClock { now: 500, window_start: 100, active: false };
        cell.assign(inactive, &mut dist, Transition::Positive, "Wifi on", &mut NullTimeline).unwrap();
        cell.assign(WindowClock { now: 900, ..inactive }, &mut dist, Transition::Negative, "Wifi on", &mut NullTimeline)
            .unwrap();
        assert!(dist.is_empty());
        assert!(!cell.value);
    }

    #[test]
    fn test_bool_fold_open_keeps_state() {
        let mut cell = BoolCell::default();
        let mut dist = Dist::default();
        cell.assign(clock(200), &mut dist, Transition::Positive, "Audio", &mut NullTimeline).unwrap();
        cell.fold_open(clock(700), &mut dist);
        assert_eq!(dist.total_ms, 500);
        assert!(cell.value);
        assert_eq!(cell.start, 700);
    }

    #[test]
    fn test_string_cell_folds_previous_value() {
        let mut cell = StringCell::default();
        let mut dists = BTreeMap::new();
        let mut sink = CsvTimeline::new();

        cell.assign(clock(200), &mut dists, "lte", "Data connection", &mut sink);
        assert_eq!(dists[UNREPORTED_VALUE], Dist { num: 1, total_ms: 100, max_ms: 100 });
        cell.assign(clock(700), &mut dists, "lte", "Data connection", &mut sink);
        cell.assign(clock(1200), &mut dists, "hspa", "Data connection", &mut sink);
        cell.fold_open(clock(1500), &mut dists);

        assert_eq!(dists["lte"], Dist { num: 1, total_ms: 1000, max_ms: 1000 });
        assert_eq!(dists["hspa"], Dist { num: 1, total_ms: 300, max_ms: 300 });
        assert_eq!(sink.entries()[0].to_csv_row(), "Data connection,string,200,1200,lte,");
    }

    #[test]
    fn test_string_cell_without_value_folds_default() {
        let mut cell = StringCell::default();
        let mut dists = BTreeMap::new();

        cell.fold_open(clock(600), &mut dists);
        assert_eq!(dists[DEFAULT_VALUE], Dist { num: 1, total_ms: 500, max_ms: 500 });
        assert!(cell.value.is_empty());
        assert_eq!(cell.start, 600);
    }

    #[test]
    fn test_int_cell() {
        let mut cell = IntCell::default();
        let mut sink = CsvTimeline::new();
        assert_eq!(cell.assign(500, "80", "level", &mut sink), Ok(80));
        assert_eq!(cell.assign(900, "79", "level", &mut sink), Ok(79));
        assert!(cell.assign(950, "high", "level", &mut sink).is_err());
        assert_eq!(cell.value, Some(79));
        assert_eq!(sink.entries()[0].to_csv_row(), "level,int,500,900,80,");
    }

    #[test]
    fn test_entity_tracker_lifecycle() {
        let mut tracker = EntityTracker::default();
        let mut dists = BTreeMap::new();
        let mut sink = CsvTimeline::new();
        let gms = EntityRef::new("com.google.android.gms", "10010");

        tracker
            .assign(clock(200), &mut dists, Transition::Positive, "3", &gms, "Top app", &mut sink)
            .unwrap();
        assert_eq!(
            tracker.assign(clock(300), &mut dists, Transition::Positive, "3", &gms, "Top app", &mut sink),
            Err(TokenError::TwoPositive("Top app"))
        );
        tracker
            .assign(clock(1200), &mut dists, Transition::Negative, "3", &gms, "Top app", &mut sink)
            .unwrap();
        assert!(tracker.is_empty());
        assert_eq!(dists["com.google.android.gms"], Dist { num: 1, total_ms: 1000, max_ms: 1000 });
        assert_eq!(
            sink.entries()[0].to_csv_row(),
            "Top app,service,200,1200,com.google.android.gms,10010"
        );

        assert_eq!(
            tracker.assign(clock(1300), &mut dists, Transition::Negative, "3", &gms, "Top app", &mut sink),
            Err(TokenError::TwoNegative("Top app"))
        );
    }

    #[test]
    fn test_entity_tracker_implicit_and_fold() {
        let mut tracker = EntityTracker::default();
        let mut dists = BTreeMap::new();
        let sync = EntityRef::new("gmail-ls", "10005");
        let phone = EntityRef::new("com.android.phone", "1001");

        tracker
            .assign(clock(400), &mut dists, Transition::Negative, "7", &sync, "SyncManager app", &mut NullTimeline)
            .unwrap();
        assert_eq!(dists["gmail-ls"].total_ms, 300);

        tracker
            .assign(clock(500), &mut dists, Transition::None, "8", &phone, "Active process", &mut NullTimeline)
            .unwrap();
        assert_eq!(tracker.start_of("8"), Some(100));
        tracker.fold_open(clock(900), &mut dists);
        assert_eq!(dists["com.android.phone"].total_ms, 800);
        assert_eq!(tracker.start_of("8"), Some(900));
    }
}
