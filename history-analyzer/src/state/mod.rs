//! Device state snapshot
//!
//! [`DeviceState`] holds every temporal cell and entity tracker that lives
//! between two hard resets. A window close folds the open intervals into the
//! closing summary but keeps the state itself; a reset throws it away.

pub mod cells;

pub use cells::{ActiveEntity, BoolCell, EntityTracker, IntCell, StringCell, WindowClock};

use crate::cpu::DpstAssembler;
use crate::power::PowerStateTracker;
use crate::summary::{ActivitySummary, BoolMetric, ServiceMetric, ValueMetric};
use crate::types::TimestampMs;
use std::collections::BTreeMap;

/// Holder name used when a wakelock was already held before it was reported
pub const UNKNOWN_WAKELOCK_HOLDER: &str = "unknown-wakelock-holder";

/// Timeline description of the single-holder wakelock
pub const PARTIAL_WAKELOCK_DESC: &str = "Partial wakelock";

/// Network type name for a connectivity UID
pub fn network_type(uid: &str) -> &'static str {
    match uid {
        "0" => "TYPE_MOBILE",
        "1" => "TYPE_WIFI",
        "2" => "TYPE_MOBILE_MMS",
        "3" => "TYPE_MOBILE_SUPL",
        "4" => "TYPE_MOBILE_DUN",
        "5" => "TYPE_MOBILE_HIPRI",
        "6" => "TYPE_WIMAX",
        "7" => "TYPE_BLUETOOTH",
        "8" => "TYPE_DUMMY",
        "9" => "TYPE_ETHERNET",
        "17" => "TYPE_VPN",
        _ => "UNKNOWN",
    }
}

/// The application that took the user space wakelock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WakelockHolder {
    pub held: bool,
    pub start: TimestampMs,
    pub service: String,
    pub uid: String,
}

/// Wakeup reason waiting for the CPU running interval it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWakeup {
    pub service: String,
    pub start: TimestampMs,
    /// Set when a user space wakelock took over before the CPU went idle
    pub end: Option<TimestampMs>,
}

impl PendingWakeup {
    /// Duration attributed to the reason if the CPU stopped at `now`
    pub fn duration(&self, clock: WindowClock) -> i64 {
        (self.end.unwrap_or(clock.now) - self.start.max(clock.window_start)).max(0)
    }

    /// Restart the reason at a window boundary once its time so far is folded
    pub fn carry_over(&mut self, now: TimestampMs) {
        self.start = now;
        if self.end.is_some() {
            self.end = Some(now);
        }
    }
}

/// Bookkeeping around CPU wakeups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuWakeState {
    /// Whether `r` has been reported (or inferred) since the last reset
    pub running_seen: bool,
    pub last_wakeup_time: TimestampMs,
    pub last_wakeup_duration: i64,
    pub reason: Option<PendingWakeup>,
}

/// Connectivity state of one network type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Connected { start: TimestampMs },
    Suspended,
}

/// All device attributes tracked between two hard resets
#[derive(Debug, Default)]
pub struct DeviceState {
    pub bools: BTreeMap<BoolMetric, BoolCell>,
    pub values: BTreeMap<ValueMetric, StringCell>,
    pub battery_level: IntCell,
    pub temperature: IntCell,
    pub voltage: IntCell,
    pub trackers: BTreeMap<ServiceMetric, EntityTracker>,

    pub wakelock: WakelockHolder,
    /// Once `Ewl` is seen the per-entity tracker replaces `w`
    pub wakelock_in_seen: bool,
    pub cpu: CpuWakeState,
    pub connectivity: BTreeMap<String, NetworkState>,
    /// Reason reported by `Esw` for the current screen on interval
    pub screen_reason: Option<String>,
    /// Closed sync intervals of the current window
    pub sync_intervals: Vec<(TimestampMs, TimestampMs)>,

    pub power: PowerStateTracker,
    pub dpst: DpstAssembler,
    /// Whether bare `uid:user:system` tokens still belong to the last Dcpu record
    pub dcpu_open: bool,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bool_cell(&mut self, metric: BoolMetric) -> &mut BoolCell {
        self.bools.entry(metric).or_default()
    }

    pub fn value_cell(&mut self, metric: ValueMetric) -> &mut StringCell {
        self.values.entry(metric).or_default()
    }

    pub fn tracker(&mut self, metric: ServiceMetric) -> &mut EntityTracker {
        self.trackers.entry(metric).or_default()
    }

    pub fn is_on(&self, metric: BoolMetric) -> bool {
        self.bools.get(&metric).is_some_and(|c| c.value)
    }

    /// Fold every open interval into `summary` as if it had just ended,
    /// leaving the state itself untouched for the next window.
    pub fn conclude(&mut self, clock: WindowClock, summary: &mut ActivitySummary) {
        for (metric, cell) in self.bools.iter_mut() {
            cell.fold_open(clock, summary.bool_dist_mut(*metric));
        }
        for (metric, cell) in self.values.iter_mut() {
            cell.fold_open(clock, summary.value_dists_mut(*metric));
        }

        let cpu_running = self.is_on(BoolMetric::CpuRunning);
        if let Some(reason) = self.cpu.reason.as_mut() {
            if cpu_running && clock.active {
                let duration = reason.duration(clock);
                summary
                    .service_dists_mut(ServiceMetric::WakeupReason)
                    .entry(reason.service.clone())
                    .or_default()
                    .add(duration);
            }
            reason.carry_over(clock.now);
        }

        if self.wakelock.held && !self.wakelock_in_seen {
            let dists = summary.service_dists_mut(ServiceMetric::WakeLock);
            clock.fold(dists.entry(self.wakelock.service.clone()).or_default(), self.wakelock.start);
            self.wakelock.start = clock.now;
        }

        for (metric, tracker) in self.trackers.iter_mut() {
            if *metric == ServiceMetric::Sync && clock.active {
                self.sync_intervals.extend(
                    tracker
                        .iter()
                        .map(|a| (a.start.max(clock.window_start), clock.now)),
                );
            }
            tracker.fold_open(clock, summary.service_dists_mut(*metric));
        }

        let network = summary.service_dists_mut(ServiceMetric::Connectivity);
        for (name, state) in self.connectivity.iter_mut() {
            if let NetworkState::Connected { start } = state {
                clock.fold(network.entry(name.clone()).or_default(), *start);
                *start = clock.now;
            }
        }
    }

    /// Restart every running interval at `now`, used when a charging window
    /// turns back into a discharging one
    pub fn rebase_all(&mut self, now: TimestampMs) {
        for cell in self.bools.values_mut() {
            cell.rebase(now);
        }
        for cell in self.values.values_mut() {
            cell.rebase(now);
        }
        self.battery_level.rebase(now);
        self.temperature.rebase(now);
        self.voltage.rebase(now);
        for tracker in self.trackers.values_mut() {
            tracker.rebase(now);
        }
        if self.wakelock.start != 0 {
            self.wakelock.start = now;
        }
        if let Some(reason) = self.cpu.reason.as_mut() {
            reason.carry_over(now);
        }
        for state in self.connectivity.values_mut() {
            if let NetworkState::Connected { start } = state {
                *start = now;
            }
        }
    }
}
