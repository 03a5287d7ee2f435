//! Aggregation windows
//!
//! An [`ActivitySummary`] collects the distributions of every tracked
//! attribute between two window boundaries (battery level change, charging,
//! reset, reboot or end of log).

use crate::config::SummaryFormat;
use crate::cpu::{DcpuRecord, DpstRecord};
use crate::power::PowerState;
use crate::types::{Dist, TimestampMs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// On/off attributes with a single distribution per window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BoolMetric {
    CpuRunning,
    Screen,
    PhoneCall,
    MobileRadio,
    PhoneScan,
    Wifi,
    WifiFullLock,
    WifiRunning,
    WifiScan,
    WifiMulticast,
    Plugged,
    Gps,
    Sensor,
    PowerSave,
    Audio,
    Video,
    Bluetooth,
    Camera,
    Flashlight,
    Charging,
}

impl BoolMetric {
    pub const ALL: [BoolMetric; 20] = [
        BoolMetric::CpuRunning,
        BoolMetric::Screen,
        BoolMetric::PhoneCall,
        BoolMetric::MobileRadio,
        BoolMetric::PhoneScan,
        BoolMetric::Wifi,
        BoolMetric::WifiFullLock,
        BoolMetric::WifiRunning,
        BoolMetric::WifiScan,
        BoolMetric::WifiMulticast,
        BoolMetric::Plugged,
        BoolMetric::Gps,
        BoolMetric::Sensor,
        BoolMetric::PowerSave,
        BoolMetric::Audio,
        BoolMetric::Video,
        BoolMetric::Bluetooth,
        BoolMetric::Camera,
        BoolMetric::Flashlight,
        BoolMetric::Charging,
    ];

    /// Timeline description
    pub fn desc(&self) -> &'static str {
        match self {
            BoolMetric::CpuRunning => "CPU running",
            BoolMetric::Screen => "Screen",
            BoolMetric::PhoneCall => "Phone call",
            BoolMetric::MobileRadio => "Mobile radio",
            BoolMetric::PhoneScan => "Phone scanning",
            BoolMetric::Wifi => "Wifi on",
            BoolMetric::WifiFullLock => "Wifi full lock",
            BoolMetric::WifiRunning => "Wifi running",
            BoolMetric::WifiScan => "Wifi scan",
            BoolMetric::WifiMulticast => "Wifi multicast",
            BoolMetric::Plugged => "plugged",
            BoolMetric::Gps => "GPS",
            BoolMetric::Sensor => "Sensor",
            BoolMetric::PowerSave => "Power Save Mode",
            BoolMetric::Audio => "Audio",
            BoolMetric::Video => "Video",
            BoolMetric::Bluetooth => "Bluetooth",
            BoolMetric::Camera => "Camera",
            BoolMetric::Flashlight => "Flashlight",
            BoolMetric::Charging => "Charging on",
        }
    }

    /// Summary name used in reports and CSV columns
    pub fn summary_name(&self) -> &'static str {
        match self {
            BoolMetric::CpuRunning => "CPURunningSummary",
            BoolMetric::Screen => "ScreenOnSummary",
            BoolMetric::PhoneCall => "PhoneCallSummary",
            BoolMetric::MobileRadio => "MobileRadioOnSummary",
            BoolMetric::PhoneScan => "PhoneScanSummary",
            BoolMetric::Wifi => "WifiOnSummary",
            BoolMetric::WifiFullLock => "WifiFullLockSummary",
            BoolMetric::WifiRunning => "WifiRunningSummary",
            BoolMetric::WifiScan => "WifiScanSummary",
            BoolMetric::WifiMulticast => "WifiMulticastOnSummary",
            BoolMetric::Plugged => "PluggedInSummary",
            BoolMetric::Gps => "GpsOnSummary",
            BoolMetric::Sensor => "SensorOnSummary",
            BoolMetric::PowerSave => "LowPowerModeOnSummary",
            BoolMetric::Audio => "AudioOnSummary",
            BoolMetric::Video => "VideoOnSummary",
            BoolMetric::Bluetooth => "BluetoothOnSummary",
            BoolMetric::Camera => "CameraOnSummary",
            BoolMetric::Flashlight => "FlashlightOnSummary",
            BoolMetric::Charging => "ChargingOnSummary",
        }
    }
}

/// Enumerated attributes with one distribution per value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueMetric {
    PhoneState,
    DataConnection,
    PlugType,
    ChargingStatus,
    Health,
    Brightness,
    SignalStrength,
    WifiSignalStrength,
    WifiSupplicant,
    DozeMode,
}

impl ValueMetric {
    pub const ALL: [ValueMetric; 10] = [
        ValueMetric::PhoneState,
        ValueMetric::DataConnection,
        ValueMetric::PlugType,
        ValueMetric::ChargingStatus,
        ValueMetric::Health,
        ValueMetric::Brightness,
        ValueMetric::SignalStrength,
        ValueMetric::WifiSignalStrength,
        ValueMetric::WifiSupplicant,
        ValueMetric::DozeMode,
    ];

    pub fn desc(&self) -> &'static str {
        match self {
            ValueMetric::PhoneState => "Phone state",
            ValueMetric::DataConnection => "Data connection",
            ValueMetric::PlugType => "plug",
            ValueMetric::ChargingStatus => "Charging status",
            ValueMetric::Health => "health",
            ValueMetric::Brightness => "Brightness",
            ValueMetric::SignalStrength => "Signal strength",
            ValueMetric::WifiSignalStrength => "Wifi signal strength",
            ValueMetric::WifiSupplicant => "Wifi supplicant",
            ValueMetric::DozeMode => "Doze Mode",
        }
    }

    pub fn summary_name(&self) -> &'static str {
        match self {
            ValueMetric::PhoneState => "PhoneStateSummary",
            ValueMetric::DataConnection => "DataConnectionSummary",
            ValueMetric::PlugType => "PlugTypeSummary",
            ValueMetric::ChargingStatus => "ChargingStatusSummary",
            ValueMetric::Health => "HealthSummary",
            ValueMetric::Brightness => "ScreenBrightnessSummary",
            ValueMetric::SignalStrength => "SignalStrengthSummary",
            ValueMetric::WifiSignalStrength => "WifiSignalStrengthSummary",
            ValueMetric::WifiSupplicant => "WifiSupplicantSummary",
            ValueMetric::DozeMode => "IdleModeSummary",
        }
    }
}

/// Per-entity attributes (apps, services, network types)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceMetric {
    ActiveProcess,
    ForegroundProcess,
    TopApplication,
    Sync,
    ScheduledJob,
    WakeLock,
    LongWakeLock,
    WakeupReason,
    Connectivity,
}

impl ServiceMetric {
    pub const ALL: [ServiceMetric; 9] = [
        ServiceMetric::ActiveProcess,
        ServiceMetric::ForegroundProcess,
        ServiceMetric::TopApplication,
        ServiceMetric::Sync,
        ServiceMetric::ScheduledJob,
        ServiceMetric::WakeLock,
        ServiceMetric::LongWakeLock,
        ServiceMetric::WakeupReason,
        ServiceMetric::Connectivity,
    ];

    pub fn desc(&self) -> &'static str {
        match self {
            ServiceMetric::ActiveProcess => "Active process",
            ServiceMetric::ForegroundProcess => "Foreground process",
            ServiceMetric::TopApplication => "Top app",
            ServiceMetric::Sync => "SyncManager app",
            ServiceMetric::ScheduledJob => "JobScheduler",
            ServiceMetric::WakeLock => "wakelock_in",
            ServiceMetric::LongWakeLock => "Long Wakelocks",
            ServiceMetric::WakeupReason => "Kernel only wakeup",
            ServiceMetric::Connectivity => "Network connectivity",
        }
    }

    pub fn summary_name(&self) -> &'static str {
        match self {
            ServiceMetric::ActiveProcess => "ActiveProcessSummary",
            ServiceMetric::ForegroundProcess => "ForegroundProcessSummary",
            ServiceMetric::TopApplication => "TopApplicationSummary",
            ServiceMetric::Sync => "PerAppSyncSummary",
            ServiceMetric::ScheduledJob => "ScheduledJobSummary",
            ServiceMetric::WakeLock => "WakeLockSummary",
            ServiceMetric::LongWakeLock => "LongWakeLockSummary",
            ServiceMetric::WakeupReason => "WakeupReasonSummary",
            ServiceMetric::Connectivity => "ConnectivitySummary",
        }
    }
}

/// Why a window was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CloseReason {
    Level,
    Charging,
    Reset,
    Start,
    End,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Level => "LEVEL",
            CloseReason::Charging => "CHARGING",
            CloseReason::Reset => "RESET",
            CloseReason::Start => "START",
            CloseReason::End => "END",
        };
        f.write_str(s)
    }
}

/// Statistics for one aggregation window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub reason: Option<CloseReason>,
    /// False while the device is charging; such windows are not reported
    pub active: bool,
    pub start_ms: TimestampMs,
    pub end_ms: TimestampMs,
    /// -1 until the first level reading
    pub initial_battery_level: i32,
    pub final_battery_level: i32,
    pub format: SummaryFormat,
    /// `YYYY-MM-DD` of the window start (UTC)
    pub date: String,

    pub bools: BTreeMap<BoolMetric, Dist>,
    pub values: BTreeMap<ValueMetric, BTreeMap<String, Dist>>,
    pub services: BTreeMap<ServiceMetric, BTreeMap<String, Dist>>,
    /// Syncs of all apps merged into non-overlapping intervals
    pub total_sync: Dist,

    pub dcpu: Vec<DcpuRecord>,
    pub dpst: Vec<DpstRecord>,
    /// Per-sighting low power state deltas
    pub power_states: Vec<PowerState>,
    /// Sum of the deltas per state name
    pub power_state_summary: BTreeMap<String, PowerState>,
}

impl ActivitySummary {
    pub fn new(format: SummaryFormat) -> Self {
        Self {
            reason: None,
            active: true,
            start_ms: 0,
            end_ms: 0,
            initial_battery_level: -1,
            final_battery_level: -1,
            format,
            date: String::new(),
            bools: BTreeMap::new(),
            values: BTreeMap::new(),
            services: BTreeMap::new(),
            total_sync: Dist::default(),
            dcpu: Vec::new(),
            dpst: Vec::new(),
            power_states: Vec::new(),
            power_state_summary: BTreeMap::new(),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    pub fn bool_dist(&self, metric: BoolMetric) -> Dist {
        self.bools.get(&metric).copied().unwrap_or_default()
    }

    pub fn bool_dist_mut(&mut self, metric: BoolMetric) -> &mut Dist {
        self.bools.entry(metric).or_default()
    }

    pub fn value_dists(&self, metric: ValueMetric) -> Option<&BTreeMap<String, Dist>> {
        self.values.get(&metric)
    }

    pub fn value_dists_mut(&mut self, metric: ValueMetric) -> &mut BTreeMap<String, Dist> {
        self.values.entry(metric).or_default()
    }

    pub fn service_dists(&self, metric: ServiceMetric) -> Option<&BTreeMap<String, Dist>> {
        self.services.get(&metric)
    }

    pub fn service_dists_mut(&mut self, metric: ServiceMetric) -> &mut BTreeMap<String, Dist> {
        self.services.entry(metric).or_default()
    }

    /// Distribution for one entity, empty if never seen
    pub fn service_dist(&self, metric: ServiceMetric, name: &str) -> Dist {
        self.services
            .get(&metric)
            .and_then(|m| m.get(name))
            .copied()
            .unwrap_or_default()
    }

    /// Set the window date from its start time
    pub fn stamp_date(&mut self) {
        self.date = chrono::DateTime::from_timestamp_millis(self.start_ms)
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
    }

    /// Record a low power state delta and add it to the per-state aggregate
    pub fn add_power_state(&mut self, delta: PowerState) {
        self.power_state_summary
            .entry(delta.name.clone())
            .or_insert_with(|| PowerState {
                name: delta.name.clone(),
                level: delta.level,
                ..Default::default()
            })
            .accumulate(&delta);
        self.power_states.push(delta);
    }
}

/// Merge sync intervals and summarize them: `num` counts the raw intervals,
/// total and max are taken over the merged ones.
pub fn total_sync(intervals: &[(TimestampMs, TimestampMs)]) -> Dist {
    if intervals.is_empty() {
        return Dist::default();
    }
    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|&(start, _)| start);

    let mut merged: Vec<(TimestampMs, TimestampMs)> = Vec::with_capacity(sorted.len());
    for (start, end) in sorted {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut dist = Dist::default();
    for (start, end) in merged {
        dist.add(end - start);
    }
    dist.num = intervals.len() as u32;
    dist
}
