//! Per-key token handling
//!
//! Most keys map onto one of the generic cells. The special cases are the CPU
//! running state and its asynchronous wakeup reason, the single-holder
//! wakelock, the screen wake reason, doze mode, connectivity and the CPU step
//! records.

use super::{Interpreter, LEVEL_DESC};
use crate::config::SummaryFormat;
use crate::cpu::{DcpuApp, DcpuRecord};
use crate::formats::Token;
use crate::power::parse_power_states;
use crate::state::{network_type, NetworkState, PendingWakeup, WakelockHolder};
use crate::state::{PARTIAL_WAKELOCK_DESC, UNKNOWN_WAKELOCK_HOLDER};
use crate::summary::{BoolMetric, CloseReason, ServiceMetric, ValueMetric};
use crate::timeline::{EntryKind, OpenEntry};
use crate::types::{TokenError, Transition};

const CHARGING_STATUSES: &[&str] = &["?", "c", "n", "d", "f"];
const HEALTH_VALUES: &[&str] = &["?", "g", "h", "d", "v", "f", "c"];
const PLUG_TYPES: &[&str] = &["n", "a", "w", "u"];
const PHONE_STATES: &[&str] = &["in", "out", "em", "off"];

const LOW_POWER_STATE_DESC: &str = "Low power state";

impl Interpreter<'_> {
    /// Apply one token to the device state
    pub(super) fn apply(&mut self, token: &Token<'_>) -> Result<(), TokenError> {
        let tr = Transition::parse(token.transition).ok_or_else(|| TokenError::UnknownTransition {
            desc: "token",
            transition: token.transition.to_string(),
        })?;
        let value = token.value;

        if token.key.starts_with(|c: char| c.is_ascii_digit()) {
            return self.continuation(token.raw);
        }

        match token.key {
            "Bs" => self.charging_status(value),
            "Bh" => self.checked_value(ValueMetric::Health, value, HEALTH_VALUES),
            "Bp" => self.checked_value(ValueMetric::PlugType, value, PLUG_TYPES),
            "Pst" => self.checked_value(ValueMetric::PhoneState, value, PHONE_STATES),
            "Bl" => self.battery_level(value),
            "Bt" => {
                let clock = self.clock();
                self.state
                    .temperature
                    .assign(clock.now, value, "temperature", &mut *self.sink)
                    .map(|_| ())
            }
            "Bv" => {
                let clock = self.clock();
                self.state
                    .voltage
                    .assign(clock.now, value, "voltage", &mut *self.sink)
                    .map(|_| ())
            }

            "r" => self.cpu_running(tr),
            "wr" => self.wakeup_reason(value),
            "w" => self.wakelock(tr, value),
            "S" => self.screen(tr),
            "Esw" => self.screen_wake_reason(value),

            "g" => self.toggle(BoolMetric::Gps, tr),
            "s" => self.toggle(BoolMetric::Sensor, tr),
            "Pcl" => self.toggle(BoolMetric::PhoneCall, tr),
            "Pr" => self.toggle(BoolMetric::MobileRadio, tr),
            "Psc" => self.toggle(BoolMetric::PhoneScan, tr),
            "W" => self.toggle(BoolMetric::Wifi, tr),
            "Wl" => self.toggle(BoolMetric::WifiFullLock, tr),
            "Ws" => self.toggle(BoolMetric::WifiScan, tr),
            "Wm" => self.toggle(BoolMetric::WifiMulticast, tr),
            // Only the signed form is the wifi running state
            "Wr" if tr == Transition::None => Ok(()),
            "Wr" => self.toggle(BoolMetric::WifiRunning, tr),
            "BP" => self.toggle(BoolMetric::Plugged, tr),
            "a" => self.toggle(BoolMetric::Audio, tr),
            "v" => self.toggle(BoolMetric::Video, tr),
            "b" => self.toggle(BoolMetric::Bluetooth, tr),
            "ca" => self.toggle(BoolMetric::Camera, tr),
            "fl" => self.toggle(BoolMetric::Flashlight, tr),
            "ch" => self.toggle(BoolMetric::Charging, tr),
            "lp" | "ps" => self.toggle(BoolMetric::PowerSave, tr),

            "Pcn" => self.set_value(ValueMetric::DataConnection, value),
            "Sb" => self.set_value(ValueMetric::Brightness, value),
            "Pss" => self.set_value(ValueMetric::SignalStrength, value),
            "Wss" => self.set_value(ValueMetric::WifiSignalStrength, value),
            "Wsp" => self.set_value(ValueMetric::WifiSupplicant, value),
            "di" => self.doze(tr, value),

            "Epr" => self.track(ServiceMetric::ActiveProcess, tr, value),
            "Efg" => self.track(ServiceMetric::ForegroundProcess, tr, value),
            "Etp" => self.track(ServiceMetric::TopApplication, tr, value),
            "Ejb" => self.track(ServiceMetric::ScheduledJob, tr, value),
            "Elw" => self.track(ServiceMetric::LongWakeLock, tr, value),
            "Esy" => self.sync(tr, value),
            "Ewl" => self.wakelock_in(tr, value),
            "Ecn" => self.connectivity(value),

            "Dcpu" => self.dcpu(value),
            "Dpst" => self.state.dpst.begin(value),
            "Dpss" => self.power_states(token.raw_value()),

            "Enl" => Err(TokenError::Unsupported(token.raw.to_string())),
            // Known events without a summary
            "Epk" | "Esm" | "Eac" | "Eur" | "Euf" => Ok(()),
            other => Err(TokenError::UnknownKey(other.to_string())),
        }
    }

    /// Bare numeric tokens continue a `Dpst` or `Dcpu` record
    fn continuation(&mut self, raw: &str) -> Result<(), TokenError> {
        if self.state.dpst.is_pending() {
            if let Some(record) = self.state.dpst.feed(raw)? {
                self.window.dpst.push(record);
            }
            return Ok(());
        }
        if self.state.dcpu_open && DcpuApp::matches(raw) {
            let mut app = DcpuApp::parse(raw)?;
            app.package = self.resolver.package_name(app.uid);
            if let Some(record) = self.window.dcpu.last_mut() {
                record.apps.push(app);
            }
            return Ok(());
        }
        Err(TokenError::UnknownKey(raw.to_string()))
    }

    fn toggle(&mut self, metric: BoolMetric, tr: Transition) -> Result<(), TokenError> {
        let clock = self.clock();
        self.state.bool_cell(metric).assign(
            clock,
            self.window.bool_dist_mut(metric),
            tr,
            metric.desc(),
            &mut *self.sink,
        )
    }

    fn set_value(&mut self, metric: ValueMetric, value: &str) -> Result<(), TokenError> {
        let clock = self.clock();
        self.state.value_cell(metric).assign(
            clock,
            self.window.value_dists_mut(metric),
            value,
            metric.desc(),
            &mut *self.sink,
        );
        Ok(())
    }

    fn checked_value(&mut self, metric: ValueMetric, value: &str, allowed: &[&str]) -> Result<(), TokenError> {
        if !allowed.contains(&value) {
            return Err(TokenError::UnknownValue {
                desc: metric.desc(),
                value: value.to_string(),
            });
        }
        self.set_value(metric, value)
    }

    fn track(&mut self, metric: ServiceMetric, tr: Transition, index: &str) -> Result<(), TokenError> {
        let entity = self.lookup(index, metric.desc())?;
        let clock = self.clock();
        self.state.tracker(metric).assign(
            clock,
            self.window.service_dists_mut(metric),
            tr,
            index,
            &entity,
            metric.desc(),
            &mut *self.sink,
        )
    }

    fn charging_status(&mut self, value: &str) -> Result<(), TokenError> {
        let metric = ValueMetric::ChargingStatus;
        if !CHARGING_STATUSES.contains(&value) {
            return Err(TokenError::UnknownValue {
                desc: metric.desc(),
                value: value.to_string(),
            });
        }
        let previous = self.state.value_cell(metric).value.clone();
        self.set_value(metric, value)?;

        match value {
            "c" if self.window.active && previous != "c" => {
                self.close_window(false, CloseReason::Charging);
                self.window.active = false;
            }
            "n" | "d" if !self.window.active => {
                // Discharging again: the next window starts now
                self.state.rebase_all(self.now);
                self.window.start_ms = self.now;
                self.window.end_ms = self.now;
                self.window.active = true;
            }
            _ => {}
        }
        Ok(())
    }

    fn battery_level(&mut self, value: &str) -> Result<(), TokenError> {
        let previous = self.state.battery_level.value;
        let level = self.state.battery_level.assign(self.now, value, LEVEL_DESC, &mut *self.sink)?;
        let level = i32::try_from(level).map_err(|_| TokenError::ParseInt {
            desc: LEVEL_DESC,
            value: value.to_string(),
        })?;

        self.window.final_battery_level = level;
        if !self.window.active || self.window.initial_battery_level == -1 {
            self.window.initial_battery_level = level;
        } else if self.format == SummaryFormat::BatteryLevel && previous != Some(i64::from(level)) {
            self.close_window(false, CloseReason::Level);
        }
        Ok(())
    }

    fn cpu_running(&mut self, tr: Transition) -> Result<(), TokenError> {
        let metric = BoolMetric::CpuRunning;
        let desc = metric.desc();
        let clock = self.clock();

        self.state.cpu.running_seen = true;
        match tr {
            Transition::Positive => {
                let cell = self.state.bool_cell(metric);
                cell.start = clock.now;
                cell.value = true;
                self.state.cpu.last_wakeup_time = clock.now;
                self.sink
                    .open("", OpenEntry::new(desc, EntryKind::Bool, clock.now, "true"));
            }
            Transition::Negative => {
                let cell = self.state.bool_cell(metric);
                if !cell.value {
                    if cell.start != 0 && cell.start != clock.window_start {
                        return Err(TokenError::CpuNotRunning);
                    }
                    // Running since the window started
                    cell.start = clock.window_start;
                    self.sink
                        .open("", OpenEntry::new(desc, EntryKind::Bool, clock.window_start, "true"));
                }

                let cell = self.state.bool_cell(metric);
                let start = cell.start;
                cell.start = clock.now;
                cell.value = false;
                clock.fold(self.window.bool_dist_mut(metric), start);
                self.state.cpu.last_wakeup_duration = clock.now - start;
                self.sink.close(desc, "", clock.now);

                if let Some(reason) = self.state.cpu.reason.take() {
                    if clock.active {
                        self.window
                            .service_dists_mut(ServiceMetric::WakeupReason)
                            .entry(reason.service.clone())
                            .or_default()
                            .add(reason.duration(clock));
                    }
                }
            }
            Transition::None => {
                return Err(TokenError::UnknownTransition {
                    desc,
                    transition: String::new(),
                })
            }
        }
        Ok(())
    }

    /// `wr` arrives on its own, usually right after `+r`
    fn wakeup_reason(&mut self, index: &str) -> Result<(), TokenError> {
        let entity = self.lookup(index, ServiceMetric::WakeupReason.desc())?;
        let clock = self.clock();
        let cpu = BoolMetric::CpuRunning;

        if self.state.is_on(cpu) {
            let start = self.state.bool_cell(cpu).start;
            self.state.cpu.reason = Some(PendingWakeup {
                service: entity.service,
                start,
                end: None,
            });
        } else if self.state.cpu.last_wakeup_time != 0 {
            // The CPU already went idle: attribute the last wakeup
            if clock.active {
                let duration = self.state.cpu.last_wakeup_duration;
                self.window
                    .service_dists_mut(ServiceMetric::WakeupReason)
                    .entry(entity.service)
                    .or_default()
                    .add(duration);
            }
            self.state.cpu.last_wakeup_time = 0;
            self.state.cpu.last_wakeup_duration = 0;
        } else if !self.state.cpu.running_seen {
            // No wakeup seen yet, assume the CPU has been running since the window started
            self.state.cpu.running_seen = true;
            let cell = self.state.bool_cell(cpu);
            cell.value = true;
            cell.start = clock.window_start;
            self.sink
                .open("", OpenEntry::new(cpu.desc(), EntryKind::Bool, clock.window_start, "true"));
            self.state.cpu.reason = Some(PendingWakeup {
                service: entity.service,
                start: clock.window_start,
                end: None,
            });
        }
        Ok(())
    }

    /// Single-holder wakelock: `+w` only names the first application to take it
    fn wakelock(&mut self, tr: Transition, value: &str) -> Result<(), TokenError> {
        if self.state.wakelock_in_seen {
            return Ok(());
        }
        let clock = self.clock();

        match tr {
            Transition::None | Transition::Positive => {
                if self.state.wakelock.held {
                    if !value.is_empty() {
                        return Err(TokenError::TwoWakelockHolders);
                    }
                    // Reported again without a holder; nothing changes
                    if self.state.wakelock.service.is_empty() {
                        return Err(TokenError::UnidentifiedWakelockHolder);
                    }
                    return Ok(());
                }

                let (service, uid) = if value.is_empty() {
                    self.state.wakelock.service = UNKNOWN_WAKELOCK_HOLDER.to_string();
                    if clock.now != clock.window_start {
                        return Err(TokenError::WakelockMidWindow);
                    }
                    (UNKNOWN_WAKELOCK_HOLDER.to_string(), String::new())
                } else {
                    let entity = self.lookup(value, PARTIAL_WAKELOCK_DESC)?;
                    // User space took over from the kernel wakeup
                    if self.state.is_on(BoolMetric::CpuRunning) {
                        if let Some(reason) = self.state.cpu.reason.as_mut() {
                            reason.end.get_or_insert(clock.now);
                        }
                    }
                    (entity.service, entity.uid)
                };

                self.sink.open(
                    "",
                    OpenEntry::new(PARTIAL_WAKELOCK_DESC, EntryKind::Service, clock.now, service.clone())
                        .with_opt(uid.clone()),
                );
                self.state.wakelock = WakelockHolder {
                    held: true,
                    start: clock.now,
                    service,
                    uid,
                };
            }
            Transition::Negative => {
                if !self.state.wakelock.held {
                    // Held since the window started by someone we never saw
                    self.state.wakelock = WakelockHolder {
                        held: false,
                        start: clock.window_start,
                        service: UNKNOWN_WAKELOCK_HOLDER.to_string(),
                        uid: String::new(),
                    };
                    self.sink.open(
                        "",
                        OpenEntry::new(
                            PARTIAL_WAKELOCK_DESC,
                            EntryKind::Service,
                            clock.window_start,
                            UNKNOWN_WAKELOCK_HOLDER,
                        ),
                    );
                }

                let holder = &mut self.state.wakelock;
                clock.fold(
                    self.window
                        .service_dists_mut(ServiceMetric::WakeLock)
                        .entry(holder.service.clone())
                        .or_default(),
                    holder.start,
                );
                holder.held = false;
                holder.start = clock.now;
                self.sink.close(PARTIAL_WAKELOCK_DESC, "", clock.now);
            }
        }
        Ok(())
    }

    fn screen(&mut self, tr: Transition) -> Result<(), TokenError> {
        let was_on = self.state.is_on(BoolMetric::Screen);
        self.toggle(BoolMetric::Screen, tr)?;

        match tr {
            Transition::Positive if !was_on => {
                if let Some(reason) = &self.state.screen_reason {
                    self.sink.set_annotation(BoolMetric::Screen.desc(), "", reason);
                }
            }
            Transition::Negative => self.state.screen_reason = None,
            _ => {}
        }
        Ok(())
    }

    /// `Esw` names what turned the screen on; once per on/off pair
    fn screen_wake_reason(&mut self, index: &str) -> Result<(), TokenError> {
        let entity = self.lookup(index, "screen wake reason")?;
        if let Some(existing) = &self.state.screen_reason {
            return Err(TokenError::ScreenReasonTwice(existing.clone()));
        }
        self.sink
            .set_annotation(BoolMetric::Screen.desc(), "", &entity.service);
        self.state.screen_reason = Some(entity.service);
        Ok(())
    }

    /// Doze mode is `+di`/`-di` on older devices and `di=<mode>` on newer ones.
    /// When the first report only tells us the mode ended, the earlier mode is
    /// inferred: `full` for the signed form, `light` for the valued form.
    fn doze(&mut self, tr: Transition, value: &str) -> Result<(), TokenError> {
        let metric = ValueMetric::DozeMode;
        let desc = metric.desc();
        let (target, inferred) = match (tr, value) {
            (Transition::Positive, "") => ("full", None),
            (Transition::Negative, "") => ("off", Some("full")),
            (Transition::None, "off") => ("off", Some("light")),
            (Transition::None, "light") => ("light", None),
            (Transition::None, "full") => ("full", None),
            _ => {
                return Err(TokenError::UnknownValue {
                    desc,
                    value: format!("{}{}", tr, value),
                })
            }
        };

        let clock = self.clock();
        let cell = self.state.value_cell(metric);
        if cell.value.is_empty() {
            if let Some(initial) = inferred {
                cell.assume_since_window_start(clock, initial, desc, &mut *self.sink);
            }
        }
        cell.assign(clock, self.window.value_dists_mut(metric), target, desc, &mut *self.sink);
        Ok(())
    }

    fn sync(&mut self, tr: Transition, index: &str) -> Result<(), TokenError> {
        let metric = ServiceMetric::Sync;
        let clock = self.clock();
        let start = self
            .state
            .tracker(metric)
            .start_of(index)
            .unwrap_or(clock.window_start);

        self.track(metric, tr, index)?;
        if tr == Transition::Negative && clock.active {
            self.state
                .sync_intervals
                .push((start.max(clock.window_start), clock.now));
        }
        Ok(())
    }

    fn wakelock_in(&mut self, tr: Transition, index: &str) -> Result<(), TokenError> {
        if !self.state.wakelock_in_seen {
            // From now on the per-entity reports replace the single holder
            self.state.tracker(ServiceMetric::WakeLock).clear();
            self.state.wakelock_in_seen = true;
        }
        self.track(ServiceMetric::WakeLock, tr, index)
    }

    fn connectivity(&mut self, index: &str) -> Result<(), TokenError> {
        let metric = ServiceMetric::Connectivity;
        let desc = metric.desc();
        let entity = self.lookup(index, desc)?;
        let network = network_type(&entity.uid);
        let clock = self.clock();
        let entry = |start| {
            OpenEntry::new(desc, EntryKind::Service, start, network).with_opt(entity.uid.clone())
        };

        let current = self.state.connectivity.get(network).copied();
        let seen = self
            .window
            .service_dists_mut(metric)
            .get(network)
            .map_or(0, |d| d.num);

        match entity.service.trim_matches('"') {
            "CONNECTED" => {
                if matches!(current, Some(NetworkState::Connected { .. })) {
                    return Ok(());
                }
                self.state
                    .connectivity
                    .insert(network.to_string(), NetworkState::Connected { start: clock.now });
                self.sink.open(network, entry(clock.now));
            }
            "SUSPENDED" => {
                let start = match current {
                    Some(NetworkState::Connected { start }) => Some(start),
                    Some(NetworkState::Suspended) => None,
                    None if seen == 0 => {
                        self.sink.open(network, entry(clock.window_start));
                        Some(clock.window_start)
                    }
                    None => None,
                };
                if let Some(start) = start {
                    clock.fold(self.window.service_dists_mut(metric).entry(network.to_string()).or_default(), start);
                    self.sink.close(desc, network, clock.now);
                }
                self.state
                    .connectivity
                    .insert(network.to_string(), NetworkState::Suspended);
            }
            "DISCONNECTED" => {
                let start = match self.state.connectivity.remove(network) {
                    Some(NetworkState::Connected { start }) => start,
                    Some(NetworkState::Suspended) => return Ok(()),
                    // Duplicate disconnects are known to happen
                    None if seen != 0 => return Ok(()),
                    None => {
                        self.sink.open(network, entry(clock.window_start));
                        clock.window_start
                    }
                };
                clock.fold(self.window.service_dists_mut(metric).entry(network.to_string()).or_default(), start);
                self.sink.close(desc, network, clock.now);
            }
            other => return Err(TokenError::UnknownConnectivity(other.to_string())),
        }
        Ok(())
    }

    fn dcpu(&mut self, value: &str) -> Result<(), TokenError> {
        let record = DcpuRecord::parse(value)?;
        self.window.dcpu.push(record);
        self.state.dcpu_open = true;
        Ok(())
    }

    fn power_states(&mut self, raw: &str) -> Result<(), TokenError> {
        for current in parse_power_states(raw)? {
            let Some(delta) = self.state.power.observe(current)? else {
                continue;
            };
            let total = &delta.since_first;
            self.sink.instant(
                OpenEntry::new(LOW_POWER_STATE_DESC, EntryKind::Service, self.now, total.name.clone())
                    .with_opt(format!("time={}ms count={}", total.time_ms, total.count)),
            );
            self.window.add_power_state(delta.window);
        }
        Ok(())
    }
}
