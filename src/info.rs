//! Sensor data model
//!
//! Every value carries the time it was provided. Merging two snapshots is
//! last-writer-wins per field, so a consumer must check each field it uses
//! rather than assume the snapshot is consistent across fields.

use std::time::{Duration, Instant};

use chrono::NaiveDateTime;

use crate::geo::GeoPoint;

/// A value together with the time it was provided
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    pub at: Instant,
}

impl<T> Stamped<T> {
    pub fn is_fresh(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.at) <= max_age
    }
}

fn merge_field<T: Clone>(dst: &mut Option<Stamped<T>>, src: &Option<Stamped<T>>) {
    if let Some(new) = src {
        if dst.as_ref().is_none_or(|old| new.at >= old.at) {
            *dst = Some(new.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    NoFix,
    Gps,
    Dgps,
    Estimated,
}

/// Instrument settings as reported by (or sent to) a device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalSettings {
    /// m/s
    pub mac_cready: Option<Stamped<f64>>,
    /// Ballast as a fraction of the maximum ballast
    pub ballast_fraction: Option<Stamped<f64>>,
    /// Wing loading relative to the empty glider, 1.0 is dry
    pub ballast_overload: Option<Stamped<f64>>,
    /// Polar degradation factor, 1.0 is clean
    pub bugs: Option<Stamped<f64>>,
    /// hPa
    pub qnh: Option<Stamped<f64>>,
    pub volume: Option<Stamped<u32>>,
}

impl ExternalSettings {
    pub fn is_empty(&self) -> bool {
        self.mac_cready.is_none()
            && self.ballast_fraction.is_none()
            && self.ballast_overload.is_none()
            && self.bugs.is_none()
            && self.qnh.is_none()
            && self.volume.is_none()
    }

    pub fn merge(&mut self, other: &ExternalSettings) {
        merge_field(&mut self.mac_cready, &other.mac_cready);
        merge_field(&mut self.ballast_fraction, &other.ballast_fraction);
        merge_field(&mut self.ballast_overload, &other.ballast_overload);
        merge_field(&mut self.bugs, &other.bugs);
        merge_field(&mut self.qnh, &other.qnh);
        merge_field(&mut self.volume, &other.volume);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub product: String,
    pub serial: String,
    pub software_version: String,
    pub hardware_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlarmAlarmLevel {
    None,
    Low,
    Important,
    Urgent,
}

impl FlarmAlarmLevel {
    pub(crate) fn from_code(code: u32) -> Self {
        match code {
            0 => FlarmAlarmLevel::None,
            1 => FlarmAlarmLevel::Low,
            2 => FlarmAlarmLevel::Important,
            _ => FlarmAlarmLevel::Urgent,
        }
    }
}

/// Contents of a `PFLAU` sentence
#[derive(Debug, Clone, PartialEq)]
pub struct FlarmStatus {
    pub rx: u32,
    pub tx: bool,
    pub gps_fix: u32,
    pub alarm_level: FlarmAlarmLevel,
}

/// One target of a `PFLAA` sentence, relative to own position
#[derive(Debug, Clone, PartialEq)]
pub struct FlarmTraffic {
    pub id: String,
    pub alarm_level: FlarmAlarmLevel,
    pub relative_north: f64,
    pub relative_east: f64,
    pub relative_altitude: f64,
    pub track: Option<f64>,
    pub speed: Option<f64>,
    pub climb_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlarmVersion {
    pub hardware: String,
    pub software: String,
    pub obstacle_database: String,
}

pub(crate) const MAX_FLARM_TRAFFIC: usize = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlarmData {
    pub status: Option<Stamped<FlarmStatus>>,
    pub version: Option<Stamped<FlarmVersion>>,
    pub traffic: Vec<Stamped<FlarmTraffic>>,
}

impl FlarmData {
    /// Adds or replaces a target, identified by its FLARM id
    pub(crate) fn update_traffic(&mut self, traffic: Stamped<FlarmTraffic>) {
        if let Some(slot) = self
            .traffic
            .iter_mut()
            .find(|t| t.value.id == traffic.value.id)
        {
            *slot = traffic;
        } else if self.traffic.len() < MAX_FLARM_TRAFFIC {
            self.traffic.push(traffic);
        }
    }

    fn merge(&mut self, other: &FlarmData) {
        merge_field(&mut self.status, &other.status);
        merge_field(&mut self.version, &other.version);
        for traffic in &other.traffic {
            let newer = self
                .traffic
                .iter()
                .find(|t| t.value.id == traffic.value.id)
                .is_none_or(|old| traffic.at >= old.at);
            if newer {
                self.update_traffic(traffic.clone());
            }
        }
    }

    /// Drops targets that have not been reported for `max_age`
    pub fn expire(&mut self, now: Instant, max_age: Duration) {
        self.traffic.retain(|t| t.is_fresh(now, max_age));
    }
}

/// The sensor-data snapshot all devices write into
#[derive(Debug, Clone, PartialEq)]
pub struct NmeaInfo {
    /// Time stamp applied to values provided through this instance
    pub clock: Instant,

    /// Last time any valid record was received
    pub alive: Option<Instant>,

    pub location: Option<Stamped<GeoPoint>>,
    pub fix_quality: Option<Stamped<FixQuality>>,
    pub satellites_used: Option<Stamped<u32>>,
    /// m above MSL
    pub gps_altitude: Option<Stamped<f64>>,
    /// m above MSL, corrected for QNH by the device
    pub baro_altitude: Option<Stamped<f64>>,
    /// m, standard pressure altitude
    pub pressure_altitude: Option<Stamped<f64>>,
    /// m/s
    pub ground_speed: Option<Stamped<f64>>,
    /// degrees true
    pub track: Option<Stamped<f64>>,
    pub date_time: Option<Stamped<NaiveDateTime>>,

    /// m/s
    pub total_energy_vario: Option<Stamped<f64>>,
    pub netto_vario: Option<Stamped<f64>>,
    pub indicated_airspeed: Option<Stamped<f64>>,
    pub true_airspeed: Option<Stamped<f64>>,
    /// degrees Celsius
    pub outside_temperature: Option<Stamped<f64>>,
    pub battery_voltage: Option<Stamped<f64>>,
    pub circling: Option<Stamped<bool>>,

    pub settings: ExternalSettings,
    pub flarm: FlarmData,
    pub device: Option<Stamped<DeviceIdentity>>,
}

impl NmeaInfo {
    pub fn new(clock: Instant) -> Self {
        NmeaInfo {
            clock,
            alive: None,
            location: None,
            fix_quality: None,
            satellites_used: None,
            gps_altitude: None,
            baro_altitude: None,
            pressure_altitude: None,
            ground_speed: None,
            track: None,
            date_time: None,
            total_energy_vario: None,
            netto_vario: None,
            indicated_airspeed: None,
            true_airspeed: None,
            outside_temperature: None,
            battery_voltage: None,
            circling: None,
            settings: ExternalSettings::default(),
            flarm: FlarmData::default(),
            device: None,
        }
    }

    /// Stamps a value with this snapshot's clock
    pub fn stamp<T>(&self, value: T) -> Option<Stamped<T>> {
        Some(Stamped {
            value,
            at: self.clock,
        })
    }

    pub fn is_alive(&self, now: Instant, timeout: Duration) -> bool {
        self.alive
            .is_some_and(|at| now.saturating_duration_since(at) <= timeout)
    }

    /// Copies every field of `other` that is newer than the local one
    pub fn merge(&mut self, other: &NmeaInfo) {
        if other.clock > self.clock {
            self.clock = other.clock;
        }
        if let Some(alive) = other.alive {
            if self.alive.is_none_or(|old| alive >= old) {
                self.alive = Some(alive);
            }
        }

        merge_field(&mut self.location, &other.location);
        merge_field(&mut self.fix_quality, &other.fix_quality);
        merge_field(&mut self.satellites_used, &other.satellites_used);
        merge_field(&mut self.gps_altitude, &other.gps_altitude);
        merge_field(&mut self.baro_altitude, &other.baro_altitude);
        merge_field(&mut self.pressure_altitude, &other.pressure_altitude);
        merge_field(&mut self.ground_speed, &other.ground_speed);
        merge_field(&mut self.track, &other.track);
        merge_field(&mut self.date_time, &other.date_time);
        merge_field(&mut self.total_energy_vario, &other.total_energy_vario);
        merge_field(&mut self.netto_vario, &other.netto_vario);
        merge_field(&mut self.indicated_airspeed, &other.indicated_airspeed);
        merge_field(&mut self.true_airspeed, &other.true_airspeed);
        merge_field(&mut self.outside_temperature, &other.outside_temperature);
        merge_field(&mut self.battery_voltage, &other.battery_voltage);
        merge_field(&mut self.circling, &other.circling);
        merge_field(&mut self.device, &other.device);

        self.settings.merge(&other.settings);
        self.flarm.merge(&other.flarm);
    }
}
