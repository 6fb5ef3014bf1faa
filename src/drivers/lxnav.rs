//! LXNAV varios and loggers: LX V7, LX Nano and the S-series
//!
//! A V7 or S vario can forward its port to a Nano plugged in behind it
//! ("pass-through"), so the driver tracks both which instrument answered
//! and whether the port currently talks to the vario or to the Nano:
//!
//! ```text
//! Unknown -> Nmea(identity) <-> PassThrough(identity)
//! ```

mod nano;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::constants::{LXNAV_IDENTIFY_TIMEOUT, LXNAV_SETTING_TIMEOUT};
use crate::device::{
    Device, DeviceArgs, FlightLocator, RecordedFlightInfo, RecordedFlightList, SettingsMap,
    write_nmea,
};
use crate::error::{DeviceError, DeviceResult};
use crate::geo::KPH_TO_MS;
use crate::info::{DeviceIdentity, NmeaInfo};
use crate::nmea::{NmeaInputLine, NmeaReader};
use crate::operation::OperationEnvironment;
use crate::port::{Port, RxSuspend};
use crate::registry::{DriverEntry, DriverFlags};

pub const REGISTRATION: DriverEntry = DriverEntry {
    name: "lxnav",
    display_name: "LXNAV",
    flags: DriverFlags::LOGGER
        .union(DriverFlags::PASS_THROUGH)
        .union(DriverFlags::NMEA_OUT)
        .union(DriverFlags::MANAGE)
        .union(DriverFlags::RECEIVE_SETTINGS)
        .union(DriverFlags::SEND_SETTINGS),
    factory: Some(create),
};

fn create(args: DeviceArgs) -> Arc<dyn Device> {
    Arc::new(LxnavDevice::new(args.port))
}

/// Which instrument is on the other end of the port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Unidentified,
    V7 { nano_behind: bool },
    Nano,
    SVario { nano_behind: bool },
}

enum Product {
    V7,
    Nano,
    SVario,
}

fn classify(product: &str) -> Option<Product> {
    let product = product.trim().to_ascii_uppercase();
    let product = product.strip_prefix("LX").map(str::trim_start).unwrap_or(&product);

    if product.starts_with("V7") {
        Some(Product::V7)
    } else if product.starts_with("NANO") {
        Some(Product::Nano)
    } else if product.starts_with('S') && product[1..].starts_with(|c: char| c.is_ascii_digit()) {
        Some(Product::SVario)
    } else {
        None
    }
}

impl Identity {
    fn nano_behind(self) -> bool {
        matches!(
            self,
            Identity::V7 { nano_behind: true } | Identity::SVario { nano_behind: true }
        )
    }

    /// V7 and S varios take `PLXV0` configuration and can forward the port
    pub fn is_vario(self) -> bool {
        matches!(self, Identity::V7 { .. } | Identity::SVario { .. })
    }

    pub fn has_logger(self) -> bool {
        self == Identity::Nano || self.nano_behind()
    }

    /// A Nano answered; behind a vario that means both are present
    fn with_nano(self) -> Identity {
        match self {
            Identity::V7 { .. } => Identity::V7 { nano_behind: true },
            Identity::SVario { .. } => Identity::SVario { nano_behind: true },
            _ => Identity::Nano,
        }
    }

    fn with_product(self, product: &str) -> Identity {
        let nano_behind = self.nano_behind();
        match classify(product) {
            Some(Product::V7) => Identity::V7 { nano_behind },
            Some(Product::SVario) => Identity::SVario { nano_behind },
            Some(Product::Nano) => self.with_nano(),
            None => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LxState {
    Unknown,
    Nmea(Identity),
    /// The vario forwards the port to the instrument behind it
    PassThrough(Identity),
}

impl LxState {
    pub fn identity(self) -> Identity {
        match self {
            LxState::Unknown => Identity::Unidentified,
            LxState::Nmea(identity) | LxState::PassThrough(identity) => identity,
        }
    }

    fn with_identity(self, identity: Identity) -> LxState {
        match self {
            LxState::Unknown => LxState::Unknown,
            LxState::Nmea(_) => LxState::Nmea(identity),
            LxState::PassThrough(_) => LxState::PassThrough(identity),
        }
    }
}

pub struct LxnavDevice {
    port: Arc<dyn Port>,
    state: Mutex<LxState>,
    /// Identity learnt from the data stream before the first `enable_nmea`
    detected: Mutex<Identity>,
    /// Serialises commands
    command: Mutex<()>,
    settings: SettingsMap<String>,
}

impl LxnavDevice {
    pub fn new(port: Arc<dyn Port>) -> Self {
        LxnavDevice {
            port,
            state: Mutex::new(LxState::Unknown),
            detected: Mutex::new(Identity::Unidentified),
            command: Mutex::new(()),
            settings: SettingsMap::new(),
        }
    }

    pub fn state(&self) -> LxState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LxState) {
        debug!("LXNAV state {:?}", state);
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn begin_command(&self) -> MutexGuard<'_, ()> {
        self.command.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folds a product name into the known identity
    fn identify(&self, update: impl Fn(Identity) -> Identity) {
        let mut detected = self.detected.lock().unwrap_or_else(PoisonError::into_inner);
        *detected = update(*detected);

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = state.with_identity(update(state.identity()));
    }

    pub fn identity(&self) -> Identity {
        match self.state() {
            LxState::Unknown => *self.detected.lock().unwrap_or_else(PoisonError::into_inner),
            state => state.identity(),
        }
    }

    fn check<T>(&self, result: DeviceResult<T>) -> DeviceResult<T> {
        if let Err(DeviceError::Io(_) | DeviceError::Communication(_)) = &result {
            self.set_state(LxState::Unknown);
        }
        result
    }

    /// Asks the instrument for its `PLXVC,INFO` record. Only a Nano answers;
    /// silence is not an error.
    fn identify_nano(&self, env: &dyn OperationEnvironment) -> DeviceResult<Option<DeviceIdentity>> {
        let port = &*self.port;
        let _suspend = RxSuspend::new(port)?;
        let mut reader = NmeaReader::new(port);
        reader.flush()?;
        write_nmea(port, "PLXVC,INFO,R", env)?;

        match reader.expect_line("PLXVC,INFO,A,", env, LXNAV_IDENTIFY_TIMEOUT) {
            Ok(line) => Ok(parse_nano_info(&line["PLXVC,INFO,A,".len()..])),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn enable_nmea_locked(&self, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        match self.state() {
            LxState::Nmea(_) => Ok(()),
            LxState::PassThrough(identity) => {
                write_nmea(&*self.port, "PLXV0,CONNECTION,W,VSEVEN", env)?;
                self.set_state(LxState::Nmea(identity));
                Ok(())
            }
            LxState::Unknown => {
                write_nmea(&*self.port, "PFLX0,LXWP0,1,LXWP1,5,LXWP2,1,LXWP3,1", env)?;

                let mut identity = *self.detected.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(nano) = self.identify_nano(env)? {
                    info!("Found {} {}", nano.product, nano.software_version);
                    identity = identity.with_nano();
                }
                self.set_state(LxState::Nmea(identity));
                Ok(())
            }
        }
    }

    fn pass_through_locked(&self, enable: bool, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let identity = self.state().identity();
        if !identity.is_vario() {
            return Err(DeviceError::Unsupported("pass-through without a V7 or S vario"));
        }

        if enable {
            write_nmea(&*self.port, "PLXV0,CONNECTION,W,DIRECT", env)?;
            self.set_state(LxState::PassThrough(identity));
        } else {
            write_nmea(&*self.port, "PLXV0,CONNECTION,W,VSEVEN", env)?;
            self.set_state(LxState::Nmea(identity));
        }
        Ok(())
    }

    /// Runs a Nano logger command, forwarding the port through the vario
    /// first when the Nano sits behind one
    fn with_logger<T>(
        &self,
        env: &dyn OperationEnvironment,
        f: impl FnOnce(&dyn Port) -> DeviceResult<T>,
    ) -> DeviceResult<T> {
        self.enable_nmea_locked(env)?;
        let identity = self.state().identity();
        if !identity.has_logger() {
            return Err(DeviceError::Unsupported("no Nano logger detected"));
        }

        let forward = identity.is_vario();
        if forward {
            self.pass_through_locked(true, env)?;
        }

        let result = f(&*self.port);

        if forward {
            if let Err(e) = self.pass_through_locked(false, env) {
                warn!("Failed to leave pass-through mode: {}", e);
            }
        }
        result
    }

    fn put(&self, body: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let _command = self.begin_command();
        let result = write_nmea(&*self.port, body, env);
        self.check(result)
    }
}

/// `PLXVC,INFO,A,<product>,<software version>,<date>,<hardware version>,<serial>`
fn parse_nano_info(content: &str) -> Option<DeviceIdentity> {
    let mut line = NmeaInputLine::new(content);
    let product = line.read_nonempty()?;
    let software_version = line.read_str();
    line.skip(1);
    let hardware_version = line.read_str();
    let serial = line.read_str();

    Some(DeviceIdentity {
        product: product.to_string(),
        serial: serial.to_string(),
        software_version: software_version.to_string(),
        hardware_version: hardware_version.to_string(),
    })
}

/// `LXWP0,<logger>,<IAS km/h>,<baro altitude m>,<vario m/s>x6,<heading>,<wind>...`
fn parse_lxwp0(line: &mut NmeaInputLine<'_>, info: &mut NmeaInfo) {
    line.skip(1);
    if let Some(ias) = line.read_f64() {
        info.indicated_airspeed = info.stamp(ias * KPH_TO_MS);
    }
    if let Some(altitude) = line.read_f64() {
        info.baro_altitude = info.stamp(altitude);
    }
    if let Some(vario) = line.read_f64() {
        info.total_energy_vario = info.stamp(vario);
    }
}

/// `LXWP1,<product>,<serial>,<software version>,<hardware version>`
fn parse_lxwp1(line: &mut NmeaInputLine<'_>, info: &mut NmeaInfo) -> Option<String> {
    let product = line.read_nonempty()?.to_string();
    let serial = line.read_str().to_string();
    let software_version = line.read_str().to_string();
    let hardware_version = line.read_str().to_string();

    info.device = info.stamp(DeviceIdentity {
        product: product.clone(),
        serial,
        software_version,
        hardware_version,
    });
    Some(product)
}

/// `LXWP2,<MC m/s>,<overload>,<bugs %>,<polar a>,<polar b>,<polar c>,<volume>`
fn parse_lxwp2(line: &mut NmeaInputLine<'_>, info: &mut NmeaInfo) {
    if let Some(mac_cready) = line.read_f64() {
        info.settings.mac_cready = info.stamp(mac_cready);
    }
    if let Some(overload) = line.read_f64() {
        info.settings.ballast_overload = info.stamp(overload);
    }
    if let Some(bugs) = line.read_f64() {
        info.settings.bugs = info.stamp((100.0 - bugs) / 100.0);
    }
    line.skip(3);
    if let Some(volume) = line.read_u32() {
        info.settings.volume = info.stamp(volume);
    }
}

/// `PLXVF,<time>,<acc x>,<acc y>,<acc z>,<vario>,<IAS m/s>,<pressure altitude>`
fn parse_plxvf(line: &mut NmeaInputLine<'_>, info: &mut NmeaInfo) {
    line.skip(4);
    if let Some(vario) = line.read_f64() {
        info.total_energy_vario = info.stamp(vario);
    }
    if let Some(ias) = line.read_f64() {
        info.indicated_airspeed = info.stamp(ias);
    }
    if let Some(altitude) = line.read_f64() {
        info.pressure_altitude = info.stamp(altitude);
    }
}

/// `PLXVS,<OAT>,<mode>,<voltage>`; mode 0 is vario (circling), 1 is speed
/// command (cruise)
fn parse_plxvs(line: &mut NmeaInputLine<'_>, info: &mut NmeaInfo) {
    if let Some(temperature) = line.read_f64() {
        info.outside_temperature = info.stamp(temperature);
    }
    if let Some(mode) = line.read_u32() {
        info.circling = info.stamp(mode == 0);
    }
    if let Some(voltage) = line.read_f64() {
        info.battery_voltage = info.stamp(voltage);
    }
}

impl Device for LxnavDevice {
    fn parse_line(&self, line: &str, info: &mut NmeaInfo) -> bool {
        let mut input = NmeaInputLine::new(line);
        match input.read_str() {
            "LXWP0" => parse_lxwp0(&mut input, info),
            "LXWP1" => {
                if let Some(product) = parse_lxwp1(&mut input, info) {
                    self.identify(|identity| identity.with_product(&product));
                }
            }
            "LXWP2" => parse_lxwp2(&mut input, info),
            "LXWP3" => {}
            "PLXVF" => parse_plxvf(&mut input, info),
            "PLXVS" => parse_plxvs(&mut input, info),
            "PLXV0" => {
                let name = input.read_str();
                if input.read_char() == Some('W') && !name.is_empty() {
                    self.settings.set(name, input.rest().to_string());
                }
            }
            "PLXVC" => {
                if input.read_str() == "INFO" && input.read_char() == Some('A') {
                    if let Some(nano) = parse_nano_info(input.rest()) {
                        info.device = info.stamp(nano);
                        self.identify(Identity::with_nano);
                    }
                }
            }
            _ => return false,
        }
        true
    }

    fn enable_nmea(&self, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let _command = self.begin_command();
        let result = self.enable_nmea_locked(env);
        self.check(result)
    }

    fn link_timeout(&self) {
        // the instrument may have been swapped, detect it again
        *self.detected.lock().unwrap_or_else(PoisonError::into_inner) = Identity::Unidentified;
        self.set_state(LxState::Unknown);
    }

    fn put_mac_cready(&self, mac_cready: f64, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.put(&format!("PFLX2,{:.1},,,,,,", mac_cready), env)
    }

    fn put_bugs(&self, bugs: f64, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let percent = ((1.0 - bugs) * 100.0).round().clamp(0.0, 100.0);
        self.put(&format!("PFLX2,,,{},,,", percent as u32), env)
    }

    fn put_ballast(&self, _fraction: f64, overload: f64, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.put(&format!("PFLX2,,{:.2},,,,", overload), env)
    }

    fn put_qnh(&self, qnh: f64, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        if !self.identity().is_vario() {
            return Err(DeviceError::Unsupported("QNH on this instrument"));
        }
        self.put(&format!("PLXV0,QNH,W,{:.2}", qnh), env)
    }

    fn put_volume(&self, volume: u32, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.put(&format!("PLXV0,VOL,W,{}", volume), env)
    }

    fn enable_pass_through(&self, enable: bool, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let _command = self.begin_command();
        if self.state() == LxState::Unknown {
            let result = self.enable_nmea_locked(env);
            self.check(result)?;
        }
        let result = self.pass_through_locked(enable, env);
        self.check(result)
    }

    fn read_flight_list(&self, env: &dyn OperationEnvironment) -> DeviceResult<RecordedFlightList> {
        let _command = self.begin_command();
        let result = self.with_logger(env, |port| nano::read_flight_list(port, env));
        self.check(result)
    }

    fn download_flight(
        &self,
        flight: &RecordedFlightInfo,
        path: &Path,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        let FlightLocator::Nano { filename } = &flight.locator else {
            return Err(DeviceError::Unsupported("flight of another logger"));
        };

        let _command = self.begin_command();
        let result =
            self.with_logger(env, |port| nano::download_flight(port, filename, path, env));
        if result.is_err() && path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove partial download {}: {}", path.display(), e);
            }
        }
        self.check(result)
    }

    fn read_setting(&self, name: &str, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        let _command = self.begin_command();
        self.settings.mark_old(name);
        let result = write_nmea(&*self.port, &format!("PLXV0,{},R", name), env);
        self.check(result)?;
        self.settings.wait(name, env, LXNAV_SETTING_TIMEOUT)
    }

    fn write_setting(&self, name: &str, value: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        if value.contains([',', '*', '$', '\r', '\n']) {
            return Err(DeviceError::Configuration(format!(
                "value of {} contains NMEA framing characters",
                name
            )));
        }
        self.put(&format!("PLXV0,{},W,{}", name, value), env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn classifies_products() {
        let unknown = Identity::Unidentified;
        assert_eq!(unknown.with_product("V7"), Identity::V7 { nano_behind: false });
        assert_eq!(unknown.with_product("LX S80"), Identity::SVario { nano_behind: false });
        assert_eq!(unknown.with_product("NANO3"), Identity::Nano);
        assert_eq!(unknown.with_product("Colibri"), Identity::Unidentified);
        assert_eq!(unknown.with_product("SEEYOU"), Identity::Unidentified);
    }

    #[test]
    fn nano_behind_vario_is_co_detected() {
        let v7 = Identity::V7 { nano_behind: false };
        let both = v7.with_nano();
        assert_eq!(both, Identity::V7 { nano_behind: true });
        assert!(both.is_vario());
        assert!(both.has_logger());

        // the vario identifying itself again keeps the Nano
        assert_eq!(both.with_product("V7"), both);
        assert!(!v7.has_logger());
        assert!(!Identity::Nano.is_vario());
    }

    #[test]
    fn parses_lxwp2_settings() {
        let mut info = NmeaInfo::new(Instant::now());
        let mut line = NmeaInputLine::new("LXWP2,1.5,1.20,10,1.1,-2.2,3.3,7");
        line.skip(1);
        parse_lxwp2(&mut line, &mut info);

        assert_eq!(info.settings.mac_cready.unwrap().value, 1.5);
        assert_eq!(info.settings.ballast_overload.unwrap().value, 1.2);
        assert!((info.settings.bugs.unwrap().value - 0.9).abs() < 1e-9);
        assert_eq!(info.settings.volume.unwrap().value, 7);
    }

    #[test]
    fn parses_plxvs_switch_state() {
        let mut info = NmeaInfo::new(Instant::now());
        let mut line = NmeaInputLine::new("PLXVS,23.5,0,12.4");
        line.skip(1);
        parse_plxvs(&mut line, &mut info);

        assert_eq!(info.outside_temperature.unwrap().value, 23.5);
        assert!(info.circling.unwrap().value);
        assert_eq!(info.battery_voltage.unwrap().value, 12.4);
    }

    #[test]
    fn parses_nano_info() {
        let nano = parse_nano_info("NANO,2.10,May 12 2012,21,1234").unwrap();
        assert_eq!(nano.product, "NANO");
        assert_eq!(nano.software_version, "2.10");
        assert_eq!(nano.hardware_version, "21");
        assert_eq!(nano.serial, "1234");
        assert!(parse_nano_info("").is_none());
    }
}
