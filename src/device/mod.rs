//! The protocol driver interface
//!
//! Every driver implements [`Device`]. Operations a driver does not support
//! keep their default body and report [`DeviceError::Unsupported`]; the
//! registry's capability flags tell callers which operations are worth
//! trying.

mod declaration;
mod record;
mod settings;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

pub use declaration::{Declaration, Waypoint};
pub use record::{FlightLocator, RecordedFlightInfo, RecordedFlightList};
pub use settings::SettingsMap;

use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::info::NmeaInfo;
use crate::nmea::format_sentence;
use crate::operation::OperationEnvironment;
use crate::port::Port;

/// Radio frequency in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioFrequency(u32);

impl RadioFrequency {
    pub fn from_khz(khz: u32) -> Self {
        RadioFrequency(khz)
    }

    pub fn khz(&self) -> u32 {
        self.0
    }
}

/// What a driver factory gets to build a device from
pub struct DeviceArgs {
    pub port: Arc<dyn Port>,
    pub config: DeviceConfig,
}

pub type DeviceFactory = fn(DeviceArgs) -> Arc<dyn Device>;

/// A protocol driver bound to one port.
///
/// Methods take `&self`: `parse_line` and `data_received` run on the
/// port's receive thread while commands run on whichever thread borrowed
/// the descriptor, so implementations keep their state behind locks.
/// Commands block for a bounded time and give up on cancellation.
pub trait Device: Send + Sync {
    /// Interprets one checksum-verified line. Returns `false` for lines the
    /// driver does not know so the generic parser gets a chance.
    fn parse_line(&self, _line: &str, _info: &mut NmeaInfo) -> bool {
        false
    }

    /// Sees raw bytes before line splitting. Returns `true` when the driver
    /// consumed them.
    fn data_received(&self, _data: &[u8], _info: &mut NmeaInfo) -> bool {
        false
    }

    /// Brings the device to its baseline mode. Idempotent.
    fn enable_nmea(&self, _env: &dyn OperationEnvironment) -> DeviceResult<()> {
        Ok(())
    }

    /// No data arrived for the liveness window; forget what was detected
    fn link_timeout(&self) {}

    /// Called about once per second
    fn on_sys_ticker(&self) {}

    /// m/s
    fn put_mac_cready(&self, _mac_cready: f64, _env: &dyn OperationEnvironment) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("MacCready"))
    }

    /// Polar degradation factor, 1.0 is clean
    fn put_bugs(&self, _bugs: f64, _env: &dyn OperationEnvironment) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("bugs"))
    }

    /// `fraction` of the maximum ballast, `overload` as the resulting
    /// wing loading factor
    fn put_ballast(
        &self,
        _fraction: f64,
        _overload: f64,
        _env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("ballast"))
    }

    /// hPa
    fn put_qnh(&self, _qnh: f64, _env: &dyn OperationEnvironment) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("QNH"))
    }

    fn put_volume(&self, _volume: u32, _env: &dyn OperationEnvironment) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("volume"))
    }

    fn put_active_frequency(
        &self,
        _frequency: RadioFrequency,
        _name: &str,
        _env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("active frequency"))
    }

    fn put_standby_frequency(
        &self,
        _frequency: RadioFrequency,
        _name: &str,
        _env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("standby frequency"))
    }

    /// Switches forwarding of the port to an instrument connected behind
    /// this one
    fn enable_pass_through(&self, _enable: bool, _env: &dyn OperationEnvironment) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("pass-through"))
    }

    fn declare(&self, _declaration: &Declaration, _env: &dyn OperationEnvironment) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("declaration"))
    }

    fn read_flight_list(&self, _env: &dyn OperationEnvironment) -> DeviceResult<RecordedFlightList> {
        Err(DeviceError::Unsupported("flight list"))
    }

    fn download_flight(
        &self,
        _flight: &RecordedFlightInfo,
        _path: &Path,
        _env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("flight download"))
    }

    /// Reads a named device setting, asking the device for a fresh value
    fn read_setting(&self, _name: &str, _env: &dyn OperationEnvironment) -> DeviceResult<String> {
        Err(DeviceError::Unsupported("settings"))
    }

    fn write_setting(
        &self,
        _name: &str,
        _value: &str,
        _env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        Err(DeviceError::Unsupported("settings"))
    }
}

const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Writes `$<body>*XX\r\n`
pub(crate) fn write_nmea(
    port: &dyn Port,
    body: &str,
    env: &dyn OperationEnvironment,
) -> DeviceResult<()> {
    trace!("Sending {}", body);
    port.full_write(format_sentence(body).as_bytes(), env, WRITE_TIMEOUT)
}
