//! Device drivers and port communication for glide computer instruments:
//! GPS receivers, FLARM units, varios and loggers on serial, Bluetooth,
//! TCP and UDP links.
//!
//! A [`DeviceManager`] owns one [`DeviceDescriptor`] per configured port.
//! Each descriptor opens its port in the background, binds the configured
//! driver to it and merges everything the instrument reports into the
//! shared [`Blackboard`].

pub mod blackboard;
pub mod config;
pub(crate) mod constants;
pub mod descriptor;
pub mod device;
pub mod drivers;
pub mod error;
pub mod geo;
pub mod i18n;
pub mod info;
pub mod job;
pub mod manager;
pub mod nmea;
pub mod operation;
pub mod port;
pub mod registry;

pub use blackboard::Blackboard;
pub use config::{DeviceConfig, PortType};
pub use constants::MAX_RECORDED_FLIGHTS;
pub use descriptor::{DeviceDescriptor, DeviceLease, Lifecycle};
pub use device::{Device, RecordedFlightInfo, RecordedFlightList};
pub use error::{DeviceError, DeviceResult};
pub use info::NmeaInfo;
pub use manager::{DeviceManager, EchoTolerance, ManagerOptions, Timing};
pub use registry::{DriverEntry, DriverFlags, DriverRegistry};
