//! The set of configured devices and their periodic housekeeping

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::blackboard::Blackboard;
use crate::config::DeviceConfig;
use crate::constants::{DEFAULT_LINK_TIMEOUT, DEFAULT_REOPEN_BACKOFF, FLARM_TRAFFIC_TIMEOUT};
use crate::descriptor::{Ballast, DescriptorContext, DeviceDescriptor, SettingsProvider};
use crate::device::RadioFrequency;
use crate::i18n::{MessageCatalog, Untranslated};
use crate::info::ExternalSettings;
use crate::operation::NullOperationEnvironment;
use crate::port::{PortFactory, SystemPortFactory};
use crate::registry::DriverRegistry;

/// Timing knobs of the descriptors; tests shorten them
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Silence after which a device is considered gone
    pub link_timeout: Duration,
    /// Minimum time between two open attempts of a failed port
    pub reopen_backoff: Duration,
    pub traffic_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            link_timeout: DEFAULT_LINK_TIMEOUT,
            reopen_backoff: DEFAULT_REOPEN_BACKOFF,
            traffic_timeout: FLARM_TRAFFIC_TIMEOUT,
        }
    }
}

/// How close a reported setting must be to the last sent one to count as
/// the device echoing it back. Volume must match exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoTolerance {
    /// m/s
    pub mac_cready: f64,
    pub ballast: f64,
    pub bugs: f64,
    /// hPa
    pub qnh: f64,
}

impl Default for EchoTolerance {
    fn default() -> Self {
        EchoTolerance {
            mac_cready: 0.05,
            ballast: 0.01,
            bugs: 0.01,
            qnh: 0.5,
        }
    }
}

pub struct ManagerOptions {
    pub registry: Arc<DriverRegistry>,
    pub factory: Arc<dyn PortFactory>,
    pub catalog: Arc<dyn MessageCatalog>,
    pub timing: Timing,
    pub echo: EchoTolerance,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        ManagerOptions {
            registry: Arc::new(DriverRegistry::default()),
            factory: Arc::new(SystemPortFactory),
            catalog: Arc::new(Untranslated),
            timing: Timing::default(),
            echo: EchoTolerance::default(),
        }
    }
}

pub struct DeviceManager {
    descriptors: Vec<DeviceDescriptor>,
    blackboard: Arc<Blackboard>,
    registry: Arc<DriverRegistry>,
    timing: Timing,
}

impl DeviceManager {
    pub fn new(configs: Vec<DeviceConfig>) -> Self {
        Self::with_options(configs, ManagerOptions::default())
    }

    pub fn with_options(configs: Vec<DeviceConfig>, options: ManagerOptions) -> Self {
        let blackboard = Arc::new(Blackboard::new());
        let context = DescriptorContext {
            registry: options.registry.clone(),
            factory: options.factory,
            blackboard: blackboard.clone(),
            catalog: options.catalog,
            timing: options.timing,
            echo: options.echo,
        };

        let descriptors = configs
            .into_iter()
            .enumerate()
            .map(|(index, config)| DeviceDescriptor::new(index, config, context.clone()))
            .collect();

        DeviceManager {
            descriptors,
            blackboard,
            registry: options.registry,
            timing: options.timing,
        }
    }

    pub fn descriptors(&self) -> &[DeviceDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, index: usize) -> Option<&DeviceDescriptor> {
        self.descriptors.get(index)
    }

    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.blackboard
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// First descriptor whose primary or pass-through driver has this name
    pub fn find_by_driver(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.descriptors.iter().find(|d| {
            d.driver().name.eq_ignore_ascii_case(name)
                || d.second_driver().is_some_and(|e| e.name.eq_ignore_ascii_case(name))
        })
    }

    /// Starts opening every enabled device
    pub fn open_all(&self) {
        for descriptor in self.descriptors.iter().filter(|d| d.config().is_available()) {
            if let Err(e) = descriptor.open() {
                warn!("Cannot open {}: {}", descriptor.config().port_name(), e);
            }
        }
    }

    pub fn close_all(&self) {
        for descriptor in &self.descriptors {
            if let Err(e) = descriptor.close() {
                warn!("Cannot close {}: {}", descriptor.config().port_name(), e);
            }
        }
    }

    /// Waits until no descriptor is still opening
    pub fn wait_open(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        for descriptor in &self.descriptors {
            descriptor.wait_open(deadline.saturating_duration_since(Instant::now()));
        }
    }

    pub fn set_settings_provider(&self, provider: Arc<dyn SettingsProvider>) {
        for descriptor in &self.descriptors {
            descriptor.set_settings_provider(provider.clone());
        }
    }

    /// Settings changed on any device since the last call; later devices
    /// win when two report the same setting
    pub fn take_device_settings(&self) -> ExternalSettings {
        let mut settings = ExternalSettings::default();
        for descriptor in &self.descriptors {
            settings.merge(&descriptor.take_device_settings());
        }
        settings
    }

    /// Periodic work, to be called about once per second
    pub fn tick(&self) {
        let now = Instant::now();
        self.blackboard
            .update(|info| info.flarm.expire(now, self.timing.traffic_timeout));

        for descriptor in &self.descriptors {
            descriptor.on_sys_ticker(&NullOperationEnvironment);
            descriptor.auto_reopen();
        }
    }

    pub fn put_mac_cready(&self, mac_cready: f64) {
        info!("Sending MacCready {:.1} m/s", mac_cready);
        for descriptor in &self.descriptors {
            descriptor.put_mac_cready(mac_cready, &NullOperationEnvironment);
        }
    }

    pub fn put_bugs(&self, bugs: f64) {
        for descriptor in &self.descriptors {
            descriptor.put_bugs(bugs, &NullOperationEnvironment);
        }
    }

    pub fn put_ballast(&self, ballast: Ballast) {
        for descriptor in &self.descriptors {
            descriptor.put_ballast(ballast, &NullOperationEnvironment);
        }
    }

    pub fn put_qnh(&self, qnh: f64) {
        for descriptor in &self.descriptors {
            descriptor.put_qnh(qnh, &NullOperationEnvironment);
        }
    }

    pub fn put_volume(&self, volume: u32) {
        for descriptor in &self.descriptors {
            descriptor.put_volume(volume, &NullOperationEnvironment);
        }
    }

    pub fn put_active_frequency(&self, frequency: RadioFrequency, name: &str) {
        for descriptor in &self.descriptors {
            descriptor.put_active_frequency(frequency, name, &NullOperationEnvironment);
        }
    }

    pub fn put_standby_frequency(&self, frequency: RadioFrequency, name: &str) {
        for descriptor in &self.descriptors {
            descriptor.put_standby_frequency(frequency, name, &NullOperationEnvironment);
        }
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.close_all();
    }
}
