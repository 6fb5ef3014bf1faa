use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use glidelink::error::{DeviceError, DeviceResult};
use glidelink::{DeviceConfig, DeviceDescriptor, DeviceManager, Lifecycle};

const OPEN_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Args, Debug, Clone)]
pub(crate) struct PortOptions {
    /// JSON file with a list of device configurations
    #[clap(short, long, conflicts_with_all = ["serial", "tcp"])]
    config: Option<PathBuf>,

    /// Entry of the configuration list to use
    #[clap(long, default_value_t = 0)]
    index: usize,

    /// Serial port or RFCOMM device node
    #[clap(short, long)]
    serial: Option<String>,

    /// TCP server as host:port
    #[clap(long, conflicts_with = "serial")]
    tcp: Option<String>,

    /// Baud rate
    #[clap(short, long, default_value_t = 4800)]
    baudrate: u32,

    /// Baud rate for flight downloads, if the driver can switch
    #[clap(long)]
    bulk_baudrate: Option<u32>,

    /// Driver name, see `glidelink drivers`
    #[clap(short, long, default_value = "generic")]
    driver: String,

    /// Driver of an instrument connected behind the first one
    #[clap(long)]
    driver2: Option<String>,
}

impl PortOptions {
    fn device_config(&self) -> DeviceResult<DeviceConfig> {
        if let Some(path) = &self.config {
            let json = std::fs::read_to_string(path)?;
            let configs = DeviceConfig::from_json(&json)?;
            return configs.into_iter().nth(self.index).ok_or_else(|| {
                DeviceError::Configuration(format!(
                    "{} has no device {}",
                    path.display(),
                    self.index
                ))
            });
        }

        let mut config = match (&self.serial, &self.tcp) {
            (Some(path), _) => DeviceConfig::serial(path, self.baudrate, &self.driver),
            (None, Some(address)) => {
                let (host, port) = address.rsplit_once(':').ok_or_else(|| {
                    DeviceError::Configuration(format!("expected host:port, got {}", address))
                })?;
                let port = port.parse().map_err(|_| {
                    DeviceError::Configuration(format!("invalid TCP port {}", port))
                })?;
                DeviceConfig::tcp_client(host, port, &self.driver)
            }
            (None, None) => {
                return Err(DeviceError::Configuration(
                    "one of --config, --serial or --tcp is required".to_string(),
                ));
            }
        };
        config.bulk_baud_rate = self.bulk_baudrate.unwrap_or(0);
        if let Some(driver2) = &self.driver2 {
            config.driver2_name = driver2.clone();
        }
        Ok(config)
    }

    /// Opens the configured device and waits for the port to come up
    pub(crate) fn open(&self) -> DeviceResult<DeviceManager> {
        let manager = DeviceManager::new(vec![self.device_config()?]);
        manager.open_all();
        manager.wait_open(OPEN_TIMEOUT);

        let descriptor = first(&manager)?;
        match descriptor.lifecycle() {
            Lifecycle::Open => Ok(manager),
            _ => Err(DeviceError::Communication(
                descriptor
                    .error_message()
                    .unwrap_or_else(|| "device did not open".to_string()),
            )),
        }
    }
}

pub(crate) fn first(manager: &DeviceManager) -> DeviceResult<&DeviceDescriptor> {
    manager
        .descriptor(0)
        .ok_or_else(|| DeviceError::Configuration("no device configured".to_string()))
}
