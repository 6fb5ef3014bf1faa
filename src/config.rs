use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    #[default]
    Disabled,

    /// Local serial port (USB adapters included)
    Serial,

    /// Bluetooth serial channel bound to a device node, e.g. `/dev/rfcomm0`
    Rfcomm,

    /// Connects to a TCP server, e.g. a WiFi FLARM bridge
    TcpClient,

    /// Accepts one TCP client on the configured port
    TcpListener,

    /// Receives datagrams on the configured port and answers the sender
    Udp,
}

/// Configuration of one device slot, as loaded by the profile layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub port_type: PortType,

    /// Device node for serial and RFCOMM ports
    pub path: String,

    /// Host for TCP clients; bind address for listeners
    pub ip_address: String,
    pub tcp_port: u16,

    pub baud_rate: u32,

    /// Baud rate for bulk transfers; 0 disables switching
    pub bulk_baud_rate: u32,

    pub driver_name: String,

    /// Driver of an instrument connected behind the first one
    pub driver2_name: String,

    /// Push MacCready, ballast, bugs and QNH to the device
    pub sync_to_device: bool,

    /// Accept settings changed on the device
    pub sync_from_device: bool,

    pub enabled: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            port_type: PortType::Disabled,
            path: String::new(),
            ip_address: String::new(),
            tcp_port: 4353,
            baud_rate: 4800,
            bulk_baud_rate: 0,
            driver_name: "generic".to_string(),
            driver2_name: String::new(),
            sync_to_device: true,
            sync_from_device: true,
            enabled: true,
        }
    }
}

impl DeviceConfig {
    pub fn serial(path: &str, baud_rate: u32, driver_name: &str) -> Self {
        DeviceConfig {
            port_type: PortType::Serial,
            path: path.to_string(),
            baud_rate,
            driver_name: driver_name.to_string(),
            ..Default::default()
        }
    }

    pub fn tcp_client(ip_address: &str, tcp_port: u16, driver_name: &str) -> Self {
        DeviceConfig {
            port_type: PortType::TcpClient,
            ip_address: ip_address.to_string(),
            tcp_port,
            driver_name: driver_name.to_string(),
            ..Default::default()
        }
    }

    /// Whether a port should exist for this configuration at all
    pub fn is_available(&self) -> bool {
        self.enabled && self.port_type != PortType::Disabled
    }

    pub fn bulk_baud_rate(&self) -> Option<u32> {
        (self.bulk_baud_rate > 0 && self.bulk_baud_rate != self.baud_rate)
            .then_some(self.bulk_baud_rate)
    }

    pub fn second_driver(&self) -> Option<&str> {
        let name = self.driver2_name.trim();
        (!name.is_empty()).then_some(name)
    }

    /// Human readable port name for messages
    pub fn port_name(&self) -> String {
        match self.port_type {
            PortType::Disabled => "disabled".to_string(),
            PortType::Serial | PortType::Rfcomm => self.path.clone(),
            PortType::TcpClient => format!("{}:{}", self.ip_address, self.tcp_port),
            PortType::TcpListener => format!("TCP port {}", self.tcp_port),
            PortType::Udp => format!("UDP port {}", self.tcp_port),
        }
    }

    pub fn validate(&self) -> DeviceResult<()> {
        match self.port_type {
            PortType::Serial | PortType::Rfcomm if self.path.is_empty() => Err(
                DeviceError::Configuration("no device path configured".to_string()),
            ),
            PortType::Serial | PortType::Rfcomm if self.baud_rate == 0 => Err(
                DeviceError::Configuration("baud rate must not be zero".to_string()),
            ),
            PortType::TcpClient if self.ip_address.is_empty() => Err(
                DeviceError::Configuration("no IP address configured".to_string()),
            ),
            PortType::TcpClient | PortType::TcpListener | PortType::Udp if self.tcp_port == 0 => {
                Err(DeviceError::Configuration(
                    "port number must not be zero".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    pub fn from_json(json: &str) -> DeviceResult<Vec<DeviceConfig>> {
        serde_json::from_str(json)
            .map_err(|e| DeviceError::Configuration(format!("Invalid device configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_json_with_defaults() {
        let configs = DeviceConfig::from_json(
            r#"[{"port_type": "serial", "path": "/dev/ttyUSB0", "baud_rate": 19200, "driver_name": "flarm", "bulk_baud_rate": 57600},
                {"port_type": "tcp_client", "ip_address": "192.168.1.1", "tcp_port": 2000}]"#,
        )
        .unwrap();

        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].port_type, PortType::Serial);
        assert_eq!(configs[0].bulk_baud_rate(), Some(57600));
        assert!(configs[0].is_available());
        assert_eq!(configs[1].driver_name, "generic");
        assert_eq!(configs[1].port_name(), "192.168.1.1:2000");
        assert!(configs[1].validate().is_ok());
    }

    #[test]
    fn rejects_incomplete_configurations() {
        let config = DeviceConfig {
            port_type: PortType::Serial,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DeviceError::Configuration(_))));
        assert!(!DeviceConfig::default().is_available());
        assert_eq!(DeviceConfig::serial("/dev/ttyS0", 9600, "flarm").bulk_baud_rate(), None);
    }
}
