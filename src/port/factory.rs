use std::sync::Arc;

use super::{Port, SerialStream, StreamPort, TcpClientConnector, TcpListenerConnector, UdpStream};
use crate::config::{DeviceConfig, PortType};
use crate::error::{DeviceError, DeviceResult};

/// Creates the transport for a device configuration
pub trait PortFactory: Send + Sync {
    fn open(&self, config: &DeviceConfig) -> DeviceResult<Arc<dyn Port>>;
}

/// Opens the operating system's transports
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortFactory;

impl PortFactory for SystemPortFactory {
    fn open(&self, config: &DeviceConfig) -> DeviceResult<Arc<dyn Port>> {
        config.validate()?;
        let name = config.port_name();

        let port = match config.port_type {
            PortType::Disabled => {
                return Err(DeviceError::Configuration(format!("{} is disabled", name)));
            }
            PortType::Serial | PortType::Rfcomm => {
                let stream = SerialStream::open(&config.path, config.baud_rate)?;
                StreamPort::new(name, Box::new(stream))?
            }
            PortType::TcpClient => StreamPort::with_connector(
                name,
                Box::new(TcpClientConnector::new(&config.ip_address, config.tcp_port)),
            ),
            PortType::TcpListener => StreamPort::with_connector(
                name,
                Box::new(TcpListenerConnector::bind(&config.ip_address, config.tcp_port)?),
            ),
            PortType::Udp => {
                let stream = UdpStream::bind(&config.ip_address, config.tcp_port)?;
                StreamPort::new(name, Box::new(stream))?
            }
        };
        Ok(Arc::new(port))
    }
}
