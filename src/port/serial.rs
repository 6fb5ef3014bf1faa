use std::io::{self, Read, Write};

use tracing::info;

use super::RawStream;
use crate::constants::PORT_POLL_INTERVAL;
use crate::error::{DeviceError, DeviceResult};

/// Serial port transport, also used for bound RFCOMM channels
pub struct SerialStream {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialStream {
    pub fn open(path: &str, baud_rate: u32) -> DeviceResult<SerialStream> {
        let port = serialport::new(path, baud_rate)
            .timeout(PORT_POLL_INTERVAL)
            .open()
            .map_err(|e| DeviceError::Communication(format!("{}: {}", path, e)))?;

        info!("Opened {} at {} baud", path, baud_rate);
        Ok(SerialStream { port })
    }
}

impl RawStream for SerialStream {
    fn read_some(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.port.read(buffer).or_else(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                Ok(0)
            } else {
                Err(e)
            }
        })
    }

    fn write_some(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.write(data)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    /// Blocks until the output buffer has been transmitted
    fn drain(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn baud_rate(&self) -> Option<u32> {
        self.port.baud_rate().ok()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.port.set_baud_rate(baud_rate).map_err(io::Error::from)
    }

    fn try_clone(&self) -> io::Result<Box<dyn RawStream>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialStream { port }))
    }
}

/// Names of the serial ports present on this system
pub fn list_ports() -> DeviceResult<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| DeviceError::Communication(format!("{:?}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
