//! Byte-stream transports
//!
//! A [`Port`] is shared between the receive thread, the thread that owns
//! the descriptor and whatever thread runs a blocking device command, so
//! every method takes `&self` and the implementation synchronises itself.

mod dump;
mod factory;
mod net;
mod serial;
mod stream;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::constants::PORT_POLL_INTERVAL;
use crate::error::{DeviceError, DeviceResult};
use crate::operation::OperationEnvironment;

pub use dump::DumpPort;
pub use factory::{PortFactory, SystemPortFactory};
pub use net::{TcpClientConnector, TcpListenerConnector, UdpStream};
pub use serial::{SerialStream, list_ports};
pub use stream::{Connector, RawStream, StreamPort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Connected and usable
    Ready,

    /// Waiting for the transport to connect
    Limbo,

    /// Hard I/O failure; the port must be reopened
    Failed,
}

/// Receiver of the bytes a port's receive thread reads
pub trait DataHandler: Send + Sync {
    /// Runs on the receive thread, never on the thread owning the port
    fn data_received(&self, data: &[u8]);
}

pub trait Port: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> PortState;

    /// Blocks until the transport is connected
    fn wait_connected(&self, env: &dyn OperationEnvironment) -> DeviceResult<()>;

    /// Writes as much of `data` as the transport accepts
    fn write(&self, data: &[u8]) -> DeviceResult<usize>;

    /// Reads what arrives within one poll interval; `Ok(0)` if nothing did
    fn read(&self, buffer: &mut [u8]) -> DeviceResult<usize>;

    /// Discards pending input
    fn flush(&self) -> DeviceResult<()>;

    /// Blocks until all written bytes have left the local buffer
    fn drain(&self) -> DeviceResult<()>;

    fn baud_rate(&self) -> Option<u32>;

    fn set_baud_rate(&self, baud_rate: u32) -> DeviceResult<()>;

    fn set_handler(&self, handler: Arc<dyn DataHandler>);

    fn start_rx_thread(&self) -> DeviceResult<()>;

    /// Stops the receive thread and waits for it to exit
    fn stop_rx_thread(&self) -> DeviceResult<()>;

    fn is_rx_thread_running(&self) -> bool;

    /// Writes all of `data`, failing with [`DeviceError::Timeout`] when the
    /// transport stalls for longer than `timeout`
    fn full_write(
        &self,
        data: &[u8],
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<()> {
        let deadline = Instant::now() + timeout;
        let mut rest = data;
        while !rest.is_empty() {
            env.check_cancelled()?;
            let n = self.write(rest)?;
            rest = &rest[n..];
            if n == 0 {
                if Instant::now() >= deadline {
                    return Err(DeviceError::Timeout);
                }
                env.sleep(Duration::from_millis(1))?;
            }
        }
        Ok(())
    }

    /// Blocks until at least one byte arrived. Fails with
    /// [`DeviceError::Timeout`] after `timeout` and with
    /// [`DeviceError::Cancelled`] within one poll interval of cancellation.
    fn wait_read(
        &self,
        buffer: &mut [u8],
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            env.check_cancelled()?;
            let n = self.read(buffer)?;
            if n > 0 {
                return Ok(n);
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::Timeout);
            }
        }
    }

    /// Reads exactly `buffer.len()` bytes
    fn full_read(
        &self,
        buffer: &mut [u8],
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<()> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buffer.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeviceError::Timeout);
            }
            filled += self.wait_read(&mut buffer[filled..], env, remaining)?;
        }
        Ok(())
    }

    /// Reads a single byte
    fn read_byte(&self, env: &dyn OperationEnvironment, timeout: Duration) -> DeviceResult<u8> {
        let mut byte = [0u8; 1];
        self.full_read(&mut byte, env, timeout)?;
        Ok(byte[0])
    }

    /// Discards input until the line stays quiet for `quiet` or `timeout`
    /// expires
    fn full_flush(
        &self,
        env: &dyn OperationEnvironment,
        quiet: Duration,
        timeout: Duration,
    ) -> DeviceResult<()> {
        let deadline = Instant::now() + timeout;
        let mut buffer = [0u8; 256];
        self.flush()?;
        loop {
            match self.wait_read(&mut buffer, env, quiet.max(PORT_POLL_INTERVAL)) {
                Ok(_) if Instant::now() < deadline => continue,
                Ok(_) | Err(DeviceError::Timeout) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Stops the receive thread for the lifetime of the guard so replies can be
/// read synchronously, and restarts it on every exit path
pub struct RxSuspend<'a> {
    port: &'a dyn Port,
    was_running: bool,
}

impl<'a> RxSuspend<'a> {
    pub fn new(port: &'a dyn Port) -> DeviceResult<Self> {
        let was_running = port.is_rx_thread_running();
        if was_running {
            port.stop_rx_thread()?;
        }
        Ok(RxSuspend { port, was_running })
    }
}

impl Drop for RxSuspend<'_> {
    fn drop(&mut self) {
        if self.was_running {
            if let Err(e) = self.port.start_rx_thread() {
                warn!("Failed to restart receive thread of {}: {}", self.port.name(), e);
            }
        }
    }
}

/// Printable rendering of raw bytes for logs: ASCII as is, anything else
/// as `\xNN`
pub(crate) fn format_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bytes_for_logs() {
        assert_eq!(format_bytes(b"$A*00\r\n"), "$A*00\\r\\n");
        assert_eq!(format_bytes(&[0x73, 0x78, 0x01]), "sx\\x01");
    }
}
