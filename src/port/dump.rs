use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::info;

use super::{DataHandler, Port, PortState, format_bytes};
use crate::error::DeviceResult;
use crate::operation::OperationEnvironment;

/// When dumping is switched on, and until when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DumpMode {
    Off,
    On,
    Until(Instant),
}

#[derive(Debug)]
struct DumpSwitch {
    mode: Mutex<DumpMode>,
}

impl DumpSwitch {
    fn is_enabled(&self) -> bool {
        let mut mode = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        match *mode {
            DumpMode::Off => false,
            DumpMode::On => true,
            DumpMode::Until(until) if Instant::now() < until => true,
            DumpMode::Until(_) => {
                *mode = DumpMode::Off;
                false
            }
        }
    }

    fn set(&self, new: DumpMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = new;
    }
}

struct DumpHandler {
    name: String,
    switch: Arc<DumpSwitch>,
    inner: Arc<dyn DataHandler>,
}

impl DataHandler for DumpHandler {
    fn data_received(&self, data: &[u8]) {
        if self.switch.is_enabled() {
            info!("{} received {}", self.name, format_bytes(data));
        }
        self.inner.data_received(data);
    }
}

/// Decorator logging all traffic of the wrapped port while enabled
pub struct DumpPort {
    inner: Arc<dyn Port>,
    switch: Arc<DumpSwitch>,
}

impl DumpPort {
    pub fn new(inner: Arc<dyn Port>) -> Self {
        DumpPort {
            inner,
            switch: Arc::new(DumpSwitch {
                mode: Mutex::new(DumpMode::Off),
            }),
        }
    }

    pub fn enable(&self) {
        self.switch.set(DumpMode::On);
    }

    pub fn disable(&self) {
        self.switch.set(DumpMode::Off);
    }

    /// Dumps traffic for the given duration, e.g. while a user watches a
    /// failing declaration
    pub fn enable_temporarily(&self, duration: Duration) {
        self.switch.set(DumpMode::Until(Instant::now() + duration));
    }

    pub fn is_enabled(&self) -> bool {
        self.switch.is_enabled()
    }
}

impl Port for DumpPort {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn state(&self) -> PortState {
        self.inner.state()
    }

    fn wait_connected(&self, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.inner.wait_connected(env)
    }

    fn write(&self, data: &[u8]) -> DeviceResult<usize> {
        let n = self.inner.write(data)?;
        if self.switch.is_enabled() {
            info!("{} sent {}", self.name(), format_bytes(&data[..n]));
        }
        Ok(n)
    }

    fn read(&self, buffer: &mut [u8]) -> DeviceResult<usize> {
        let n = self.inner.read(buffer)?;
        if n > 0 && self.switch.is_enabled() {
            info!("{} read {}", self.name(), format_bytes(&buffer[..n]));
        }
        Ok(n)
    }

    fn flush(&self) -> DeviceResult<()> {
        self.inner.flush()
    }

    fn drain(&self) -> DeviceResult<()> {
        self.inner.drain()
    }

    fn baud_rate(&self) -> Option<u32> {
        self.inner.baud_rate()
    }

    fn set_baud_rate(&self, baud_rate: u32) -> DeviceResult<()> {
        if self.switch.is_enabled() {
            info!("{} set baud rate {}", self.name(), baud_rate);
        }
        self.inner.set_baud_rate(baud_rate)
    }

    fn set_handler(&self, handler: Arc<dyn DataHandler>) {
        self.inner.set_handler(Arc::new(DumpHandler {
            name: self.inner.name().to_string(),
            switch: self.switch.clone(),
            inner: handler,
        }));
    }

    fn start_rx_thread(&self) -> DeviceResult<()> {
        self.inner.start_rx_thread()
    }

    fn stop_rx_thread(&self) -> DeviceResult<()> {
        self.inner.stop_rx_thread()
    }

    fn is_rx_thread_running(&self) -> bool {
        self.inner.is_rx_thread_running()
    }
}
