use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};

use super::{DataHandler, Port, PortState};
use crate::constants::RX_BUFFER_SIZE;
use crate::error::{DeviceError, DeviceResult};
use crate::operation::OperationEnvironment;

/// Blocking byte stream a [`StreamPort`] is built on
pub trait RawStream: Send {
    /// Reads whatever arrives within the stream's poll timeout.
    /// `Ok(0)` means nothing arrived; a closed peer is an error.
    fn read_some(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    fn write_some(&mut self, data: &[u8]) -> io::Result<usize>;

    fn clear_input(&mut self) -> io::Result<()>;

    fn drain(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn baud_rate(&self) -> Option<u32> {
        None
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Second handle to the same stream, used by the receive side
    fn try_clone(&self) -> io::Result<Box<dyn RawStream>>;
}

/// Establishes the stream of a port that starts out unconnected
pub trait Connector: Send {
    fn connect(&mut self, env: &dyn OperationEnvironment) -> DeviceResult<Box<dyn RawStream>>;
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the receive thread
struct Shared {
    name: String,
    reader: Mutex<Option<Box<dyn RawStream>>>,
    handler: Mutex<Option<Arc<dyn DataHandler>>>,
    state: Mutex<PortState>,
}

impl Shared {
    fn fail(&self, e: &io::Error) {
        error!("Port {} failed: {}", self.name, e);
        *lock(&self.state) = PortState::Failed;
    }

    /// One poll of the reader. Timeouts are `Ok(0)`.
    fn read(&self, buffer: &mut [u8]) -> DeviceResult<usize> {
        let mut reader = lock(&self.reader);
        let Some(reader) = reader.as_mut() else {
            return Err(DeviceError::Communication(format!(
                "{} is not connected",
                self.name
            )));
        };

        match reader.read_some(buffer) {
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => {
                self.fail(&e);
                Err(DeviceError::Io(e))
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

struct RxThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

fn rx_loop(shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    let mut buffer = [0u8; RX_BUFFER_SIZE];
    while !stop.load(Ordering::Acquire) {
        let n = match shared.read(&mut buffer) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(_) => break,
        };

        trace!("{} received {} bytes", shared.name, n);
        let handler = lock(&shared.handler).clone();
        if let Some(handler) = handler {
            handler.data_received(&buffer[..n]);
        }
    }
    debug!("Receive thread of {} exited", shared.name);
}

/// [`Port`] over a [`RawStream`], with an optional [`Connector`] for
/// transports that connect after the port was created
pub struct StreamPort {
    shared: Arc<Shared>,
    writer: Mutex<Option<Box<dyn RawStream>>>,
    connector: Mutex<Option<Box<dyn Connector>>>,
    rx_thread: Mutex<Option<RxThread>>,
}

impl StreamPort {
    /// Port over an already connected stream
    pub fn new(name: impl Into<String>, stream: Box<dyn RawStream>) -> DeviceResult<Self> {
        let port = Self::unconnected(name.into(), None);
        port.install(stream)?;
        Ok(port)
    }

    /// Port in `Limbo` until `wait_connected()` runs the connector
    pub fn with_connector(name: impl Into<String>, connector: Box<dyn Connector>) -> Self {
        Self::unconnected(name.into(), Some(connector))
    }

    fn unconnected(name: String, connector: Option<Box<dyn Connector>>) -> Self {
        StreamPort {
            shared: Arc::new(Shared {
                name,
                reader: Mutex::new(None),
                handler: Mutex::new(None),
                state: Mutex::new(PortState::Limbo),
            }),
            writer: Mutex::new(None),
            connector: Mutex::new(connector),
            rx_thread: Mutex::new(None),
        }
    }

    fn install(&self, stream: Box<dyn RawStream>) -> DeviceResult<()> {
        let reader = stream.try_clone()?;
        *lock(&self.shared.reader) = Some(reader);
        *lock(&self.writer) = Some(stream);
        *lock(&self.shared.state) = PortState::Ready;
        Ok(())
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn RawStream>) -> io::Result<T>,
    ) -> DeviceResult<T> {
        let mut writer = lock(&self.writer);
        let Some(writer) = writer.as_mut() else {
            return Err(DeviceError::Communication(format!(
                "{} is not connected",
                self.shared.name
            )));
        };
        f(writer).map_err(|e| {
            if !is_transient(&e) && e.kind() != io::ErrorKind::Unsupported {
                self.shared.fail(&e);
            }
            DeviceError::Io(e)
        })
    }
}

impl Port for StreamPort {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn state(&self) -> PortState {
        *lock(&self.shared.state)
    }

    fn wait_connected(&self, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        match self.state() {
            PortState::Ready => return Ok(()),
            PortState::Failed => {
                return Err(DeviceError::Communication(format!(
                    "{} has failed",
                    self.shared.name
                )));
            }
            PortState::Limbo => {}
        }

        let mut connector = lock(&self.connector);
        let Some(connector) = connector.as_mut() else {
            return Err(DeviceError::Communication(format!(
                "{} cannot connect",
                self.shared.name
            )));
        };
        let stream = connector.connect(env)?;
        self.install(stream)
    }

    fn write(&self, data: &[u8]) -> DeviceResult<usize> {
        match self.with_writer(|w| w.write_some(data)) {
            Err(DeviceError::Io(e)) if is_transient(&e) => Ok(0),
            result => result,
        }
    }

    fn read(&self, buffer: &mut [u8]) -> DeviceResult<usize> {
        self.shared.read(buffer)
    }

    fn flush(&self) -> DeviceResult<()> {
        let mut reader = lock(&self.shared.reader);
        match reader.as_mut() {
            Some(reader) => reader.clear_input().map_err(DeviceError::Io),
            None => Ok(()),
        }
    }

    fn drain(&self) -> DeviceResult<()> {
        self.with_writer(|w| w.drain())
    }

    fn baud_rate(&self) -> Option<u32> {
        lock(&self.writer).as_ref().and_then(|w| w.baud_rate())
    }

    fn set_baud_rate(&self, baud_rate: u32) -> DeviceResult<()> {
        debug!("{}: switching to {} baud", self.shared.name, baud_rate);
        self.with_writer(|w| w.set_baud_rate(baud_rate))
    }

    fn set_handler(&self, handler: Arc<dyn DataHandler>) {
        *lock(&self.shared.handler) = Some(handler);
    }

    fn start_rx_thread(&self) -> DeviceResult<()> {
        let mut rx_thread = lock(&self.rx_thread);
        match rx_thread.take() {
            Some(rx) if !rx.handle.is_finished() => {
                *rx_thread = Some(rx);
                return Ok(());
            }
            Some(rx) => {
                let _ = rx.handle.join();
            }
            None => {}
        }
        if self.state() != PortState::Ready {
            return Err(DeviceError::Communication(format!(
                "{} is not connected",
                self.shared.name
            )));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let shared = self.shared.clone();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("rx {}", self.shared.name))
            .spawn(move || rx_loop(shared, thread_stop))?;

        *rx_thread = Some(RxThread { stop, handle });
        Ok(())
    }

    fn stop_rx_thread(&self) -> DeviceResult<()> {
        let Some(rx) = lock(&self.rx_thread).take() else {
            return Ok(());
        };

        rx.stop.store(true, Ordering::Release);
        // the receive thread may stop itself from inside a handler
        if rx.handle.thread().id() != thread::current().id() && rx.handle.join().is_err() {
            return Err(DeviceError::Communication(format!(
                "Receive thread of {} panicked",
                self.shared.name
            )));
        }
        Ok(())
    }

    fn is_rx_thread_running(&self) -> bool {
        lock(&self.rx_thread)
            .as_ref()
            .is_some_and(|rx| !rx.handle.is_finished())
    }
}

impl Drop for StreamPort {
    fn drop(&mut self) {
        let _ = self.stop_rx_thread();
    }
}
