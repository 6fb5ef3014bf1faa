//! One configured device: its port, its driver and the lifecycle around them
//!
//! Opening runs as a background job. Received bytes are dispatched on the
//! port's receive thread: raw bytes to the driver, then lines to the
//! primary driver, the pass-through driver and finally the generic NMEA
//! parser. The results are merged into the shared [`Blackboard`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::blackboard::Blackboard;
use crate::config::DeviceConfig;
use crate::device::{
    Declaration, Device, DeviceArgs, RadioFrequency, RecordedFlightInfo, RecordedFlightList,
};
use crate::error::{DeviceError, DeviceResult};
use crate::i18n::MessageCatalog;
use crate::info::{ExternalSettings, NmeaInfo, Stamped};
use crate::job::AsyncJob;
use crate::manager::{EchoTolerance, Timing};
use crate::nmea::{LineSplitter, NmeaParser, checksum};
use crate::operation::{NullOperationEnvironment, OperationEnvironment};
use crate::port::{DataHandler, DumpPort, Port, PortFactory, PortState};
use crate::registry::{DriverEntry, DriverFlags, DriverRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Closed,
    /// The open job is running
    Opening,
    Open,
    /// The last open attempt failed; `auto_reopen` retries after the backoff
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ballast {
    pub fraction: f64,
    pub overload: f64,
}

/// The values a settings provider wants on the devices
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SettingsSnapshot {
    pub mac_cready: Option<f64>,
    pub ballast: Option<Ballast>,
    pub bugs: Option<f64>,
}

/// Source of the settings pushed to devices with `SEND_SETTINGS`
pub trait SettingsProvider: Send + Sync {
    fn current_settings(&self) -> SettingsSnapshot;
}

/// What a descriptor shares with its manager
#[derive(Clone)]
pub struct DescriptorContext {
    pub registry: Arc<DriverRegistry>,
    pub factory: Arc<dyn PortFactory>,
    pub blackboard: Arc<Blackboard>,
    pub catalog: Arc<dyn MessageCatalog>,
    pub timing: Timing,
    pub echo: EchoTolerance,
}

/// An open port with the devices bound to it
struct Connection {
    port: Arc<DumpPort>,
    device: Option<Arc<dyn Device>>,
    second_device: Option<Arc<dyn Device>>,
    dispatcher: Arc<Dispatcher>,
}

impl Connection {
    fn shutdown(self) {
        if let Err(e) = self.port.stop_rx_thread() {
            warn!("Failed to stop receive thread of {}: {}", self.port.name(), e);
        }
        self.dispatcher.detach();
    }
}

/// Everything behind the descriptor's one mutex
struct State {
    lifecycle: Lifecycle,
    connection: Option<Connection>,
    failures: u32,
    error_message: Option<String>,
    open_attempt: Option<Instant>,
    opened_at: Option<Instant>,
    closed_at: Option<Instant>,

    last_received: Option<Instant>,
    /// Start of the current link-timeout window
    activity_since: Instant,

    /// Values this side sent, to recognise the device echoing them back
    settings_sent: ExternalSettings,
    /// Changes made on the device, waiting for `take_device_settings`
    settings_received: ExternalSettings,
    last_pushed: SettingsSnapshot,
    ticks: u64,
}

impl State {
    /// Forgets what was exchanged with the instrument of the last session
    fn clear_session(&mut self) {
        self.settings_sent = ExternalSettings::default();
        self.settings_received = ExternalSettings::default();
        self.last_pushed = SettingsSnapshot::default();
        self.ticks = 0;
    }
}

struct Shared {
    config: DeviceConfig,
    driver: DriverEntry,
    second_driver: Option<DriverEntry>,
    context: DescriptorContext,
    state: Mutex<State>,
    borrowed: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn name(&self) -> String {
        self.config.port_name()
    }

    fn connect(&self, env: &dyn OperationEnvironment, shared: &Arc<Shared>) -> DeviceResult<Connection> {
        let port = self.context.factory.open(&self.config)?;
        port.wait_connected(env)?;
        env.check_cancelled()?;

        let port = Arc::new(DumpPort::new(port));
        let make = |entry: &DriverEntry| {
            entry.factory.map(|factory| {
                factory(DeviceArgs {
                    port: port.clone() as Arc<dyn Port>,
                    config: self.config.clone(),
                })
            })
        };
        let device = make(&self.driver);
        let second_device = self.second_driver.as_ref().and_then(make);

        let dispatcher = Arc::new(Dispatcher {
            shared: shared.clone(),
            devices: Mutex::new(Some((device.clone(), second_device.clone()))),
            splitter: Mutex::new(LineSplitter::new()),
            parser: Mutex::new(NmeaParser::new()),
        });
        port.set_handler(dispatcher.clone());
        if let Err(e) = port.start_rx_thread() {
            dispatcher.detach();
            return Err(e);
        }

        let enabled = match &device {
            Some(device) => device.enable_nmea(env),
            None => Ok(()),
        };
        let connection = Connection {
            port,
            device,
            second_device,
            dispatcher,
        };
        if let Err(e) = enabled {
            if e.is_cancelled() {
                connection.shutdown();
                return Err(e);
            }
            warn!("{}: failed to enable NMEA output: {}", self.name(), e);
        }
        Ok(connection)
    }

    fn finish_open(&self, result: DeviceResult<Connection>, cancelled: bool) {
        let mut state = self.lock();
        match result {
            Ok(connection) if !cancelled => {
                info!("Opened {} with driver {}", self.name(), self.driver.name);
                let now = Instant::now();
                state.connection = Some(connection);
                state.lifecycle = Lifecycle::Open;
                state.failures = 0;
                state.error_message = None;
                state.opened_at = Some(now);
                state.activity_since = now;
            }
            Ok(connection) => {
                state.lifecycle = Lifecycle::Closed;
                drop(state);
                connection.shutdown();
            }
            Err(e) if e.is_cancelled() || cancelled => {
                debug!("Opening {} was cancelled", self.name());
                state.lifecycle = Lifecycle::Closed;
            }
            Err(e) => {
                let message = format!(
                    "{} {}: {}",
                    self.context.catalog.translate("Unable to open port"),
                    self.name(),
                    e
                );
                error!("{}", message);
                state.lifecycle = Lifecycle::Failed;
                state.failures += 1;
                state.error_message = Some(message);
            }
        }
    }

    /// Echo filter for settings a device reported
    fn device_settings_received(&self, reported: &ExternalSettings) {
        fn pick<T: Clone>(
            dst: &mut Option<Stamped<T>>,
            reported: &Option<Stamped<T>>,
            sent: &Option<Stamped<T>>,
            is_echo: impl Fn(&T, &T) -> bool,
        ) {
            if let Some(value) = reported {
                let echo = sent
                    .as_ref()
                    .is_some_and(|sent| is_echo(&sent.value, &value.value));
                if !echo {
                    *dst = Some(value.clone());
                }
            }
        }

        if !self.config.sync_from_device {
            return;
        }

        let echo = self.context.echo;
        let mut state = self.lock();
        let State {
            settings_sent: sent,
            settings_received: received,
            ..
        } = &mut *state;

        pick(&mut received.mac_cready, &reported.mac_cready, &sent.mac_cready, |a, b| {
            (a - b).abs() <= echo.mac_cready
        });
        pick(
            &mut received.ballast_fraction,
            &reported.ballast_fraction,
            &sent.ballast_fraction,
            |a, b| (a - b).abs() <= echo.ballast,
        );
        pick(
            &mut received.ballast_overload,
            &reported.ballast_overload,
            &sent.ballast_overload,
            |a, b| (a - b).abs() <= echo.ballast,
        );
        pick(&mut received.bugs, &reported.bugs, &sent.bugs, |a, b| (a - b).abs() <= echo.bugs);
        pick(&mut received.qnh, &reported.qnh, &sent.qnh, |a, b| (a - b).abs() <= echo.qnh);
        pick(&mut received.volume, &reported.volume, &sent.volume, |a, b| a == b);
    }
}

/// The port's data handler
struct Dispatcher {
    shared: Arc<Shared>,
    /// Cleared on close so the port no longer keeps the devices alive
    devices: Mutex<Option<(Option<Arc<dyn Device>>, Option<Arc<dyn Device>>)>>,
    splitter: Mutex<LineSplitter>,
    parser: Mutex<NmeaParser>,
}

impl Dispatcher {
    fn detach(&self) {
        *self.devices.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn line_received(
        &self,
        line: &str,
        devices: &(Option<Arc<dyn Device>>, Option<Arc<dyn Device>>),
        info: &mut NmeaInfo,
    ) {
        if !checksum::verify(line) {
            return;
        }

        let (device, second_device) = devices;
        if device.as_ref().is_some_and(|d| d.parse_line(line, info)) {
            return;
        }
        if second_device.as_ref().is_some_and(|d| d.parse_line(line, info)) {
            return;
        }
        self.parser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .parse_line(line, info);
    }
}

impl DataHandler for Dispatcher {
    fn data_received(&self, data: &[u8]) {
        let Some(devices) = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return;
        };

        let now = Instant::now();
        let mut info = NmeaInfo::new(now);
        info.alive = Some(now);

        let consumed = devices.0.as_ref().is_some_and(|d| d.data_received(data, &mut info));
        if !consumed {
            let mut splitter = self.splitter.lock().unwrap_or_else(PoisonError::into_inner);
            splitter.push(data, |line| self.line_received(line, &devices, &mut info));
        }

        self.shared.lock().last_received = Some(now);
        if !info.settings.is_empty() {
            self.shared.device_settings_received(&info.settings);
        }
        self.shared.context.blackboard.merge(&info);
    }
}

/// Exclusive access to an open descriptor's devices and port.
///
/// Returning the lease brings the device back to NMEA mode.
pub struct DeviceLease<'a> {
    descriptor: &'a DeviceDescriptor,
    port: Arc<DumpPort>,
    device: Arc<dyn Device>,
    second_device: Option<Arc<dyn Device>>,
    /// Leases taken by the ticker leave the device alone on return
    restore: bool,
}

impl DeviceLease<'_> {
    pub fn device(&self) -> &dyn Device {
        &*self.device
    }

    pub fn second_device(&self) -> Option<&dyn Device> {
        self.second_device.as_deref()
    }

    pub fn port(&self) -> &DumpPort {
        &self.port
    }
}

impl Drop for DeviceLease<'_> {
    fn drop(&mut self) {
        let shared = &self.descriptor.shared;
        if self.restore {
            if let Err(e) = self.device.enable_nmea(&NullOperationEnvironment) {
                warn!("{}: failed to restore NMEA mode: {}", shared.name(), e);
            }
            shared.lock().activity_since = Instant::now();
        }
        shared.borrowed.store(false, Ordering::Release);
    }
}

pub struct DeviceDescriptor {
    index: usize,
    shared: Arc<Shared>,
    open_job: Mutex<Option<AsyncJob<()>>>,
    settings_provider: Mutex<Option<Arc<dyn SettingsProvider>>>,
}

impl DeviceDescriptor {
    pub fn new(index: usize, config: DeviceConfig, context: DescriptorContext) -> Self {
        let driver = *context.registry.find_driver_by_name(&config.driver_name);
        if context.registry.is_fallback(&driver) && !driver.name.eq_ignore_ascii_case(&config.driver_name) {
            warn!("Unknown driver {}, using {}", config.driver_name, driver.name);
        }

        // a second driver only makes sense behind one that can forward
        let second_driver = match config.second_driver() {
            Some(name) if driver.supports(DriverFlags::PASS_THROUGH) => {
                context.registry.lookup(name).copied()
            }
            Some(name) => {
                warn!("Driver {} cannot forward to {}", driver.name, name);
                None
            }
            None => None,
        };

        DeviceDescriptor {
            index,
            shared: Arc::new(Shared {
                config,
                driver,
                second_driver,
                context,
                state: Mutex::new(State {
                    lifecycle: Lifecycle::Closed,
                    connection: None,
                    failures: 0,
                    error_message: None,
                    open_attempt: None,
                    opened_at: None,
                    closed_at: None,
                    last_received: None,
                    activity_since: Instant::now(),
                    settings_sent: ExternalSettings::default(),
                    settings_received: ExternalSettings::default(),
                    last_pushed: SettingsSnapshot::default(),
                    ticks: 0,
                }),
                borrowed: AtomicBool::new(false),
            }),
            open_job: Mutex::new(None),
            settings_provider: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    pub fn driver(&self) -> &DriverEntry {
        &self.shared.driver
    }

    pub fn second_driver(&self) -> Option<&DriverEntry> {
        self.shared.second_driver.as_ref()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lock().lifecycle
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle() == Lifecycle::Open
    }

    pub fn is_borrowed(&self) -> bool {
        self.shared.borrowed.load(Ordering::Acquire)
    }

    /// The open job is running
    pub fn is_occupied(&self) -> bool {
        self.lock_job().as_ref().is_some_and(|job| !job.is_finished())
    }

    pub fn failures(&self) -> u32 {
        self.shared.lock().failures
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared.lock().error_message.clone()
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.shared.lock().opened_at
    }

    pub fn closed_at(&self) -> Option<Instant> {
        self.shared.lock().closed_at
    }

    /// Data arrived within the link timeout
    pub fn is_alive(&self) -> bool {
        let timeout = self.shared.context.timing.link_timeout;
        self.shared
            .lock()
            .last_received
            .is_some_and(|at| at.elapsed() <= timeout)
    }

    pub fn port(&self) -> Option<Arc<DumpPort>> {
        self.shared.lock().connection.as_ref().map(|c| c.port.clone())
    }

    pub fn set_settings_provider(&self, provider: Arc<dyn SettingsProvider>) {
        *self
            .settings_provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(provider);
    }

    /// Settings changed on the device since the last call
    pub fn take_device_settings(&self) -> ExternalSettings {
        std::mem::take(&mut self.shared.lock().settings_received)
    }

    fn lock_job(&self) -> MutexGuard<'_, Option<AsyncJob<()>>> {
        self.open_job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reaps a finished open job
    fn reap_job(&self) {
        let mut job = self.lock_job();
        if job.as_ref().is_some_and(AsyncJob::is_finished) {
            if let Some(mut job) = job.take() {
                job.join();
            }
        }
    }

    /// Starts opening the port in the background. Returns immediately;
    /// watch [`lifecycle`](Self::lifecycle) for the outcome.
    pub fn open(&self) -> DeviceResult<()> {
        if !self.shared.config.is_available() {
            return Err(DeviceError::Configuration(format!(
                "{} is disabled",
                self.shared.name()
            )));
        }

        self.reap_job();
        let mut job = self.lock_job();
        if job.is_some() {
            return Ok(());
        }

        {
            let mut state = self.shared.lock();
            if state.lifecycle == Lifecycle::Open {
                return Ok(());
            }
            state.lifecycle = Lifecycle::Opening;
            state.open_attempt = Some(Instant::now());
        }

        info!("Opening {}", self.shared.name());
        let shared = self.shared.clone();
        let started = AsyncJob::start(&format!("open {}", self.shared.name()), move |env| {
            let result = shared.connect(env, &shared);
            shared.finish_open(result, env.is_cancelled());
        });

        match started {
            Ok(started) => {
                *job = Some(started);
                Ok(())
            }
            Err(e) => {
                self.shared.lock().lifecycle = Lifecycle::Failed;
                Err(e)
            }
        }
    }

    /// Blocks until a running open job has finished
    pub fn wait_open(&self, timeout: Duration) -> Lifecycle {
        let deadline = Instant::now() + timeout;
        while self.lifecycle() == Lifecycle::Opening && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        self.reap_job();
        self.lifecycle()
    }

    /// Cancels a running open job and releases the port. Closing a
    /// descriptor that was never opened does nothing.
    pub fn close(&self) -> DeviceResult<()> {
        if self.is_borrowed() {
            return Err(DeviceError::Busy);
        }

        let job = self.lock_job().take();
        if let Some(mut job) = job {
            job.cancel();
            job.join();
        }

        let connection = {
            let mut state = self.shared.lock();
            if state.lifecycle == Lifecycle::Closed && state.connection.is_none() {
                return Ok(());
            }
            state.lifecycle = Lifecycle::Closed;
            state.closed_at = Some(Instant::now());
            state.last_received = None;
            state.clear_session();
            state.connection.take()
        };

        if let Some(connection) = connection {
            info!("Closing {}", self.shared.name());
            connection.shutdown();
        }
        Ok(())
    }

    pub fn reopen(&self) -> DeviceResult<()> {
        self.close()?;
        self.open()
    }

    /// Retries a failed or broken port once the backoff has passed
    pub fn auto_reopen(&self) {
        if !self.shared.config.is_available() || self.is_borrowed() || self.is_occupied() {
            return;
        }

        let (due, broken) = {
            let state = self.shared.lock();
            let broken = state
                .connection
                .as_ref()
                .is_some_and(|c| c.port.state() == PortState::Failed);
            let needs_open = broken || state.lifecycle == Lifecycle::Failed;
            let backoff = self.shared.context.timing.reopen_backoff;
            let due = needs_open
                && state.open_attempt.is_none_or(|at| at.elapsed() >= backoff);
            (due, broken)
        };

        if due {
            if broken {
                warn!("Port {} failed", self.shared.name());
                self.shared.lock().failures += 1;
            }
            info!("Reopening {}", self.shared.name());
            if let Err(e) = self.reopen() {
                warn!("Cannot reopen {}: {}", self.shared.name(), e);
            }
        }
    }

    fn borrow_with(&self, restore: bool) -> Option<DeviceLease<'_>> {
        let (port, device, second_device) = {
            let state = self.shared.lock();
            let connection = state.connection.as_ref()?;
            if state.lifecycle != Lifecycle::Open || connection.port.state() != PortState::Ready {
                return None;
            }
            (
                connection.port.clone(),
                connection.device.clone()?,
                connection.second_device.clone(),
            )
        };

        self.shared
            .borrowed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        Some(DeviceLease {
            descriptor: self,
            port,
            device,
            second_device,
            restore,
        })
    }

    /// Exclusive access for a blocking command. `None` while the device is
    /// not open, has no driver or is already borrowed.
    pub fn try_borrow(&self) -> Option<DeviceLease<'_>> {
        self.borrow_with(true)
    }

    fn lease(&self) -> DeviceResult<DeviceLease<'_>> {
        if let Some(lease) = self.try_borrow() {
            return Ok(lease);
        }
        if self.is_borrowed() {
            Err(DeviceError::Busy)
        } else if self.is_open() {
            Err(DeviceError::Unsupported("commands on a generic NMEA device"))
        } else {
            Err(DeviceError::Communication(format!(
                "{} is not open",
                self.shared.name()
            )))
        }
    }

    /// Runs `f` on whichever device advertises `flag`. The primary device
    /// forwards the port when only the device behind it has the feature.
    fn with_capability<T>(
        &self,
        flag: DriverFlags,
        what: &'static str,
        env: &dyn OperationEnvironment,
        f: impl FnOnce(&dyn Device) -> DeviceResult<T>,
    ) -> DeviceResult<T> {
        let lease = self.lease()?;
        if self.shared.driver.supports(flag) {
            return f(lease.device());
        }

        let second = self
            .shared
            .second_driver
            .filter(|entry| entry.supports(flag))
            .and(lease.second_device());
        let Some(second) = second else {
            return Err(DeviceError::Unsupported(what));
        };

        lease.device().enable_pass_through(true, env)?;
        let result = f(second);
        // the forwarded device must be back in NMEA mode before the primary
        // takes the port again
        if let Err(e) = second.enable_nmea(env) {
            warn!("{}: failed to restore NMEA mode behind pass-through: {}", self.shared.name(), e);
        }
        if let Err(e) = lease.device().enable_pass_through(false, env) {
            warn!("{}: failed to leave pass-through mode: {}", self.shared.name(), e);
        }
        result
    }

    pub fn declare(&self, declaration: &Declaration, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        if !declaration.is_valid() {
            return Err(DeviceError::Configuration(
                "a declaration needs at least two valid turn points".to_string(),
            ));
        }
        self.with_capability(DriverFlags::DECLARE, "declaration", env, |device| {
            device.declare(declaration, env)
        })
    }

    pub fn read_flight_list(&self, env: &dyn OperationEnvironment) -> DeviceResult<RecordedFlightList> {
        self.with_capability(DriverFlags::LOGGER, "flight list", env, |device| {
            device.read_flight_list(env)
        })
    }

    pub fn download_flight(
        &self,
        flight: &RecordedFlightInfo,
        path: &Path,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        self.with_capability(DriverFlags::LOGGER, "flight download", env, |device| {
            device.download_flight(flight, path, env)
        })
    }

    pub fn read_setting(&self, name: &str, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        let lease = self.lease()?;
        lease.device().read_setting(name, env)
    }

    pub fn write_setting(&self, name: &str, value: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let lease = self.lease()?;
        lease.device().write_setting(name, value, env)
    }

    /// Sends one setting to every device on this port. Failures are
    /// logged; returns whether any device took the value.
    fn put(
        &self,
        what: &str,
        record: impl FnOnce(&mut ExternalSettings, Instant),
        send: impl Fn(&dyn Device) -> DeviceResult<()>,
    ) -> bool {
        if !self.shared.config.sync_to_device {
            return false;
        }
        let Some(lease) = self.borrow_with(false) else {
            return false;
        };

        record(&mut self.shared.lock().settings_sent, Instant::now());

        let mut sent = false;
        for device in std::iter::once(lease.device()).chain(lease.second_device()) {
            match send(device) {
                Ok(()) => sent = true,
                Err(DeviceError::Unsupported(_)) => {}
                Err(e) => warn!("{}: failed to send {}: {}", self.shared.name(), what, e),
            }
        }
        sent
    }

    pub fn put_mac_cready(&self, mac_cready: f64, env: &dyn OperationEnvironment) -> bool {
        self.put(
            "MacCready",
            |sent, at| sent.mac_cready = Some(Stamped { value: mac_cready, at }),
            |device| device.put_mac_cready(mac_cready, env),
        )
    }

    pub fn put_bugs(&self, bugs: f64, env: &dyn OperationEnvironment) -> bool {
        self.put(
            "bugs",
            |sent, at| sent.bugs = Some(Stamped { value: bugs, at }),
            |device| device.put_bugs(bugs, env),
        )
    }

    pub fn put_ballast(&self, ballast: Ballast, env: &dyn OperationEnvironment) -> bool {
        self.put(
            "ballast",
            |sent, at| {
                sent.ballast_fraction = Some(Stamped { value: ballast.fraction, at });
                sent.ballast_overload = Some(Stamped { value: ballast.overload, at });
            },
            |device| device.put_ballast(ballast.fraction, ballast.overload, env),
        )
    }

    pub fn put_qnh(&self, qnh: f64, env: &dyn OperationEnvironment) -> bool {
        self.put(
            "QNH",
            |sent, at| sent.qnh = Some(Stamped { value: qnh, at }),
            |device| device.put_qnh(qnh, env),
        )
    }

    pub fn put_volume(&self, volume: u32, env: &dyn OperationEnvironment) -> bool {
        self.put(
            "volume",
            |sent, at| sent.volume = Some(Stamped { value: volume, at }),
            |device| device.put_volume(volume, env),
        )
    }

    pub fn put_active_frequency(
        &self,
        frequency: RadioFrequency,
        name: &str,
        env: &dyn OperationEnvironment,
    ) -> bool {
        self.put("active frequency", |_, _| {}, |device| {
            device.put_active_frequency(frequency, name, env)
        })
    }

    pub fn put_standby_frequency(
        &self,
        frequency: RadioFrequency,
        name: &str,
        env: &dyn OperationEnvironment,
    ) -> bool {
        self.put("standby frequency", |_, _| {}, |device| {
            device.put_standby_frequency(frequency, name, env)
        })
    }

    /// Pushes the provider's values that changed since the last push
    fn push_settings(&self, env: &dyn OperationEnvironment) {
        if !self.shared.driver.supports(DriverFlags::SEND_SETTINGS) {
            return;
        }
        let provider = self
            .settings_provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(provider) = provider else {
            return;
        };

        let current = provider.current_settings();
        let last = self.shared.lock().last_pushed;
        if current == last {
            return;
        }

        if let Some(mac_cready) = current.mac_cready.filter(|_| current.mac_cready != last.mac_cready) {
            self.put_mac_cready(mac_cready, env);
        }
        if let Some(ballast) = current.ballast.filter(|_| current.ballast != last.ballast) {
            self.put_ballast(ballast, env);
        }
        if let Some(bugs) = current.bugs.filter(|_| current.bugs != last.bugs) {
            self.put_bugs(bugs, env);
        }
        self.shared.lock().last_pushed = current;
    }

    /// Link-timeout handling: the device went silent for a whole window
    fn check_link(&self, env: &dyn OperationEnvironment) {
        if self.shared.driver.supports(DriverFlags::NO_TIMEOUT) {
            return;
        }

        let timeout = self.shared.context.timing.link_timeout;
        let silent = {
            let state = self.shared.lock();
            let last = state
                .last_received
                .map_or(state.activity_since, |at| at.max(state.activity_since));
            last.elapsed() > timeout
        };
        if !silent {
            return;
        }

        let Some(lease) = self.borrow_with(false) else {
            return;
        };
        debug!("{}: no data for {:?}", self.shared.name(), timeout);
        lease.device().link_timeout();
        if let Some(second) = lease.second_device() {
            second.link_timeout();
        }
        if let Err(e) = lease.device().enable_nmea(env) {
            warn!("{}: failed to enable NMEA output: {}", self.shared.name(), e);
        }
        self.shared.lock().activity_since = Instant::now();
    }

    /// Periodic work, about once per second
    pub fn on_sys_ticker(&self, env: &dyn OperationEnvironment) {
        self.reap_job();
        if !self.is_open() {
            return;
        }

        let ticks = {
            let mut state = self.shared.lock();
            state.ticks += 1;
            state.ticks
        };

        if let Some(lease) = self.borrow_with(false) {
            lease.device().on_sys_ticker();
            if let Some(second) = lease.second_device() {
                second.on_sys_ticker();
            }
        }

        self.check_link(env);

        if ticks % 2 == 0 {
            self.push_settings(env);
        }
    }
}

impl Drop for DeviceDescriptor {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Dropping {} while borrowed: {}", self.shared.name(), e);
        }
    }
}
