#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use glidelink::config::DeviceConfig;
use glidelink::device::Device;
use glidelink::drivers::flarm::frame::{Frame, FrameDecoder, MessageType, encode_frame};
use glidelink::error::{DeviceError, DeviceResult};
use glidelink::info::NmeaInfo;
use glidelink::nmea::{LineSplitter, checksum, format_sentence};
use glidelink::port::{DataHandler, Port, PortFactory, RawStream, StreamPort};

const POLL: Duration = Duration::from_millis(50);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[derive(Default)]
struct Buffers {
    to_device: VecDeque<u8>,
    to_host: VecDeque<u8>,
    /// Everything the host ever wrote
    host_log: Vec<u8>,
    baud_rate: u32,
    baud_history: Vec<u32>,
    closed: bool,
}

#[derive(Default)]
struct Link {
    buffers: Mutex<Buffers>,
    cond: Condvar,
}

impl Link {
    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap()
    }
}

/// Host side of an in-memory serial line
pub struct MockStream {
    link: Arc<Link>,
}

impl RawStream for MockStream {
    fn read_some(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut buffers = self.link.lock();
        if buffers.to_host.is_empty() && !buffers.closed {
            buffers = self.link.cond.wait_timeout(buffers, POLL).unwrap().0;
        }
        if buffers.to_host.is_empty() {
            return if buffers.closed {
                Err(io::ErrorKind::UnexpectedEof.into())
            } else {
                Ok(0)
            };
        }

        let n = buffer.len().min(buffers.to_host.len());
        for (dst, src) in buffer.iter_mut().zip(buffers.to_host.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write_some(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buffers = self.link.lock();
        if buffers.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        buffers.to_device.extend(data);
        buffers.host_log.extend_from_slice(data);
        self.link.cond.notify_all();
        Ok(data.len())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.link.lock().to_host.clear();
        Ok(())
    }

    fn baud_rate(&self) -> Option<u32> {
        Some(self.link.lock().baud_rate)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        let mut buffers = self.link.lock();
        buffers.baud_rate = baud_rate;
        buffers.baud_history.push(baud_rate);
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn RawStream>> {
        Ok(Box::new(MockStream {
            link: self.link.clone(),
        }))
    }
}

/// Device side of an in-memory serial line
#[derive(Clone)]
pub struct MockPeer {
    link: Arc<Link>,
}

impl MockPeer {
    pub fn write(&self, data: &[u8]) {
        let mut buffers = self.link.lock();
        buffers.to_host.extend(data);
        self.link.cond.notify_all();
    }

    /// Sends `$<body>*XX\r\n`
    pub fn send_line(&self, body: &str) {
        self.write(format_sentence(body).as_bytes());
    }

    /// What the host sent, waiting up to `timeout` for the first byte
    pub fn read(&self, timeout: Duration) -> Vec<u8> {
        let mut buffers = self.link.lock();
        if buffers.to_device.is_empty() {
            buffers = self.link.cond.wait_timeout(buffers, timeout).unwrap().0;
        }
        buffers.to_device.drain(..).collect()
    }

    pub fn host_log(&self) -> Vec<u8> {
        self.link.lock().host_log.clone()
    }

    pub fn host_text(&self) -> String {
        String::from_utf8_lossy(&self.host_log()).into_owned()
    }

    pub fn baud_rate(&self) -> u32 {
        self.link.lock().baud_rate
    }

    pub fn baud_history(&self) -> Vec<u32> {
        self.link.lock().baud_history.clone()
    }

    /// Hangs up; the host's next read fails
    pub fn close(&self) {
        self.link.lock().closed = true;
        self.link.cond.notify_all();
    }
}

pub fn mock_pair(baud_rate: u32) -> (MockStream, MockPeer) {
    let link = Arc::new(Link::default());
    link.lock().baud_rate = baud_rate;
    (MockStream { link: link.clone() }, MockPeer { link })
}

pub fn mock_port(baud_rate: u32) -> (Arc<StreamPort>, MockPeer) {
    let (stream, peer) = mock_pair(baud_rate);
    let port = StreamPort::new("mock", Box::new(stream)).unwrap();
    (Arc::new(port), peer)
}

/// Feeds the lines a port receives to one device, the way a descriptor
/// would
pub struct LineFeeder {
    device: Arc<dyn Device>,
    splitter: Mutex<LineSplitter>,
    pub info: Mutex<NmeaInfo>,
}

impl LineFeeder {
    pub fn attach(port: &dyn Port, device: Arc<dyn Device>) -> Arc<LineFeeder> {
        let feeder = Arc::new(LineFeeder {
            device,
            splitter: Mutex::new(LineSplitter::new()),
            info: Mutex::new(NmeaInfo::new(Instant::now())),
        });
        port.set_handler(feeder.clone());
        feeder
    }
}

impl DataHandler for LineFeeder {
    fn data_received(&self, data: &[u8]) {
        let mut info = self.info.lock().unwrap();
        self.splitter.lock().unwrap().push(data, |line| {
            self.device.parse_line(line, &mut info);
        });
    }
}

enum Outcome {
    Port(MockStream),
    Fail(String),
}

/// Hands out queued mock ports; runs out with a communication error
#[derive(Default)]
pub struct MockPortFactory {
    outcomes: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
}

impl MockPortFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_port(&self, baud_rate: u32) -> MockPeer {
        let (stream, peer) = mock_pair(baud_rate);
        self.outcomes.lock().unwrap().push_back(Outcome::Port(stream));
        peer
    }

    pub fn push_failure(&self, message: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Outcome::Fail(message.to_string()));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PortFactory for MockPortFactory {
    fn open(&self, config: &DeviceConfig) -> DeviceResult<Arc<dyn Port>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Outcome::Port(stream)) => {
                Ok(Arc::new(StreamPort::new(config.port_name(), Box::new(stream))?))
            }
            Some(Outcome::Fail(message)) => Err(DeviceError::Communication(message)),
            None => Err(DeviceError::Communication("no such device".to_string())),
        }
    }
}

/// How the emulated FLARM behaves
#[derive(Clone)]
pub struct FlarmScript {
    pub settings: HashMap<String, String>,
    /// `YYYY-MM-DD|HH:MM:SS|HH:MM:SS|...` per recorded flight
    pub flights: Vec<String>,
    pub igc: Vec<u8>,
    pub answer_pings: bool,
    /// Cut the record info reply in half
    pub truncate_record_info: bool,
}

impl Default for FlarmScript {
    fn default() -> Self {
        FlarmScript {
            settings: HashMap::from([
                ("PILOT".to_string(), "NOBODY".to_string()),
                ("RANGE".to_string(), "25500".to_string()),
                ("PRIV".to_string(), "0".to_string()),
            ]),
            flights: Vec::new(),
            igc: Vec::new(),
            answer_pings: true,
            truncate_record_info: false,
        }
    }
}

/// What the emulated FLARM saw
#[derive(Debug, Clone, Default)]
pub struct FlarmLog {
    pub binary: bool,
    /// Text sentences, without `$` and checksum
    pub lines: Vec<String>,
    pub frames: Vec<MessageType>,
    pub baud_rate_indices: Vec<u8>,
}

struct Emulator {
    peer: MockPeer,
    script: FlarmScript,
    log: Arc<Mutex<FlarmLog>>,
    text: Vec<u8>,
    decoder: FrameDecoder,
    sequence: u16,
    selected: Option<usize>,
    igc_offset: usize,
}

impl Emulator {
    fn binary(&self) -> bool {
        self.log.lock().unwrap().binary
    }

    fn received(&mut self, data: &[u8]) {
        if self.binary() {
            self.decoder.feed(data);
            while let Some(frame) = self.decoder.pop() {
                self.frame(frame);
            }
            return;
        }

        for (i, &byte) in data.iter().enumerate() {
            if byte != b'\n' {
                self.text.push(byte);
                continue;
            }
            let line = String::from_utf8_lossy(&self.text).into_owned();
            self.text.clear();

            // binary noise in front of a sentence stays on the same line
            let Some(start) = line.rfind('$') else {
                continue;
            };
            let line = line[start..].trim_end();
            if let Some(body) = checksum::strip(line).filter(|_| checksum::verify(line)) {
                let body = body.to_string();
                self.sentence(&body);
            }
            if self.binary() {
                self.received(&data[i + 1..]);
                return;
            }
        }
    }

    fn sentence(&mut self, body: &str) {
        self.log.lock().unwrap().lines.push(body.to_string());

        let fields: Vec<&str> = body.splitn(4, ',').collect();
        match fields.as_slice() {
            ["PFLAX"] => {
                self.peer.send_line("PFLAX,A");
                self.decoder.clear();
                self.log.lock().unwrap().binary = true;
            }
            ["PFLAC", "R", name] => match self.script.settings.get(*name) {
                Some(value) => self.peer.send_line(&format!("PFLAC,A,{},{}", name, value)),
                None => self.peer.send_line("PFLAC,A,ERROR"),
            },
            ["PFLAC", "S", name, value] => {
                self.script
                    .settings
                    .insert(name.to_string(), value.to_string());
                self.peer.send_line(&format!("PFLAC,A,{},{}", name, value));
            }
            _ => {}
        }
    }

    fn reply(&mut self, message_type: MessageType, request: u16, data: &[u8]) -> Vec<u8> {
        let mut payload = request.to_le_bytes().to_vec();
        payload.extend_from_slice(data);
        let frame = encode_frame(self.sequence, message_type, &payload);
        self.sequence = self.sequence.wrapping_add(1);
        frame
    }

    fn frame(&mut self, frame: Frame) {
        let Some(message_type) = frame.message_type() else {
            return;
        };
        self.log.lock().unwrap().frames.push(message_type);
        let request = frame.header.sequence;

        let reply = match message_type {
            MessageType::Ping if !self.script.answer_pings => return,
            MessageType::Ping => self.reply(MessageType::Ack, request, &[]),
            MessageType::SetBaudRate => {
                if let Some(&index) = frame.payload.first() {
                    self.log.lock().unwrap().baud_rate_indices.push(index);
                }
                self.reply(MessageType::Ack, request, &[])
            }
            MessageType::Exit => {
                self.log.lock().unwrap().binary = false;
                self.text.clear();
                self.reply(MessageType::Ack, request, &[])
            }
            MessageType::SelectRecord => {
                let index = frame.payload.first().copied().unwrap_or(u8::MAX) as usize;
                if index < self.script.flights.len() {
                    self.selected = Some(index);
                    self.igc_offset = 0;
                    self.reply(MessageType::Ack, request, &[])
                } else {
                    self.reply(MessageType::Nack, request, &[])
                }
            }
            MessageType::GetRecordInfo => {
                let Some(index) = self.selected else {
                    return;
                };
                let mut info = self.script.flights[index].clone().into_bytes();
                info.push(0);
                let reply = self.reply(MessageType::Ack, request, &info);
                if self.script.truncate_record_info {
                    reply[..reply.len() / 2].to_vec()
                } else {
                    reply
                }
            }
            MessageType::GetIgcData => {
                let igc = &self.script.igc;
                let end = (self.igc_offset + 64).min(igc.len());
                let progress = (end * 100 / igc.len().max(1)) as u8;
                let mut data = vec![progress];
                data.extend_from_slice(&igc[self.igc_offset..end]);
                if end == igc.len() {
                    data.push(0x1A);
                }
                self.igc_offset = end;
                self.reply(MessageType::Ack, request, &data)
            }
            _ => self.reply(MessageType::Nack, request, &[]),
        };
        self.peer.write(&reply);
    }
}

/// A thread answering like a FLARM on the device side of a mock line
pub struct MockFlarm {
    stop: Arc<AtomicBool>,
    log: Arc<Mutex<FlarmLog>>,
    handle: Option<JoinHandle<()>>,
}

impl MockFlarm {
    pub fn start(peer: MockPeer, script: FlarmScript) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let log = Arc::new(Mutex::new(FlarmLog::default()));

        let mut emulator = Emulator {
            peer,
            script,
            log: log.clone(),
            text: Vec::new(),
            decoder: FrameDecoder::new(),
            sequence: 0x100,
            selected: None,
            igc_offset: 0,
        };
        let thread_stop = stop.clone();
        let handle = thread::spawn(move || {
            while !thread_stop.load(Ordering::SeqCst) {
                let data = emulator.peer.read(POLL);
                if !data.is_empty() {
                    emulator.received(&data);
                }
            }
        });

        MockFlarm {
            stop,
            log,
            handle: Some(handle),
        }
    }

    pub fn log(&self) -> FlarmLog {
        self.log.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.log().lines
    }
}

impl Drop for MockFlarm {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
