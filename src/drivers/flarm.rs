//! FLARM collision avoidance unit
//!
//! NMEA output with `PFLAC` configuration sentences, plus a binary
//! transfer mode for reading the flight log. The driver tracks which mode
//! the unit is in:
//!
//! ```text
//! Unknown -> Nmea <-> Text <-> Binary
//! ```
//!
//! `Text` differs from `Nmea` only in that the receive thread is stopped so
//! replies can be read synchronously. Entering `Binary` sends `PFLAX` and
//! pings until the unit answers; leaving it sends an exit frame.

pub mod frame;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info, warn};

use crate::constants::{
    FLARM_DECLARE_TIMEOUT, FLARM_DOWNLOAD_TIMEOUT, FLARM_PING_RETRIES, FLARM_PING_TIMEOUT,
    FLARM_RECORD_TIMEOUT, FLARM_RESET_TIMEOUT, FLARM_SETTING_TIMEOUT,
};
use crate::device::{
    Declaration, Device, DeviceArgs, FlightLocator, RecordedFlightInfo, RecordedFlightList,
    SettingsMap, write_nmea,
};
use crate::error::{DeviceError, DeviceResult};
use crate::info::NmeaInfo;
use crate::nmea::{NmeaInputLine, NmeaReader, checksum};
use crate::operation::OperationEnvironment;
use crate::port::Port;
use crate::registry::{DriverEntry, DriverFlags};
use frame::{Frame, FrameDecoder, MessageType, encode_frame};

pub const REGISTRATION: DriverEntry = DriverEntry {
    name: "flarm",
    display_name: "FLARM",
    flags: DriverFlags::DECLARE
        .union(DriverFlags::LOGGER)
        .union(DriverFlags::BULK_BAUD_RATE)
        .union(DriverFlags::MANAGE),
    factory: Some(create),
};

fn create(args: DeviceArgs) -> Arc<dyn Device> {
    Arc::new(FlarmDevice::new(args.port, args.config.bulk_baud_rate()))
}

/// Baud rates of the `SETBAUDRATE` message, by index
pub const BAUD_RATES: [u32; 7] = [4800, 9600, 19200, 28800, 38400, 57600, 115200];

const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Marks the last chunk of an IGC download
const END_OF_FILE: u8 = 0x1A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unknown,
    Nmea,
    Text,
    Binary,
}

enum Reply {
    Ack(Vec<u8>),
    Nack,
}

struct Session {
    mode: Mode,
    sequence: u16,
    decoder: FrameDecoder,
    /// Baud rate to return to when the bulk transfer is over
    saved_baud_rate: Option<u32>,
}

pub struct FlarmDevice {
    port: Arc<dyn Port>,
    bulk_baud_rate: Option<u32>,
    /// Held for the duration of every command
    session: Mutex<Session>,
    settings: SettingsMap<String>,
}

impl FlarmDevice {
    pub fn new(port: Arc<dyn Port>, bulk_baud_rate: Option<u32>) -> Self {
        FlarmDevice {
            port,
            bulk_baud_rate,
            session: Mutex::new(Session {
                mode: Mode::Unknown,
                sequence: 0,
                decoder: FrameDecoder::new(),
                saved_baud_rate: None,
            }),
            settings: SettingsMap::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    /// The last value the unit reported for a setting, without asking
    pub fn get_setting(&self, name: &str) -> Option<String> {
        self.settings.get(name)
    }

    /// Transport failures leave the unit in an unknown mode
    fn check<T>(session: &mut Session, result: DeviceResult<T>) -> DeviceResult<T> {
        if let Err(DeviceError::Io(_) | DeviceError::Communication(_)) = &result {
            session.mode = Mode::Unknown;
        }
        result
    }

    // ---- binary frames ----

    fn send_frame(
        &self,
        session: &mut Session,
        message_type: MessageType,
        payload: &[u8],
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<u16> {
        let sequence = session.sequence;
        session.sequence = session.sequence.wrapping_add(1);
        let frame = encode_frame(sequence, message_type, payload);
        self.port.full_write(&frame, env, WRITE_TIMEOUT)?;
        Ok(sequence)
    }

    fn read_frame(
        &self,
        session: &mut Session,
        env: &dyn OperationEnvironment,
        deadline: Instant,
    ) -> DeviceResult<Frame> {
        let mut buffer = [0u8; 256];
        loop {
            if let Some(frame) = session.decoder.pop() {
                return Ok(frame);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeviceError::Timeout);
            }
            let n = self.port.wait_read(&mut buffer, env, remaining)?;
            session.decoder.feed(&buffer[..n]);
        }
    }

    /// Waits for the ACK or NACK of `sequence`, skipping unrelated frames
    fn wait_reply(
        &self,
        session: &mut Session,
        sequence: u16,
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<Reply> {
        let deadline = Instant::now() + timeout;
        loop {
            let frame = self.read_frame(session, env, deadline)?;
            if frame.acknowledged_sequence() != Some(sequence) {
                continue;
            }
            match frame.message_type() {
                Some(MessageType::Ack) => return Ok(Reply::Ack(frame.ack_data().to_vec())),
                Some(MessageType::Nack) => return Ok(Reply::Nack),
                _ => {}
            }
        }
    }

    fn wait_ack(
        &self,
        session: &mut Session,
        sequence: u16,
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<Vec<u8>> {
        match self.wait_reply(session, sequence, env, timeout)? {
            Reply::Ack(data) => Ok(data),
            Reply::Nack => Err(DeviceError::Protocol(format!(
                "FLARM rejected message {}",
                sequence
            ))),
        }
    }

    fn binary_ping(
        &self,
        session: &mut Session,
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<()> {
        let sequence = self.send_frame(session, MessageType::Ping, &[], env)?;
        self.wait_ack(session, sequence, env, timeout).map(|_| ())
    }

    /// Sends the exit frame; with a timeout, also waits for its ACK
    fn binary_reset(
        &self,
        session: &mut Session,
        env: &dyn OperationEnvironment,
        timeout: Option<Duration>,
    ) -> DeviceResult<()> {
        let sequence = self.send_frame(session, MessageType::Exit, &[], env)?;
        if let Some(timeout) = timeout {
            match self.wait_reply(session, sequence, env, timeout) {
                Ok(_) | Err(DeviceError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn restore_baud_rate(&self, session: &mut Session) -> DeviceResult<()> {
        if let Some(baud_rate) = session.saved_baud_rate.take() {
            self.port.drain()?;
            self.port.set_baud_rate(baud_rate)?;
        }
        Ok(())
    }

    fn switch_baud_rate(
        &self,
        session: &mut Session,
        baud_rate: u32,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        let Some(old_baud_rate) = self.port.baud_rate() else {
            debug!("Port has no baud rate, not switching to {}", baud_rate);
            return Ok(());
        };
        if old_baud_rate == baud_rate {
            return Ok(());
        }
        let Some(index) = BAUD_RATES.iter().position(|&b| b == baud_rate) else {
            return Err(DeviceError::Configuration(format!(
                "FLARM does not support {} baud",
                baud_rate
            )));
        };

        let sequence = self.send_frame(session, MessageType::SetBaudRate, &[index as u8], env)?;
        self.wait_ack(session, sequence, env, FLARM_PING_TIMEOUT)?;

        self.port.drain()?;
        env.sleep(Duration::from_millis(100))?;
        self.port.set_baud_rate(baud_rate)?;
        session.saved_baud_rate = Some(old_baud_rate);
        session.decoder.clear();

        if let Err(e) = self.binary_ping(session, env, FLARM_PING_TIMEOUT) {
            warn!("FLARM silent after switching to {} baud", baud_rate);
            self.restore_baud_rate(session)?;
            return Err(e);
        }
        info!("FLARM switched to {} baud", baud_rate);
        Ok(())
    }

    // ---- mode transitions ----

    fn leave_binary(&self, session: &mut Session, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.binary_reset(session, env, Some(FLARM_RESET_TIMEOUT))?;
        self.restore_baud_rate(session)?;
        env.sleep(FLARM_RESET_TIMEOUT)?;
        session.decoder.clear();
        self.port.flush()
    }

    fn enable_nmea_locked(
        &self,
        session: &mut Session,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        match session.mode {
            Mode::Nmea => return self.port.start_rx_thread(),
            Mode::Text => {
                self.port.start_rx_thread()?;
                session.mode = Mode::Nmea;
                return Ok(());
            }
            Mode::Binary => {
                let result = self.leave_binary(session, env);
                Self::check(session, result)?;
                session.mode = Mode::Unknown;
            }
            Mode::Unknown => {}
        }

        // the unit may still be in binary mode, possibly at the bulk rate
        let result = self.restore_baud_rate(session).and_then(|()| {
            self.binary_reset(session, env, None)?;
            write_nmea(&*self.port, "PFLAV,R", env)?;
            self.port.drain()?;
            self.port.start_rx_thread()
        });
        Self::check(session, result)?;

        session.mode = Mode::Nmea;
        debug!("FLARM in NMEA mode");
        Ok(())
    }

    fn text_mode(&self, session: &mut Session, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let result = match session.mode {
            Mode::Text => return Ok(()),
            Mode::Nmea => self.port.stop_rx_thread(),
            Mode::Unknown => self.port.stop_rx_thread().and_then(|()| {
                self.binary_reset(session, env, None)?;
                self.port.drain()?;
                env.sleep(FLARM_RESET_TIMEOUT)?;
                self.port.flush()
            }),
            Mode::Binary => self.leave_binary(session, env),
        };
        Self::check(session, result)?;
        session.mode = Mode::Text;
        Ok(())
    }

    fn binary_mode(&self, session: &mut Session, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        if session.mode == Mode::Binary {
            return Ok(());
        }

        let result = self.port.stop_rx_thread().and_then(|()| {
            write_nmea(&*self.port, "PFLAX", env)?;
            self.port.drain()
        });
        Self::check(session, result)?;

        // not binary until the unit has answered a ping
        session.mode = Mode::Unknown;
        session.decoder.clear();

        let mut answered = false;
        for attempt in 1..=FLARM_PING_RETRIES {
            match self.binary_ping(session, env, FLARM_PING_TIMEOUT) {
                Ok(()) => {
                    answered = true;
                    break;
                }
                Err(DeviceError::Timeout | DeviceError::Protocol(_)) => {
                    debug!("FLARM ping {}/{} unanswered", attempt, FLARM_PING_RETRIES);
                }
                Err(e) => return Err(e),
            }
        }
        if !answered {
            return Err(DeviceError::Timeout);
        }
        session.mode = Mode::Binary;
        debug!("FLARM in binary mode");

        if let Some(baud_rate) = self.bulk_baud_rate {
            let result = self.switch_baud_rate(session, baud_rate, env);
            if let Err(e) = result {
                session.mode = Mode::Unknown;
                return Err(e);
            }
        }
        Ok(())
    }

    // ---- settings ----

    /// Request/response with the receive thread stopped
    fn text_exchange(
        &self,
        request: &str,
        reply_prefix: &str,
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<String> {
        let mut reader = NmeaReader::new(&*self.port);
        reader.flush()?;
        write_nmea(&*self.port, request, env)?;
        let reply = reader.expect_line(reply_prefix, env, timeout)?;
        Ok(reply[reply_prefix.len()..].to_string())
    }

    /// Asks the unit for a setting and waits for the reply
    pub fn request_setting(&self, name: &str, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        let mut session = self.lock();
        let request = format!("PFLAC,R,{}", name);

        if session.mode == Mode::Text {
            let prefix = format!("PFLAC,A,{},", name);
            let result = self.text_exchange(&request, &prefix, env, FLARM_SETTING_TIMEOUT);
            let value = Self::check(&mut session, result)?;
            self.settings.set(name, value.clone());
            return Ok(value);
        }

        self.enable_nmea_locked(&mut session, env)?;
        self.settings.mark_old(name);
        let result = write_nmea(&*self.port, &request, env);
        Self::check(&mut session, result)?;
        self.settings.wait(name, env, FLARM_SETTING_TIMEOUT)
    }

    /// Changes a setting and waits until the unit confirms it
    pub fn set_setting(
        &self,
        name: &str,
        value: &str,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        let mut session = self.lock();
        self.set_setting_locked(&mut session, name, value, env)
    }

    fn set_setting_locked(
        &self,
        session: &mut Session,
        name: &str,
        value: &str,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        let value = sanitize(value);
        let request = format!("PFLAC,S,{},{}", name, value);

        let confirmed = if session.mode == Mode::Text {
            let prefix = format!("PFLAC,A,{},", name);
            let result = self.text_exchange(&request, &prefix, env, FLARM_SETTING_TIMEOUT);
            let confirmed = Self::check(session, result)?;
            self.settings.set(name, confirmed.clone());
            confirmed
        } else {
            self.enable_nmea_locked(session, env)?;
            self.settings.mark_old(name);
            let result = write_nmea(&*self.port, &request, env);
            Self::check(session, result)?;
            self.settings.wait(name, env, FLARM_SETTING_TIMEOUT)?
        };

        if !confirmed.eq_ignore_ascii_case(&value) {
            return Err(DeviceError::Protocol(format!(
                "FLARM answered {}={} to {}",
                name, confirmed, value
            )));
        }
        Ok(())
    }

    pub fn get_pilot(&self, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        self.request_setting("PILOT", env)
    }

    pub fn set_pilot(&self, name: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.set_setting("PILOT", name, env)
    }

    pub fn get_copilot(&self, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        self.request_setting("COPIL", env)
    }

    pub fn set_copilot(&self, name: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.set_setting("COPIL", name, env)
    }

    pub fn get_plane_type(&self, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        self.request_setting("GLIDERTYPE", env)
    }

    pub fn set_plane_type(&self, plane_type: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.set_setting("GLIDERTYPE", plane_type, env)
    }

    pub fn get_registration(&self, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        self.request_setting("GLIDERID", env)
    }

    pub fn set_registration(&self, registration: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.set_setting("GLIDERID", registration, env)
    }

    pub fn get_competition_id(&self, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        self.request_setting("COMPID", env)
    }

    pub fn set_competition_id(&self, id: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.set_setting("COMPID", id, env)
    }

    pub fn get_competition_class(&self, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        self.request_setting("COMPCLASS", env)
    }

    pub fn set_competition_class(&self, class: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.set_setting("COMPCLASS", class, env)
    }

    pub fn get_stealth_mode(&self, env: &dyn OperationEnvironment) -> DeviceResult<bool> {
        let value = self.request_setting("PRIV", env)?;
        match value.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(DeviceError::Protocol(format!("bad PRIV value {}", other))),
        }
    }

    pub fn set_stealth_mode(&self, enabled: bool, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.set_setting("PRIV", if enabled { "1" } else { "0" }, env)
    }

    /// Receive range in m
    pub fn get_range(&self, env: &dyn OperationEnvironment) -> DeviceResult<u32> {
        let value = self.request_setting("RANGE", env)?;
        value
            .trim()
            .parse()
            .map_err(|_| DeviceError::Protocol(format!("bad RANGE value {}", value)))
    }

    pub fn set_range(&self, range: u32, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.set_setting("RANGE", &range.to_string(), env)
    }

    /// Reboots the unit
    pub fn restart(&self, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let mut session = self.lock();
        let result = write_nmea(&*self.port, "PFLAR,0", env);
        Self::check(&mut session, result)?;
        session.mode = Mode::Unknown;
        Ok(())
    }

    // ---- declaration ----

    fn declare_locked(
        &self,
        session: &mut Session,
        declaration: &Declaration,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        let fields = [
            ("PILOT", declaration.pilot_name.as_str()),
            ("GLIDERID", declaration.aircraft_registration.as_str()),
            ("GLIDERTYPE", declaration.aircraft_type.as_str()),
            ("COMPID", declaration.competition_id.as_str()),
            ("NEWTASK", "Task"),
        ];

        let total = fields.len() + declaration.turnpoints.len() + 2;
        env.set_progress_range(total as u64);
        let mut position = 0u64;

        for (name, value) in fields {
            self.declare_setting(session, name, &sanitize(value), env)?;
            position += 1;
            env.set_progress_position(position);
        }

        let mut waypoints = vec!["0000000N,00000000E,T".to_string()];
        for turnpoint in &declaration.turnpoints {
            waypoints.push(format!(
                "{},{}",
                format_coordinates(turnpoint.location.latitude, turnpoint.location.longitude),
                sanitize(&turnpoint.name)
            ));
        }
        waypoints.push("0000000N,00000000E,L".to_string());

        for waypoint in &waypoints {
            self.declare_setting(session, "ADDWP", waypoint, env)?;
            position += 1;
            env.set_progress_position(position);
        }
        Ok(())
    }

    fn declare_setting(
        &self,
        session: &mut Session,
        name: &str,
        value: &str,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        let request = format!("PFLAC,S,{},{}", name, value);
        let prefix = format!("PFLAC,A,{}", name);
        let result = self.text_exchange(&request, &prefix, env, FLARM_DECLARE_TIMEOUT);
        Self::check(session, result).map(|_| ())
    }

    // ---- flight log ----

    fn select_record(
        &self,
        session: &mut Session,
        index: u8,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<bool> {
        let sequence = self.send_frame(session, MessageType::SelectRecord, &[index], env)?;
        match self.wait_reply(session, sequence, env, FLARM_RECORD_TIMEOUT)? {
            Reply::Ack(_) => Ok(true),
            Reply::Nack => Ok(false),
        }
    }

    fn read_flight_list_locked(
        &self,
        session: &mut Session,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<RecordedFlightList> {
        self.binary_mode(session, env)?;

        let mut list = RecordedFlightList::new();
        for index in 0..=u8::MAX {
            if list.is_full() {
                break;
            }
            env.check_cancelled()?;
            if !self.select_record(session, index, env)? {
                break;
            }

            let sequence = self.send_frame(session, MessageType::GetRecordInfo, &[], env)?;
            let data = self.wait_ack(session, sequence, env, FLARM_RECORD_TIMEOUT)?;
            match parse_record_info(&data, index) {
                Some(flight) => {
                    list.push(flight);
                }
                None => warn!(
                    "Unparsable FLARM record info: {}",
                    String::from_utf8_lossy(&data)
                ),
            }
            env.set_progress_position(u64::from(index) + 1);
        }
        Ok(list)
    }

    fn download_locked(
        &self,
        session: &mut Session,
        index: u8,
        path: &Path,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        self.binary_mode(session, env)?;
        if !self.select_record(session, index, env)? {
            return Err(DeviceError::Protocol(format!("no flight record {}", index)));
        }

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        env.set_progress_range(100);

        loop {
            let sequence = self.send_frame(session, MessageType::GetIgcData, &[], env)?;
            let data = self.wait_ack(session, sequence, env, FLARM_DOWNLOAD_TIMEOUT)?;
            let Some((&progress, chunk)) = data.split_first() else {
                return Err(DeviceError::Protocol("empty IGC data frame".to_string()));
            };

            let (chunk, last) = match chunk.split_last() {
                Some((&END_OF_FILE, head)) => (head, true),
                _ => (chunk, false),
            };
            writer.write_all(chunk)?;
            env.set_progress_position(u64::from(progress));
            if last {
                break;
            }
        }

        writer.flush()?;
        Ok(())
    }
}

impl Device for FlarmDevice {
    fn parse_line(&self, line: &str, _info: &mut NmeaInfo) -> bool {
        if !checksum::verify(line) {
            return false;
        }

        let mut input = NmeaInputLine::new(line);
        if input.read_str() != "PFLAC" || input.read_char() != Some('A') {
            return false;
        }

        // PFLAC,A,<name>,<value>; errors come back as PFLAC,A,ERROR
        let name = input.read_str();
        if !name.is_empty() && name != "ERROR" {
            self.settings.set(name, input.rest().to_string());
        }
        true
    }

    fn enable_nmea(&self, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let mut session = self.lock();
        self.enable_nmea_locked(&mut session, env)
    }

    fn link_timeout(&self) {
        self.lock().mode = Mode::Unknown;
    }

    fn declare(&self, declaration: &Declaration, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        let mut session = self.lock();
        self.text_mode(&mut session, env)?;
        self.declare_locked(&mut session, declaration, env)
    }

    fn read_flight_list(&self, env: &dyn OperationEnvironment) -> DeviceResult<RecordedFlightList> {
        let mut session = self.lock();
        let result = self.read_flight_list_locked(&mut session, env);
        Self::check(&mut session, result)
    }

    fn download_flight(
        &self,
        flight: &RecordedFlightInfo,
        path: &Path,
        env: &dyn OperationEnvironment,
    ) -> DeviceResult<()> {
        let FlightLocator::Flarm { index } = flight.locator else {
            return Err(DeviceError::Unsupported("flight of another logger"));
        };

        let mut session = self.lock();
        let result = self.download_locked(&mut session, index, path, env);
        if result.is_err() && path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove partial download {}: {}", path.display(), e);
            }
        }
        Self::check(&mut session, result)
    }

    fn read_setting(&self, name: &str, env: &dyn OperationEnvironment) -> DeviceResult<String> {
        self.request_setting(name, env)
    }

    fn write_setting(&self, name: &str, value: &str, env: &dyn OperationEnvironment) -> DeviceResult<()> {
        self.set_setting(name, value, env)
    }
}

/// Characters that would break the sentence framing are replaced
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '$' | '*' | ',' | '!' | '\r' | '\n' => ' ',
            c => c,
        })
        .collect()
}

/// `DDMMmmmN,DDDMMmmmE`, minutes in thousandths
fn format_coordinates(latitude: f64, longitude: f64) -> String {
    fn split(angle: f64) -> (u32, u32) {
        let thousandths = (angle.abs() * 60_000.0).round() as u32;
        (thousandths / 60_000, thousandths % 60_000)
    }

    let (lat_degrees, lat_minutes) = split(latitude);
    let (lon_degrees, lon_minutes) = split(longitude);
    format!(
        "{:02}{:05}{},{:03}{:05}{}",
        lat_degrees,
        lat_minutes,
        if latitude < 0.0 { 'S' } else { 'N' },
        lon_degrees,
        lon_minutes,
        if longitude < 0.0 { 'W' } else { 'E' },
    )
}

/// `YYYY-MM-DD|HH:MM:SS|HH:MM:SS|...`, NUL terminated
fn parse_record_info(data: &[u8], index: u8) -> Option<RecordedFlightInfo> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let text = std::str::from_utf8(&data[..end]).ok()?;
    let mut parts = text.split('|');

    let date = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
    let start_time = NaiveTime::parse_from_str(parts.next()?, "%H:%M:%S").ok()?;
    let end_time = NaiveTime::parse_from_str(parts.next()?, "%H:%M:%S").ok()?;

    Some(RecordedFlightInfo {
        date,
        start_time,
        end_time,
        locator: FlightLocator::Flarm { index },
    })
}
