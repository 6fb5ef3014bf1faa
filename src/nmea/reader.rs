use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::constants::MAX_LINE_LENGTH;
use crate::error::{DeviceError, DeviceResult};
use crate::nmea::checksum;
use crate::operation::OperationEnvironment;
use crate::port::Port;

/// Splits the asynchronous byte stream of a receive thread into lines.
///
/// The buffer is bounded; a line that outgrows it is dropped entirely and
/// splitting resumes after the next line break.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    overflowed: bool,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8], mut on_line: impl FnMut(&str)) {
        for &byte in data {
            if byte == b'\n' {
                if !self.overflowed {
                    let line = self.buffer.strip_suffix(b"\r").unwrap_or(&self.buffer);
                    // NMEA is ASCII; anything else is line noise
                    if let Ok(line) = std::str::from_utf8(line) {
                        let line = line.trim();
                        if !line.is_empty() {
                            on_line(line);
                        }
                    }
                }
                self.buffer.clear();
                self.overflowed = false;
            } else if self.buffer.len() >= MAX_LINE_LENGTH {
                self.buffer.clear();
                self.overflowed = true;
            } else if !self.overflowed {
                self.buffer.push(byte);
            }
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }
}

/// Synchronous NMEA record reader for request/response exchanges while the
/// port's receive thread is stopped.
///
/// A record is recognised once both the leading `$` and the trailing `*XX`
/// are buffered. Records with a bad checksum are skipped. The FIFO is
/// bounded and drops its oldest bytes to resynchronise.
pub struct NmeaReader<'a> {
    port: &'a dyn Port,
    fifo: VecDeque<u8>,
}

impl<'a> NmeaReader<'a> {
    pub fn new(port: &'a dyn Port) -> Self {
        NmeaReader {
            port,
            fifo: VecDeque::with_capacity(MAX_LINE_LENGTH),
        }
    }

    /// Discards buffered bytes and the port's pending input
    pub fn flush(&mut self) -> DeviceResult<()> {
        self.fifo.clear();
        self.port.flush()
    }

    /// Extracts the first complete record from the FIFO, if any
    fn extract(&mut self) -> Option<String> {
        loop {
            // drop noise in front of the start marker
            match self.fifo.iter().position(|&b| b == b'$') {
                Some(start) => {
                    self.fifo.drain(..start);
                }
                None => {
                    self.fifo.clear();
                    return None;
                }
            }

            let star = self.fifo.iter().position(|&b| b == b'*');
            let restart = self.fifo.iter().skip(1).position(|&b| b == b'$');

            match (star, restart) {
                // a new record started before this one was terminated
                (Some(star), Some(next)) if next + 1 < star => {
                    self.fifo.drain(..next + 1);
                }
                (None, Some(next)) => {
                    self.fifo.drain(..next + 1);
                }
                (Some(star), _) if self.fifo.len() >= star + 3 => {
                    let record: Vec<u8> = self.fifo.drain(..star + 3).collect();
                    match String::from_utf8(record) {
                        Ok(record) if checksum::verify(&record) => return Some(record),
                        Ok(record) => trace!("Dropping record with bad checksum: {}", record),
                        Err(_) => trace!("Dropping non-ASCII record"),
                    }
                }
                _ => return None,
            }
        }
    }

    fn fill(&mut self, env: &dyn OperationEnvironment, timeout: Duration) -> DeviceResult<()> {
        let mut buffer = [0u8; 64];
        let n = self.port.wait_read(&mut buffer, env, timeout)?;

        for &byte in &buffer[..n] {
            if self.fifo.len() >= MAX_LINE_LENGTH {
                // full without a complete record: give up on the oldest one
                self.fifo.pop_front();
            }
            self.fifo.push_back(byte);
        }
        Ok(())
    }

    /// Reads the next checksum-valid record, e.g. `$PFLAC,A,PILOT,X*2F`
    pub fn read_line(
        &mut self,
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(record) = self.extract() {
                trace!("Received {}", record);
                return Ok(record);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeviceError::Timeout);
            }
            self.fill(env, remaining)?;
        }
    }

    /// Reads records until one whose body starts with `prefix` arrives and
    /// returns its body (between `$` and `*`)
    pub fn expect_line(
        &mut self,
        prefix: &str,
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeviceError::Timeout);
            }

            let record = self.read_line(env, remaining)?;
            if let Some(body) = checksum::strip(&record) {
                if body.starts_with(prefix) {
                    return Ok(body.to_owned());
                }
            }
        }
    }
}
