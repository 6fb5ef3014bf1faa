//! FLARM binary transfer frames
//!
//! `0x73` start byte, then header and payload with `0x73` and `0x78`
//! escaped as `0x78 0x31` and `0x78 0x55`. The 8-byte little-endian
//! header is length (header + payload), version, sequence number, message
//! type and a CRC over everything but the CRC field itself.

use std::collections::VecDeque;

use tracing::trace;

pub const START_FRAME: u8 = 0x73;
pub const ESCAPE: u8 = 0x78;
pub const ESCAPE_START: u8 = 0x31;
pub const ESCAPE_ESCAPE: u8 = 0x55;

pub const HEADER_SIZE: usize = 8;
pub const PROTOCOL_VERSION: u8 = 0;

/// Frames longer than this are treated as garbage
const MAX_FRAME_LENGTH: usize = 4096;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Error = 0x00,
    Ping = 0x01,
    SetBaudRate = 0x02,
    FlashUpload = 0x10,
    Exit = 0x12,
    SelectRecord = 0x20,
    GetRecordInfo = 0x21,
    GetIgcData = 0x22,
    Ack = 0xA0,
    Nack = 0xB7,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => MessageType::Error,
            0x01 => MessageType::Ping,
            0x02 => MessageType::SetBaudRate,
            0x10 => MessageType::FlashUpload,
            0x12 => MessageType::Exit,
            0x20 => MessageType::SelectRecord,
            0x21 => MessageType::GetRecordInfo,
            0x22 => MessageType::GetIgcData,
            0xA0 => MessageType::Ack,
            0xB7 => MessageType::Nack,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u16,
    pub version: u8,
    pub sequence: u16,
    pub message_type: u8,
    pub crc: u16,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(&self.length.to_le_bytes());
        bytes[2] = self.version;
        bytes[3..5].copy_from_slice(&self.sequence.to_le_bytes());
        bytes[5] = self.message_type;
        bytes[6..8].copy_from_slice(&self.crc.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        FrameHeader {
            length: u16::from_le_bytes([bytes[0], bytes[1]]),
            version: bytes[2],
            sequence: u16::from_le_bytes([bytes[3], bytes[4]]),
            message_type: bytes[5],
            crc: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }
}

fn crc_update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ (u16::from(byte) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ 0x1021
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC-16-CCITT over the header without its CRC field, then the payload
pub fn crc16(header: &[u8; HEADER_SIZE], payload: &[u8]) -> u16 {
    header[..6]
        .iter()
        .chain(payload)
        .fold(0, |crc, &byte| crc_update(crc, byte))
}

pub fn escape_into(data: &[u8], out: &mut Vec<u8>) {
    for &byte in data {
        match byte {
            START_FRAME => out.extend_from_slice(&[ESCAPE, ESCAPE_START]),
            ESCAPE => out.extend_from_slice(&[ESCAPE, ESCAPE_ESCAPE]),
            _ => out.push(byte),
        }
    }
}

/// The wire bytes of a complete frame, start byte included
pub fn encode_frame(sequence: u16, message_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut header = FrameHeader {
        length: (HEADER_SIZE + payload.len()) as u16,
        version: PROTOCOL_VERSION,
        sequence,
        message_type: message_type as u8,
        crc: 0,
    };
    header.crc = crc16(&header.to_bytes(), payload);

    let mut out = Vec::with_capacity(1 + 2 * (HEADER_SIZE + payload.len()));
    out.push(START_FRAME);
    escape_into(&header.to_bytes(), &mut out);
    escape_into(payload, &mut out);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidEscape(pub u8);

/// Reverses the escaping one byte at a time, so a frame may arrive in
/// any number of chunks
#[derive(Debug, Default)]
pub struct Unescaper {
    pending_escape: bool,
}

impl Unescaper {
    pub fn push(&mut self, byte: u8) -> Result<Option<u8>, InvalidEscape> {
        if self.pending_escape {
            self.pending_escape = false;
            return match byte {
                ESCAPE_START => Ok(Some(START_FRAME)),
                ESCAPE_ESCAPE => Ok(Some(ESCAPE)),
                other => Err(InvalidEscape(other)),
            };
        }

        if byte == ESCAPE {
            self.pending_escape = true;
            Ok(None)
        } else {
            Ok(Some(byte))
        }
    }

    pub fn reset(&mut self) {
        self.pending_escape = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.header.message_type)
    }

    /// Sequence number an ACK or NACK refers to
    pub fn acknowledged_sequence(&self) -> Option<u16> {
        match self.payload.as_slice() {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }

    /// Payload of an ACK after the acknowledged sequence number
    pub fn ack_data(&self) -> &[u8] {
        self.payload.get(2..).unwrap_or_default()
    }
}

/// Incremental frame extractor.
///
/// Bytes before a start byte are noise. A start byte inside a frame
/// abandons the frame and begins a new one, so a truncated frame costs at
/// most itself. Frames with a bad CRC or escape are dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    in_frame: bool,
    unescaper: Unescaper,
    buffer: Vec<u8>,
    frames: VecDeque<Frame>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn restart(&mut self, in_frame: bool) {
        self.in_frame = in_frame;
        self.unescaper.reset();
        self.buffer.clear();
    }

    pub fn clear(&mut self) {
        self.restart(false);
        self.frames.clear();
    }

    pub fn feed(&mut self, data: &[u8]) {
        for &byte in data {
            self.push(byte);
        }
    }

    /// The oldest complete frame
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    fn push(&mut self, byte: u8) {
        if byte == START_FRAME {
            if self.in_frame && !self.buffer.is_empty() {
                trace!("Dropping truncated frame of {} bytes", self.buffer.len());
            }
            self.restart(true);
            return;
        }
        if !self.in_frame {
            return;
        }

        match self.unescaper.push(byte) {
            Ok(Some(byte)) => self.buffer.push(byte),
            Ok(None) => return,
            Err(InvalidEscape(byte)) => {
                trace!("Invalid escape sequence 0x78 0x{:02X}", byte);
                self.restart(false);
                return;
            }
        }

        if self.buffer.len() < HEADER_SIZE {
            return;
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&self.buffer[..HEADER_SIZE]);
        let header = FrameHeader::from_bytes(&header_bytes);
        let length = usize::from(header.length);

        if !(HEADER_SIZE..=MAX_FRAME_LENGTH).contains(&length) {
            trace!("Dropping frame with bad length {}", length);
            self.restart(false);
            return;
        }

        if self.buffer.len() < length {
            return;
        }

        let payload = self.buffer[HEADER_SIZE..length].to_vec();
        if crc16(&header_bytes, &payload) == header.crc {
            self.frames.push_back(Frame { header, payload });
        } else {
            trace!("Dropping frame {} with bad CRC", header.sequence);
        }
        self.restart(false);
    }
}
