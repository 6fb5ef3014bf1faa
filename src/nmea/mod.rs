//! Checksum-verified text line protocol
//!
//! `$` + comma separated fields + `*` + two hex digits + CRLF, where the
//! checksum is the XOR of every byte between `$` and `*`.

pub mod checksum;
mod input_line;
mod parser;
mod reader;

pub use checksum::{format_sentence, verify};
pub use input_line::NmeaInputLine;
pub use parser::NmeaParser;
pub use reader::{LineSplitter, NmeaReader};
