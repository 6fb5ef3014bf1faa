//! Flight log access on an LX Nano
//!
//! The Nano answers `PLXVC` requests with NMEA records, so everything here
//! runs synchronously with the receive thread suspended.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use crate::constants::LXNAV_LOGGER_TIMEOUT;
use crate::device::{FlightLocator, RecordedFlightInfo, RecordedFlightList, write_nmea};
use crate::error::{DeviceError, DeviceResult};
use crate::nmea::{NmeaInputLine, NmeaReader};
use crate::operation::OperationEnvironment;
use crate::port::{Port, RxSuspend};

const LOGBOOK_BATCH: usize = 8;
const FLIGHT_BATCH: u32 = 32;

const LOGBOOK_PREFIX: &str = "PLXVC,LOGBOOK,A,";
const FLIGHT_PREFIX: &str = "PLXVC,FLIGHT,A,";

/// Time left until `deadline`, as a per-request budget for `expect_line`
fn remaining(deadline: Instant) -> DeviceResult<std::time::Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(DeviceError::Timeout)
    } else {
        Ok(left)
    }
}

fn number_of_flights(
    port: &dyn Port,
    reader: &mut NmeaReader<'_>,
    env: &dyn OperationEnvironment,
) -> DeviceResult<usize> {
    reader.flush()?;
    write_nmea(port, "PLXVC,LOGBOOKSIZE,R,", env)?;

    let deadline = Instant::now() + LXNAV_LOGGER_TIMEOUT;
    loop {
        let line = reader.expect_line("PLXVC,LOGBOOK", env, remaining(deadline)?)?;
        let tail = &line["PLXVC,LOGBOOK".len()..];

        // firmware 2.05 answers LOGBOOK,A,n while 2.10 answers LOGBOOKSIZE,A,n
        let count = match tail.strip_prefix(",A,").or_else(|| tail.strip_prefix("SIZE,A,")) {
            Some(count) => count,
            None => continue,
        };
        return count
            .trim_end_matches(',')
            .parse()
            .map_err(|_| DeviceError::Protocol(format!("bad logbook size: {}", line)));
    }
}

fn parse_date(field: &str) -> Option<NaiveDate> {
    let mut parts = field.split('.');
    let day = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let year = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time(field: &str) -> Option<NaiveTime> {
    let mut parts = field.split(':');
    let hour = parts.next()?.parse().ok()?;
    let minute = parts.next()?.parse().ok()?;
    let second = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, second)
}

/// `<ignored>,<n>,<filename>,dd.mm.yyyy,hh:mm:ss,hh:mm:ss`
pub(super) fn parse_logbook_entry(content: &str) -> Option<RecordedFlightInfo> {
    let mut line = NmeaInputLine::new(content);
    line.skip(1);
    line.read_u32()?;
    let filename = line.read_nonempty()?;
    let date = parse_date(line.read_str())?;
    let start_time = parse_time(line.read_str())?;
    let end_time = parse_time(line.read_str())?;

    Some(RecordedFlightInfo {
        date,
        start_time,
        end_time,
        locator: FlightLocator::Nano {
            filename: filename.to_string(),
        },
    })
}

pub(super) fn read_flight_list(
    port: &dyn Port,
    env: &dyn OperationEnvironment,
) -> DeviceResult<RecordedFlightList> {
    let _suspend = RxSuspend::new(port)?;
    let mut reader = NmeaReader::new(port);

    let count = number_of_flights(port, &mut reader, env)?;
    debug!("Nano logbook holds {} flights", count);

    let mut list = RecordedFlightList::new();
    if count == 0 {
        return Ok(list);
    }
    env.set_progress_range(count as u64);

    let mut next = 1;
    while next <= count {
        let n = (count - next + 1).min(list.remaining()).min(LOGBOOK_BATCH);
        if n == 0 {
            break;
        }

        reader.flush()?;
        write_nmea(port, &format!("PLXVC,LOGBOOK,R,{},{},", next, next + n), env)?;

        let deadline = Instant::now() + LXNAV_LOGGER_TIMEOUT;
        let mut received = 0;
        while received < n {
            let line = reader.expect_line(LOGBOOK_PREFIX, env, remaining(deadline)?)?;
            if let Some(flight) = parse_logbook_entry(&line[LOGBOOK_PREFIX.len()..]) {
                list.push(flight);
                received += 1;
            }
        }

        next += n;
        env.set_progress_position((next - 1) as u64);
    }
    Ok(list)
}

/// Download progress: the next expected row and the row count announced
/// by the first reply
struct RowCursor {
    next: u32,
    count: u32,
}

impl RowCursor {
    /// `<ignored filename>,<row>,<row count>,<content>`
    fn accept<'a>(&mut self, content: &'a str) -> DeviceResult<&'a str> {
        let mut line = NmeaInputLine::new(content);
        line.skip(1);
        let (Some(row), Some(count)) = (line.read_u32(), line.read_u32()) else {
            return Err(DeviceError::Protocol(format!("malformed flight row: {}", content)));
        };

        if row < 1 || row > count || row != self.next {
            return Err(DeviceError::Protocol(format!(
                "expected row {}, got {} of {}",
                self.next, row, count
            )));
        }
        if self.count == 0 {
            self.count = count;
        } else if count != self.count {
            return Err(DeviceError::Protocol("row count changed during download".to_string()));
        }

        self.next += 1;
        Ok(line.rest())
    }
}

pub(super) fn download_flight(
    port: &dyn Port,
    filename: &str,
    path: &Path,
    env: &dyn OperationEnvironment,
) -> DeviceResult<()> {
    let _suspend = RxSuspend::new(port)?;
    let mut reader = NmeaReader::new(port);
    let mut writer = BufWriter::new(File::create(path)?);
    let mut cursor = RowCursor { next: 1, count: 0 };

    loop {
        // the first request only learns the file length
        let n = if cursor.count == 0 {
            1
        } else {
            FLIGHT_BATCH.min(cursor.count - cursor.next + 1)
        };
        let start = cursor.next;
        let end = start + n;

        reader.flush()?;
        write_nmea(port, &format!("PLXVC,FLIGHT,R,{},{},{},", filename, start, end), env)?;

        let deadline = Instant::now() + LXNAV_LOGGER_TIMEOUT;
        while cursor.next != end {
            let line = reader.expect_line(FLIGHT_PREFIX, env, remaining(deadline)?)?;
            let content = cursor.accept(&line[FLIGHT_PREFIX.len()..])?;
            writer.write_all(content.as_bytes())?;
            writer.write_all(b"\r\n")?;
        }

        if cursor.next > cursor.count {
            break;
        }
        if start == 1 {
            env.set_progress_range(u64::from(cursor.count));
        }
        env.set_progress_position(u64::from(cursor.next - 1));
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_logbook_entry() {
        let flight = parse_logbook_entry("x,3,FLIGHT3.IGC,24.07.2012,10:15:00,13:02:59").unwrap();
        assert_eq!(flight.date, NaiveDate::from_ymd_opt(2012, 7, 24).unwrap());
        assert_eq!(flight.start_time, NaiveTime::from_hms_opt(10, 15, 0).unwrap());
        assert_eq!(flight.end_time, NaiveTime::from_hms_opt(13, 2, 59).unwrap());
        assert_eq!(
            flight.locator,
            FlightLocator::Nano {
                filename: "FLIGHT3.IGC".to_string()
            }
        );

        assert!(parse_logbook_entry("x,3,,24.07.2012,10:15:00,13:02:59").is_none());
        assert!(parse_logbook_entry("x,3,F.IGC,31.02.2012,10:15:00,13:02:59").is_none());
        assert!(parse_logbook_entry("x,3,F.IGC,24.07.2012,25:15:00,13:02:59").is_none());
    }

    #[test]
    fn row_cursor_rejects_gaps_and_resizes() {
        let mut cursor = RowCursor { next: 1, count: 0 };
        assert_eq!(cursor.accept(",1,3,AXXX").unwrap(), "AXXX");
        assert_eq!(cursor.count, 3);
        assert!(cursor.accept(",3,3,B").is_err());
        assert!(cursor.accept(",2,4,B").is_err());
        assert_eq!(cursor.accept(",2,3,HFDTE,240712").unwrap(), "HFDTE,240712");
    }
}
