//! The generic NMEA parser, used for every line no driver claims

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tracing::trace;

use crate::geo::{GeoPoint, KNOTS_TO_MS};
use crate::info::{
    FixQuality, FlarmAlarmLevel, FlarmStatus, FlarmTraffic, FlarmVersion, NmeaInfo, Stamped,
};
use crate::nmea::{NmeaInputLine, checksum};

#[derive(Debug, Default)]
pub struct NmeaParser {
    /// Date of the last `RMC`, applied to time-only sentences
    last_date: Option<NaiveDate>,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last_date = None;
    }

    /// Parses one sentence into `info`. Returns `false` for sentences with
    /// a bad checksum and for unknown sentence types.
    pub fn parse_line(&mut self, line: &str, info: &mut NmeaInfo) -> bool {
        if !checksum::verify(line) {
            trace!("Ignoring line with bad checksum: {}", line);
            return false;
        }

        let mut input = NmeaInputLine::new(line);
        let kind = input.read_str();

        match kind {
            "PGRMZ" => return self.pgrmz(input, info),
            "PFLAU" => return self.pflau(input, info),
            "PFLAA" => return self.pflaa(input, info),
            "PFLAV" => return self.pflav(input, info),
            _ => {}
        }

        // standard sentences with any talker id: GP, GN, GL, ...
        if kind.len() == 5 && kind.starts_with('G') {
            return match &kind[2..] {
                "RMC" => self.rmc(input, info),
                "GGA" => self.gga(input, info),
                "GLL" => self.gll(input, info),
                _ => false,
            };
        }

        false
    }

    fn read_time(input: &mut NmeaInputLine) -> Option<NaiveTime> {
        let field = input.read_nonempty()?;
        let (whole, fraction) = field.split_once('.').unwrap_or((field, ""));
        if whole.len() != 6 {
            return None;
        }
        let hour = whole[0..2].parse().ok()?;
        let minute = whole[2..4].parse().ok()?;
        let second = whole[4..6].parse().ok()?;
        let millis = if fraction.is_empty() {
            0
        } else {
            format!("0.{fraction}")
                .parse::<f64>()
                .map(|f| (f * 1000.0) as u32)
                .ok()?
        };
        NaiveTime::from_hms_milli_opt(hour, minute, second, millis)
    }

    fn read_date(input: &mut NmeaInputLine) -> Option<NaiveDate> {
        let field = input.read_nonempty()?;
        if field.len() != 6 {
            return None;
        }
        let day = field[0..2].parse().ok()?;
        let month = field[2..4].parse().ok()?;
        let year: i32 = field[4..6].parse().ok()?;
        let century = if year < 80 { 2000 } else { 1900 };
        NaiveDate::from_ymd_opt(century + year, month, day)
    }

    fn read_location(input: &mut NmeaInputLine) -> Option<GeoPoint> {
        let latitude = input.read_latitude();
        let longitude = input.read_longitude();
        Some(GeoPoint::new(latitude?, longitude?))
    }

    /// `$GPRMC,hhmmss,A,llll.ll,a,yyyyy.yy,a,speed,track,ddmmyy,...`
    fn rmc(&mut self, mut input: NmeaInputLine, info: &mut NmeaInfo) -> bool {
        let time = Self::read_time(&mut input);
        let valid = input.read_char() == Some('A');
        let location = Self::read_location(&mut input);
        let speed = input.read_f64();
        let track = input.read_f64();
        let date = Self::read_date(&mut input);

        if let Some(date) = date {
            self.last_date = Some(date);
            if let Some(time) = time {
                info.date_time = info.stamp(NaiveDateTime::new(date, time));
            }
        }

        if !valid {
            return true;
        }

        if let Some(location) = location {
            info.location = info.stamp(location);
        }
        if let Some(speed) = speed {
            info.ground_speed = info.stamp(speed * KNOTS_TO_MS);
        }
        if let Some(track) = track {
            info.track = info.stamp(track.rem_euclid(360.0));
        }
        true
    }

    /// `$GPGGA,hhmmss,llll.ll,a,yyyyy.yy,a,q,nn,hdop,alt,M,...`
    fn gga(&mut self, mut input: NmeaInputLine, info: &mut NmeaInfo) -> bool {
        let time = Self::read_time(&mut input);
        let location = Self::read_location(&mut input);
        let quality = match input.read_u32() {
            Some(0) | None => FixQuality::NoFix,
            Some(2) => FixQuality::Dgps,
            Some(6) => FixQuality::Estimated,
            Some(_) => FixQuality::Gps,
        };
        let satellites = input.read_u32();
        input.skip(1);
        let altitude = input.read_altitude_with_unit();

        info.fix_quality = info.stamp(quality);
        if let Some(satellites) = satellites {
            info.satellites_used = info.stamp(satellites);
        }

        if quality == FixQuality::NoFix {
            return true;
        }

        if let (Some(date), Some(time)) = (self.last_date, time) {
            // GGA carries no date; don't apply one across midnight
            let seconds = time.num_seconds_from_midnight();
            let stale = info
                .date_time
                .as_ref()
                .is_some_and(|dt| dt.value.time().num_seconds_from_midnight() > seconds);
            if !stale {
                info.date_time = info.stamp(NaiveDateTime::new(date, time));
            }
        }
        if let Some(location) = location {
            info.location = info.stamp(location);
        }
        if let Some(altitude) = altitude {
            info.gps_altitude = info.stamp(altitude);
        }
        true
    }

    /// `$GPGLL,llll.ll,a,yyyyy.yy,a,hhmmss,A`
    fn gll(&mut self, mut input: NmeaInputLine, info: &mut NmeaInfo) -> bool {
        let location = Self::read_location(&mut input);
        input.skip(1);
        if input.read_char() != Some('A') {
            return true;
        }
        if let Some(location) = location {
            info.location = info.stamp(location);
        }
        true
    }

    /// `$PGRMZ,alt,f|m,fix`: pressure altitude
    fn pgrmz(&mut self, mut input: NmeaInputLine, info: &mut NmeaInfo) -> bool {
        if let Some(altitude) = input.read_altitude_with_unit() {
            info.pressure_altitude = info.stamp(altitude);
        }
        true
    }

    /// `$PFLAU,rx,tx,gps,power,alarm,bearing,type,vertical,distance,id`
    fn pflau(&mut self, mut input: NmeaInputLine, info: &mut NmeaInfo) -> bool {
        let rx = input.read_u32().unwrap_or(0);
        let tx = input.read_u32().unwrap_or(0) != 0;
        let gps_fix = input.read_u32().unwrap_or(0);
        input.skip(1);
        let alarm_level = FlarmAlarmLevel::from_code(input.read_u32().unwrap_or(0));

        info.flarm.status = info.stamp(FlarmStatus {
            rx,
            tx,
            gps_fix,
            alarm_level,
        });
        true
    }

    /// `$PFLAA,alarm,north,east,vertical,idtype,id,track,turnrate,speed,climb,type`
    fn pflaa(&mut self, mut input: NmeaInputLine, info: &mut NmeaInfo) -> bool {
        let alarm_level = FlarmAlarmLevel::from_code(input.read_u32().unwrap_or(0));
        let (Some(north), Some(east)) = (input.read_f64(), input.read_f64()) else {
            return false;
        };
        let vertical = input.read_f64().unwrap_or(0.0);
        input.skip(1);
        let Some(id) = input.read_token(6) else {
            return false;
        };
        let track = input.read_f64();
        input.skip(1);
        let speed = input.read_f64();
        let climb_rate = input.read_f64();

        info.flarm.update_traffic(Stamped {
            value: FlarmTraffic {
                id: id.to_owned(),
                alarm_level,
                relative_north: north,
                relative_east: east,
                relative_altitude: vertical,
                track,
                speed,
                climb_rate,
            },
            at: info.clock,
        });
        true
    }

    /// `$PFLAV,A,hw,sw,obstacle`
    fn pflav(&mut self, mut input: NmeaInputLine, info: &mut NmeaInfo) -> bool {
        if input.read_char() != Some('A') {
            return false;
        }
        let hardware = input.read_str().to_owned();
        let software = input.read_str().to_owned();
        let obstacle_database = input.read_str().to_owned();
        info.flarm.version = info.stamp(FlarmVersion {
            hardware,
            software,
            obstacle_database,
        });
        true
    }
}
