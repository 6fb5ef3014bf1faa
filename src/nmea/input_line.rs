/// Cursor over the comma separated fields of one NMEA sentence.
///
/// Readers return `None` for missing or empty fields instead of failing,
/// so a short sentence simply yields fewer values.
#[derive(Debug, Clone)]
pub struct NmeaInputLine<'a> {
    rest: Option<&'a str>,
}

impl<'a> NmeaInputLine<'a> {
    /// Accepts either a full sentence (`$...*XX`) or its bare body
    pub fn new(line: &'a str) -> Self {
        let line = line.trim_end();
        let line = line.strip_prefix('$').unwrap_or(line);
        let line = match line.rfind('*') {
            Some(star) if line.len() - star == 3 => &line[..star],
            _ => line,
        };
        NmeaInputLine { rest: Some(line) }
    }

    /// The next raw field, `None` past the end of the sentence
    pub fn next_field(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        match rest.find(',') {
            Some(comma) => {
                self.rest = Some(&rest[comma + 1..]);
                Some(&rest[..comma])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }

    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.next_field();
        }
    }

    /// The next field as a string, empty when missing
    pub fn read_str(&mut self) -> &'a str {
        self.next_field().unwrap_or("")
    }

    pub fn read_nonempty(&mut self) -> Option<&'a str> {
        self.next_field().filter(|s| !s.is_empty())
    }

    /// The next field cut to at most `max_len` characters
    pub fn read_token(&mut self, max_len: usize) -> Option<&'a str> {
        let field = self.read_nonempty()?;
        match field.char_indices().nth(max_len) {
            Some((end, _)) => Some(&field[..end]),
            None => Some(field),
        }
    }

    pub fn read_char(&mut self) -> Option<char> {
        self.read_nonempty()?.chars().next()
    }

    /// Everything that has not been read yet, including commas
    pub fn rest(&self) -> &'a str {
        self.rest.unwrap_or("")
    }

    pub fn read_f64(&mut self) -> Option<f64> {
        self.read_nonempty()?.trim().parse().ok()
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.read_nonempty()?.trim().parse().ok()
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_nonempty()?.trim().parse().ok()
    }

    pub fn read_hex(&mut self) -> Option<u32> {
        u32::from_str_radix(self.read_nonempty()?.trim(), 16).ok()
    }

    /// Reads a number followed by a unit field and converts it with the
    /// factor `unit` returns; an unknown unit yields `None`
    pub fn read_with_unit(&mut self, unit: impl FnOnce(char) -> Option<f64>) -> Option<f64> {
        let value = self.read_f64();
        let factor = self.read_char().and_then(unit);
        Some(value? * factor?)
    }

    /// Speed in m/s from a value and a `N` (knots), `K` (km/h) or `M` (m/s)
    /// unit field
    pub fn read_speed_with_unit(&mut self) -> Option<f64> {
        self.read_with_unit(|unit| match unit.to_ascii_uppercase() {
            'N' => Some(crate::geo::KNOTS_TO_MS),
            'K' => Some(crate::geo::KPH_TO_MS),
            'M' => Some(1.0),
            _ => None,
        })
    }

    /// Altitude in m from a value and a `M` or `F` unit field
    pub fn read_altitude_with_unit(&mut self) -> Option<f64> {
        self.read_with_unit(|unit| match unit.to_ascii_uppercase() {
            'M' => Some(1.0),
            'F' => Some(crate::geo::FEET_TO_M),
            _ => None,
        })
    }

    fn read_angle(&mut self, positive: char, negative: char) -> Option<f64> {
        let mixed = self.read_f64();
        let hemisphere = self.read_char();
        let mixed = mixed?;

        // ddmm.mmmm: whole degrees in front, decimal minutes behind
        let degrees = (mixed / 100.0).trunc();
        let minutes = mixed - degrees * 100.0;
        if !(0.0..60.0).contains(&minutes) {
            return None;
        }
        let value = degrees + minutes / 60.0;

        match hemisphere? {
            c if c == positive => Some(value),
            c if c == negative => Some(-value),
            _ => None,
        }
    }

    /// `ddmm.mmm,N|S` in degrees
    pub fn read_latitude(&mut self) -> Option<f64> {
        self.read_angle('N', 'S').filter(|v| v.abs() <= 90.0)
    }

    /// `dddmm.mmm,E|W` in degrees
    pub fn read_longitude(&mut self) -> Option<f64> {
        self.read_angle('E', 'W').filter(|v| v.abs() <= 180.0)
    }
}
