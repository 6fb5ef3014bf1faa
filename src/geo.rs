use serde::{Deserialize, Serialize};

/// WGS84 position in degrees, north and east positive
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        GeoPoint {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

pub(crate) const KNOTS_TO_MS: f64 = 1852.0 / 3600.0;
pub(crate) const KPH_TO_MS: f64 = 1.0 / 3.6;
pub(crate) const FEET_TO_M: f64 = 0.3048;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range() {
        assert!(GeoPoint::new(45.0, 7.0).is_valid());
        assert!(!GeoPoint::new(95.0, 7.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 7.0).is_valid());
    }
}
