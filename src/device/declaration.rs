use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub name: String,
    pub location: GeoPoint,
    /// m above MSL
    #[serde(default)]
    pub elevation: f64,
}

/// A task declaration as sent to a flight recorder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Declaration {
    pub pilot_name: String,
    pub copilot_name: String,
    pub aircraft_type: String,
    pub aircraft_registration: String,
    pub competition_id: String,
    pub competition_class: String,
    pub turnpoints: Vec<Waypoint>,
}

impl Declaration {
    /// A declaration needs a start and a finish
    pub fn is_valid(&self) -> bool {
        self.turnpoints.len() >= 2 && self.turnpoints.iter().all(|t| t.location.is_valid())
    }
}
