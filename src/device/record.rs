use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::constants::MAX_RECORDED_FLIGHTS;

/// Where a flight lives on the device that recorded it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightLocator {
    /// Record number for the FLARM binary protocol
    Flarm { index: u8 },

    /// File name on an LX Nano logger
    Nano { filename: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedFlightInfo {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub locator: FlightLocator,
}

/// The flights a logger returned, never more than [`MAX_RECORDED_FLIGHTS`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordedFlightList {
    flights: Vec<RecordedFlightInfo>,
}

impl RecordedFlightList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_full(&self) -> bool {
        self.flights.len() >= MAX_RECORDED_FLIGHTS
    }

    pub fn remaining(&self) -> usize {
        MAX_RECORDED_FLIGHTS - self.flights.len()
    }

    /// Appends a flight; returns `false` once the list is full
    pub fn push(&mut self, flight: RecordedFlightInfo) -> bool {
        if self.is_full() {
            return false;
        }
        self.flights.push(flight);
        true
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RecordedFlightInfo> {
        self.flights.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordedFlightInfo> {
        self.flights.iter()
    }
}
