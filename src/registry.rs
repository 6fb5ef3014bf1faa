use bitflags::bitflags;

use crate::device::DeviceFactory;
use crate::drivers;

bitflags! {
    /// What a driver supports. Callers check these before invoking the
    /// corresponding [`Device`](crate::device::Device) operations.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct DriverFlags: u32 {
        /// Forwards NMEA received from other devices
        const NMEA_OUT = 1;
        const DECLARE = 1 << 1;
        /// Keeps a flight log that can be listed and downloaded
        const LOGGER = 1 << 2;
        /// Can switch to a faster baud rate for bulk transfers
        const BULK_BAUD_RATE = 1 << 3;
        /// Has a device management dialog
        const MANAGE = 1 << 4;
        /// Is silent for long periods; no link timeout
        const NO_TIMEOUT = 1 << 5;
        /// Delivers binary GPS data instead of NMEA
        const RAW_GPS_DATA = 1 << 6;
        const RECEIVE_SETTINGS = 1 << 7;
        const SEND_SETTINGS = 1 << 8;
        /// Can forward the port to a device connected behind it
        const PASS_THROUGH = 1 << 9;
    }
}

/// One driver of the registry
#[derive(Debug, Clone, Copy)]
pub struct DriverEntry {
    pub name: &'static str,
    pub display_name: &'static str,
    pub flags: DriverFlags,

    /// `None` for drivers whose lines only the generic parser reads
    pub factory: Option<DeviceFactory>,
}

impl DriverEntry {
    pub fn supports(&self, flags: DriverFlags) -> bool {
        self.flags.contains(flags)
    }
}

/// Ordered table of drivers. Entry 0 is the fallback for unknown names.
#[derive(Debug, Clone)]
pub struct DriverRegistry {
    entries: Vec<DriverEntry>,
}

pub const GENERIC: DriverEntry = DriverEntry {
    name: "generic",
    display_name: "Generic NMEA",
    flags: DriverFlags::empty(),
    factory: None,
};

impl Default for DriverRegistry {
    fn default() -> Self {
        DriverRegistry::new(vec![
            GENERIC,
            drivers::flarm::REGISTRATION,
            drivers::lxnav::REGISTRATION,
        ])
    }
}

impl DriverRegistry {
    /// Builds a registry from an explicit table; the first entry is the
    /// fallback and must exist
    pub fn new(entries: Vec<DriverEntry>) -> Self {
        let entries = if entries.is_empty() { vec![GENERIC] } else { entries };
        DriverRegistry { entries }
    }

    pub fn entries(&self) -> &[DriverEntry] {
        &self.entries
    }

    /// Case-insensitive lookup that never fails: unknown names resolve to
    /// the fallback entry so there is always a parser
    pub fn find_driver_by_name(&self, name: &str) -> &DriverEntry {
        self.lookup(name).unwrap_or(&self.entries[0])
    }

    /// Exact lookup without fallback
    pub fn lookup(&self, name: &str) -> Option<&DriverEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn is_fallback(&self, entry: &DriverEntry) -> bool {
        entry.name == self.entries[0].name
    }
}
