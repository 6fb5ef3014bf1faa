use std::time::Duration;

/// Poll interval of blocking port reads; bounds how late a cancellation is noticed
pub(crate) const PORT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub(crate) const RX_BUFFER_SIZE: usize = 1024;

/// Longest line accepted by the line splitter and the NMEA reader
pub(crate) const MAX_LINE_LENGTH: usize = 256;

pub(crate) const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_REOPEN_BACKOFF: Duration = Duration::from_secs(30);
pub(crate) const WAIT_CONNECTED_TIMEOUT: Duration = Duration::from_secs(30);
/// A FLARM target not reported for this long is dropped from the snapshot
pub(crate) const FLARM_TRAFFIC_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const FLARM_PING_RETRIES: u32 = 10;
pub(crate) const FLARM_PING_TIMEOUT: Duration = Duration::from_millis(500);
pub(crate) const FLARM_RESET_TIMEOUT: Duration = Duration::from_millis(500);
pub(crate) const FLARM_SETTING_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const FLARM_RECORD_TIMEOUT: Duration = Duration::from_secs(1);
pub(crate) const FLARM_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const FLARM_DECLARE_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) const LXNAV_SETTING_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const LXNAV_IDENTIFY_TIMEOUT: Duration = Duration::from_millis(500);
pub(crate) const LXNAV_LOGGER_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound of flights a single `read_flight_list()` returns
pub const MAX_RECORDED_FLIGHTS: usize = 128;
