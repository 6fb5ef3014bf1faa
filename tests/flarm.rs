mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert2::{assert, let_assert};
use chrono::NaiveDate;

use common::{FlarmScript, LineFeeder, MockFlarm, init_logging, mock_port, wait_until};
use glidelink::device::{Declaration, Device, FlightLocator, RecordedFlightInfo, Waypoint};
use glidelink::drivers::flarm::frame::MessageType;
use glidelink::drivers::flarm::{FlarmDevice, Mode};
use glidelink::error::DeviceError;
use glidelink::geo::GeoPoint;
use glidelink::info::NmeaInfo;
use glidelink::nmea::format_sentence;
use glidelink::operation::NullOperationEnvironment;

fn two_flights() -> FlarmScript {
    FlarmScript {
        flights: vec![
            "2012-05-01|10:15:00|12:30:59|SN1234".to_string(),
            "2012-05-02|09:00:00|15:45:00|SN1234".to_string(),
        ],
        igc: (0..5)
            .flat_map(|i| format!("B1015{:02}4730000N00815000EA0050000500\r\n", i).into_bytes())
            .collect(),
        ..FlarmScript::default()
    }
}

#[test]
fn enable_nmea_twice_sends_nothing_more() {
    init_logging();
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = FlarmDevice::new(port.clone(), None);

    assert!(device.mode() == Mode::Unknown);
    assert!(let Ok(()) = device.enable_nmea(&env));
    assert!(device.mode() == Mode::Nmea);
    assert!(peer.host_text().contains("$PFLAV,R*"));

    let sent = peer.host_log().len();
    assert!(let Ok(()) = device.enable_nmea(&env));
    assert!(device.mode() == Mode::Nmea);
    assert!(peer.host_log().len() == sent);
}

#[test]
fn stores_reported_settings() {
    let device = FlarmDevice::new(mock_port(19200).0, None);
    let mut info = NmeaInfo::new(Instant::now());

    assert!(device.parse_line(format_sentence("PFLAC,A,PILOT,JOHN DOE").trim(), &mut info));
    assert!(device.get_setting("PILOT").as_deref() == Some("JOHN DOE"));

    // a corrupted checksum leaves the map alone
    assert!(!device.parse_line("$PFLAC,A,PILOT,JANE*00", &mut info));
    assert!(device.get_setting("PILOT").as_deref() == Some("JOHN DOE"));

    // errors are consumed without storing anything
    assert!(device.parse_line(format_sentence("PFLAC,A,ERROR").trim(), &mut info));
    assert!(device.get_setting("ERROR").is_none());
}

#[test]
fn settings_round_trip_through_the_receive_thread() {
    init_logging();
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = Arc::new(FlarmDevice::new(port.clone(), None));
    let _feeder = LineFeeder::attach(&*port, device.clone());
    let flarm = MockFlarm::start(peer, FlarmScript::default());

    let_assert!(Ok(pilot) = device.get_pilot(&env));
    assert!(pilot == "NOBODY");
    assert!(let Ok(25500) = device.get_range(&env));

    assert!(let Ok(()) = device.set_pilot("JOHN,DOE", &env));
    assert!(device.get_setting("PILOT").as_deref() == Some("JOHN DOE"));
    assert!(flarm.lines().contains(&"PFLAC,S,PILOT,JOHN DOE".to_string()));

    assert!(let Ok(()) = device.set_stealth_mode(true, &env));
    assert!(let Ok(true) = device.get_stealth_mode(&env));
    assert!(device.mode() == Mode::Nmea);
}

#[test]
fn unsolicited_setting_reaches_the_map() {
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = Arc::new(FlarmDevice::new(port.clone(), None));
    let _feeder = LineFeeder::attach(&*port, device.clone());
    assert!(let Ok(()) = device.enable_nmea(&env));

    peer.send_line("PFLAC,A,COMPID,XY");
    assert!(wait_until(Duration::from_secs(2), || {
        device.get_setting("COMPID").as_deref() == Some("XY")
    }));
}

#[test]
fn reads_flight_list_in_binary_mode() {
    init_logging();
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = FlarmDevice::new(port.clone(), None);
    let flarm = MockFlarm::start(peer, two_flights());

    let_assert!(Ok(list) = device.read_flight_list(&env));
    assert!(list.len() == 2);
    let_assert!(Some(first) = list.get(0));
    assert!(first.date == NaiveDate::from_ymd_opt(2012, 5, 1).unwrap());
    assert!(first.locator == FlightLocator::Flarm { index: 0 });
    let_assert!(Some(second) = list.get(1));
    assert!(second.locator == FlightLocator::Flarm { index: 1 });

    // the list leaves the unit in binary mode until NMEA is requested
    assert!(device.mode() == Mode::Binary);
    assert!(flarm.log().binary);
    assert!(flarm.lines().contains(&"PFLAX".to_string()));

    assert!(let Ok(()) = device.enable_nmea(&env));
    assert!(device.mode() == Mode::Nmea);
    assert!(!flarm.log().binary);
    assert!(flarm.log().frames.contains(&MessageType::Exit));
}

#[test]
fn downloads_igc_file() {
    init_logging();
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = FlarmDevice::new(port.clone(), None);
    let script = two_flights();
    let igc = script.igc.clone();
    let _flarm = MockFlarm::start(peer, script);

    let_assert!(Ok(list) = device.read_flight_list(&env));
    let_assert!(Some(flight) = list.get(1));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flight.igc");
    assert!(let Ok(()) = device.download_flight(flight, &path, &env));
    assert!(std::fs::read(&path).unwrap() == igc);
}

#[test]
fn download_of_missing_record_removes_partial_file() {
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = FlarmDevice::new(port.clone(), None);
    let _flarm = MockFlarm::start(peer, two_flights());

    let missing = RecordedFlightInfo {
        date: NaiveDate::from_ymd_opt(2012, 5, 1).unwrap(),
        start_time: Default::default(),
        end_time: Default::default(),
        locator: FlightLocator::Flarm { index: 7 },
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.igc");
    assert!(let Err(DeviceError::Protocol(_)) = device.download_flight(&missing, &path, &env));
    assert!(!path.exists());
}

#[test]
fn rejects_flights_of_other_loggers() {
    let env = NullOperationEnvironment;
    let device = FlarmDevice::new(mock_port(19200).0, None);
    let nano = RecordedFlightInfo {
        date: NaiveDate::from_ymd_opt(2012, 5, 1).unwrap(),
        start_time: Default::default(),
        end_time: Default::default(),
        locator: FlightLocator::Nano {
            filename: "X.IGC".to_string(),
        },
    };
    let dir = tempfile::tempdir().unwrap();
    assert!(let Err(DeviceError::Unsupported(_)) = device.download_flight(&nano, &dir.path().join("x.igc"), &env));
}

#[test]
fn declares_task_in_order() {
    init_logging();
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = FlarmDevice::new(port.clone(), None);
    let flarm = MockFlarm::start(peer, FlarmScript::default());

    let declaration = Declaration {
        pilot_name: "Jane Doe".to_string(),
        aircraft_registration: "D-1234".to_string(),
        aircraft_type: "ASG 29".to_string(),
        competition_id: "XY".to_string(),
        turnpoints: vec![
            Waypoint {
                name: "Start".to_string(),
                location: GeoPoint::new(47.5, 8.25),
                elevation: 400.0,
            },
            Waypoint {
                name: "Goal, north".to_string(),
                location: GeoPoint::new(48.0, 9.0),
                elevation: 500.0,
            },
        ],
        ..Declaration::default()
    };
    assert!(let Ok(()) = device.declare(&declaration, &env));
    assert!(device.mode() == Mode::Text);

    let sent: Vec<String> = flarm
        .lines()
        .into_iter()
        .filter(|line| line.starts_with("PFLAC,S,"))
        .collect();
    assert!(
        sent == [
            "PFLAC,S,PILOT,Jane Doe",
            "PFLAC,S,GLIDERID,D-1234",
            "PFLAC,S,GLIDERTYPE,ASG 29",
            "PFLAC,S,COMPID,XY",
            "PFLAC,S,NEWTASK,Task",
            "PFLAC,S,ADDWP,0000000N,00000000E,T",
            "PFLAC,S,ADDWP,4730000N,00815000E,Start",
            "PFLAC,S,ADDWP,4800000N,00900000E,Goal  north",
            "PFLAC,S,ADDWP,0000000N,00000000E,L",
        ]
    );

    // settings work in text mode as well
    let_assert!(Ok(pilot) = device.get_pilot(&env));
    assert!(pilot == "Jane Doe");
}

#[test]
fn silent_unit_times_out_in_unknown_mode() {
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = FlarmDevice::new(port.clone(), None);
    let flarm = MockFlarm::start(
        peer,
        FlarmScript {
            answer_pings: false,
            ..two_flights()
        },
    );

    let_assert!(Err(e) = device.read_flight_list(&env));
    assert!(e.is_timeout());
    assert!(device.mode() == Mode::Unknown);
    assert!(flarm.log().frames.iter().filter(|&&t| t == MessageType::Ping).count() == 10);
}

#[test]
fn truncated_reply_times_out() {
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = FlarmDevice::new(port.clone(), None);
    let _flarm = MockFlarm::start(
        peer,
        FlarmScript {
            truncate_record_info: true,
            ..two_flights()
        },
    );

    let_assert!(Err(e) = device.read_flight_list(&env));
    assert!(e.is_timeout());
}

#[test]
fn bulk_transfer_switches_baud_rate_and_back() {
    init_logging();
    let env = NullOperationEnvironment;
    let (port, peer) = mock_port(19200);
    let device = FlarmDevice::new(port.clone(), Some(57600));
    let flarm = MockFlarm::start(peer.clone(), two_flights());

    let_assert!(Ok(list) = device.read_flight_list(&env));
    assert!(list.len() == 2);
    assert!(peer.baud_rate() == 57600);
    assert!(flarm.log().baud_rate_indices == [5]);

    assert!(let Ok(()) = device.enable_nmea(&env));
    assert!(peer.baud_rate() == 19200);
    assert!(peer.baud_history().ends_with(&[57600, 19200]));
}
