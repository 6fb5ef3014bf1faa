mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert2::{assert, check, let_assert};

use common::{FlarmScript, MockFlarm, MockPeer, MockPortFactory, init_logging, wait_until};
use glidelink::descriptor::{SettingsProvider, SettingsSnapshot};
use glidelink::device::{Declaration, Waypoint};
use glidelink::geo::GeoPoint;
use glidelink::error::DeviceError;
use glidelink::i18n::TableCatalog;
use glidelink::operation::NullOperationEnvironment;
use glidelink::port::{Port, PortState};
use glidelink::{DeviceConfig, DeviceManager, Lifecycle, ManagerOptions, Timing};

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const RMC: &str = "GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W";

fn manager(factory: &Arc<MockPortFactory>, timing: Timing, configs: Vec<DeviceConfig>) -> DeviceManager {
    DeviceManager::with_options(
        configs,
        ManagerOptions {
            factory: factory.clone(),
            timing,
            ..ManagerOptions::default()
        },
    )
}

/// One open device with the given driver
fn open_single(driver: &str, timing: Timing) -> (DeviceManager, MockPeer, Arc<MockPortFactory>) {
    init_logging();
    let factory = MockPortFactory::new();
    let peer = factory.push_port(19200);
    let manager = manager(&factory, timing, vec![DeviceConfig::serial("/dev/ttyMock", 19200, driver)]);

    let descriptor = manager.descriptor(0).unwrap();
    assert!(let Ok(()) = descriptor.open());
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Open);
    (manager, peer, factory)
}

struct FixedSettings(SettingsSnapshot);

impl SettingsProvider for FixedSettings {
    fn current_settings(&self) -> SettingsSnapshot {
        self.0
    }
}

#[test]
fn opens_in_background_and_feeds_blackboard() {
    let (manager, peer, _factory) = open_single("generic", Timing::default());
    let descriptor = manager.descriptor(0).unwrap();
    check!(descriptor.opened_at().is_some());
    check!(!descriptor.is_alive());

    peer.send_line(RMC);
    assert!(wait_until(Duration::from_secs(2), || {
        manager.blackboard().snapshot().location.is_some()
    }));
    let_assert!(Some(location) = manager.blackboard().snapshot().location);
    assert!((location.value.latitude - 48.1173).abs() < 1e-4);
    assert!(descriptor.is_alive());
}

#[test]
fn generic_driver_cannot_be_borrowed() {
    let (manager, _peer, _factory) = open_single("no-such-driver", Timing::default());
    let descriptor = manager.descriptor(0).unwrap();
    assert!(descriptor.driver().name == "generic");

    assert!(descriptor.try_borrow().is_none());
    let env = NullOperationEnvironment;
    assert!(let Err(DeviceError::Unsupported(_)) = descriptor.read_flight_list(&env));
    assert!(!descriptor.put_mac_cready(1.0, &env));
}

#[test]
fn lease_is_exclusive() {
    let (manager, _peer, _factory) = open_single("flarm", Timing::default());
    let descriptor = manager.descriptor(0).unwrap();

    let lease = descriptor.try_borrow();
    assert!(lease.is_some());
    assert!(descriptor.is_borrowed());
    assert!(descriptor.try_borrow().is_none());
    assert!(let Err(DeviceError::Busy) = descriptor.close());
    assert!(let Err(DeviceError::Busy) = descriptor.read_setting("PILOT", &NullOperationEnvironment));

    drop(lease);
    assert!(!descriptor.is_borrowed());
    assert!(let Ok(()) = descriptor.close());
    assert!(descriptor.lifecycle() == Lifecycle::Closed);
    assert!(descriptor.closed_at().is_some());
    assert!(descriptor.try_borrow().is_none());
}

#[test]
fn closing_unopened_descriptor_does_nothing() {
    let factory = MockPortFactory::new();
    let manager = manager(&factory, Timing::default(), vec![DeviceConfig::serial("/dev/ttyMock", 4800, "flarm")]);
    let descriptor = manager.descriptor(0).unwrap();

    assert!(let Ok(()) = descriptor.close());
    assert!(descriptor.lifecycle() == Lifecycle::Closed);
    assert!(descriptor.closed_at().is_none());
    assert!(factory.attempts() == 0);
}

#[test]
fn failed_open_reports_translated_message() {
    init_logging();
    let factory = MockPortFactory::new();
    factory.push_failure("no such device");
    let catalog =
        TableCatalog::from_json(r#"{"Unable to open port": "Port kann nicht geöffnet werden"}"#).unwrap();
    let manager = DeviceManager::with_options(
        vec![DeviceConfig::serial("/dev/ttyMock", 4800, "generic")],
        ManagerOptions {
            factory: factory.clone(),
            catalog: Arc::new(catalog),
            ..ManagerOptions::default()
        },
    );
    let descriptor = manager.descriptor(0).unwrap();

    assert!(let Ok(()) = descriptor.open());
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Failed);
    assert!(descriptor.failures() == 1);
    let_assert!(Some(message) = descriptor.error_message());
    assert!(message.starts_with("Port kann nicht geöffnet werden /dev/ttyMock: "));
    assert!(message.contains("no such device"));
}

#[test]
fn auto_reopen_waits_for_backoff() {
    init_logging();
    let factory = MockPortFactory::new();
    factory.push_failure("busy");
    let timing = Timing {
        reopen_backoff: Duration::from_millis(300),
        ..Timing::default()
    };
    let manager = manager(&factory, timing, vec![DeviceConfig::serial("/dev/ttyMock", 4800, "generic")]);
    let descriptor = manager.descriptor(0).unwrap();

    assert!(let Ok(()) = descriptor.open());
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Failed);

    // too early
    descriptor.auto_reopen();
    assert!(factory.attempts() == 1);

    let _peer = factory.push_port(4800);
    thread::sleep(Duration::from_millis(350));
    descriptor.auto_reopen();
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Open);
    assert!(factory.attempts() == 2);
    assert!(descriptor.error_message().is_none());
    assert!(descriptor.failures() == 0);
}

#[test]
fn broken_port_is_reopened() {
    let timing = Timing {
        reopen_backoff: Duration::from_millis(50),
        ..Timing::default()
    };
    let (manager, peer, factory) = open_single("generic", timing);
    let descriptor = manager.descriptor(0).unwrap();
    let _second = factory.push_port(19200);

    peer.close();
    let_assert!(Some(port) = descriptor.port());
    assert!(wait_until(Duration::from_secs(2), || port.state() == PortState::Failed));

    thread::sleep(Duration::from_millis(60));
    manager.tick();
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Open);
    assert!(descriptor.failures() == 0);
    assert!(factory.attempts() == 2);
}

#[test]
fn silence_triggers_link_timeout() {
    let timing = Timing {
        link_timeout: Duration::from_millis(300),
        ..Timing::default()
    };
    let (manager, peer, _factory) = open_single("flarm", timing);
    let descriptor = manager.descriptor(0).unwrap();
    let requests = || peer.host_text().matches("$PFLAV,R*").count();
    assert!(requests() == 1);

    thread::sleep(Duration::from_millis(400));
    descriptor.on_sys_ticker(&NullOperationEnvironment);
    assert!(requests() == 2);

    // a new window starts after the timeout
    descriptor.on_sys_ticker(&NullOperationEnvironment);
    assert!(requests() == 2);
}

#[test]
fn echoed_settings_are_ignored() {
    let (manager, peer, _factory) = open_single("lxnav", Timing::default());
    let descriptor = manager.descriptor(0).unwrap();
    let env = NullOperationEnvironment;

    assert!(descriptor.put_mac_cready(2.0, &env));
    assert!(peer.host_text().contains("$PFLX2,2.0,,,,,,*"));

    peer.send_line("LXWP2,2.02,,,,,,");
    peer.send_line("LXWP2,3.5,,,,,,");

    let mut received = Vec::new();
    assert!(wait_until(Duration::from_secs(2), || {
        if let Some(mac_cready) = manager.take_device_settings().mac_cready {
            received.push(mac_cready.value);
        }
        !received.is_empty()
    }));
    assert!(received == [3.5]);
    assert!(manager.take_device_settings().is_empty());
}

#[test]
fn settings_from_device_can_be_disabled() {
    init_logging();
    let factory = MockPortFactory::new();
    let peer = factory.push_port(19200);
    let config = DeviceConfig {
        sync_from_device: false,
        ..DeviceConfig::serial("/dev/ttyMock", 19200, "lxnav")
    };
    let manager = manager(&factory, Timing::default(), vec![config]);
    manager.open_all();
    manager.wait_open(OPEN_TIMEOUT);

    peer.send_line("LXWP2,3.5,,,,,,");
    peer.send_line(RMC);
    assert!(wait_until(Duration::from_secs(2), || {
        manager.blackboard().snapshot().location.is_some()
    }));
    assert!(manager.take_device_settings().is_empty());
}

#[test]
fn provider_settings_are_pushed_on_even_ticks() {
    let (manager, peer, _factory) = open_single("lxnav", Timing::default());
    let descriptor = manager.descriptor(0).unwrap();
    manager.set_settings_provider(Arc::new(FixedSettings(SettingsSnapshot {
        mac_cready: Some(1.5),
        ..SettingsSnapshot::default()
    })));
    let pushes = || peer.host_text().matches("$PFLX2,1.5,").count();

    descriptor.on_sys_ticker(&NullOperationEnvironment);
    assert!(pushes() == 0);
    descriptor.on_sys_ticker(&NullOperationEnvironment);
    assert!(pushes() == 1);

    // unchanged values are not sent again
    descriptor.on_sys_ticker(&NullOperationEnvironment);
    descriptor.on_sys_ticker(&NullOperationEnvironment);
    assert!(pushes() == 1);
}

#[test]
fn failure_count_accumulates_until_an_open_succeeds() {
    init_logging();
    let factory = MockPortFactory::new();
    factory.push_failure("busy");
    factory.push_failure("busy");
    let timing = Timing {
        reopen_backoff: Duration::ZERO,
        ..Timing::default()
    };
    let manager = manager(&factory, timing, vec![DeviceConfig::serial("/dev/ttyMock", 4800, "generic")]);
    let descriptor = manager.descriptor(0).unwrap();

    assert!(let Ok(()) = descriptor.open());
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Failed);
    descriptor.auto_reopen();
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Failed);
    assert!(descriptor.failures() == 2);

    let _peer = factory.push_port(4800);
    descriptor.auto_reopen();
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Open);
    assert!(descriptor.failures() == 0);
}

#[test]
fn reopened_device_receives_settings_again() {
    let (manager, peer, factory) = open_single("lxnav", Timing::default());
    let descriptor = manager.descriptor(0).unwrap();
    manager.set_settings_provider(Arc::new(FixedSettings(SettingsSnapshot {
        mac_cready: Some(1.5),
        ..SettingsSnapshot::default()
    })));
    let env = NullOperationEnvironment;

    descriptor.on_sys_ticker(&env);
    descriptor.on_sys_ticker(&env);
    assert!(peer.host_text().matches("$PFLX2,1.5,").count() == 1);

    let second = factory.push_port(19200);
    assert!(let Ok(()) = descriptor.reopen());
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Open);

    descriptor.on_sys_ticker(&env);
    descriptor.on_sys_ticker(&env);
    assert!(second.host_text().matches("$PFLX2,1.5,").count() == 1);
}

#[test]
fn reopen_forgets_sent_settings() {
    let (manager, _peer, factory) = open_single("lxnav", Timing::default());
    let descriptor = manager.descriptor(0).unwrap();

    assert!(descriptor.put_mac_cready(2.0, &NullOperationEnvironment));

    let second = factory.push_port(19200);
    assert!(let Ok(()) = descriptor.reopen());
    assert!(descriptor.wait_open(OPEN_TIMEOUT) == Lifecycle::Open);

    // the new instrument was set to 2.0 by its pilot, not by us
    second.send_line("LXWP2,2.0,,,,,,");
    let mut received = Vec::new();
    assert!(wait_until(Duration::from_secs(2), || {
        if let Some(mac_cready) = manager.take_device_settings().mac_cready {
            received.push(mac_cready.value);
        }
        !received.is_empty()
    }));
    assert!(received == [2.0]);
}

#[test]
fn disabled_ports_are_skipped() {
    let factory = MockPortFactory::new();
    let _peer = factory.push_port(19200);
    let manager = manager(
        &factory,
        Timing::default(),
        vec![
            DeviceConfig::default(),
            DeviceConfig::serial("/dev/ttyMock", 19200, "flarm"),
        ],
    );

    manager.open_all();
    manager.wait_open(OPEN_TIMEOUT);
    assert!(factory.attempts() == 1);
    assert!(manager.descriptor(0).unwrap().lifecycle() == Lifecycle::Closed);
    assert!(let Err(DeviceError::Configuration(_)) = manager.descriptor(0).unwrap().open());

    let_assert!(Some(flarm) = manager.find_by_driver("FLARM"));
    assert!(flarm.index() == 1);
    assert!(flarm.is_open());
    assert!(manager.find_by_driver("lxnav").is_none());
}

#[test]
fn tick_expires_stale_traffic() {
    let timing = Timing {
        traffic_timeout: Duration::from_millis(100),
        ..Timing::default()
    };
    let (manager, peer, _factory) = open_single("flarm", timing);

    peer.send_line("PFLAA,0,-1234,1234,220,2,DD8F12,180,,30,-1.4,1");
    assert!(wait_until(Duration::from_secs(2), || {
        manager.blackboard().snapshot().flarm.traffic.len() == 1
    }));

    thread::sleep(Duration::from_millis(150));
    manager.tick();
    assert!(manager.blackboard().snapshot().flarm.traffic.is_empty());
}

#[test]
fn second_driver_needs_pass_through() {
    let factory = MockPortFactory::new();
    let config = |driver: &str| DeviceConfig {
        driver2_name: "flarm".to_string(),
        ..DeviceConfig::serial("/dev/ttyMock", 19200, driver)
    };
    let manager = manager(&factory, Timing::default(), vec![config("lxnav"), config("generic")]);

    let_assert!(Some(second) = manager.descriptor(0).unwrap().second_driver());
    assert!(second.name == "flarm");
    assert!(manager.descriptor(1).unwrap().second_driver().is_none());
    assert!(manager.find_by_driver("flarm").unwrap().index() == 0);
}

#[test]
fn declaration_is_forwarded_to_flarm_behind_vario() {
    init_logging();
    let factory = MockPortFactory::new();
    let peer = factory.push_port(19200);
    let config = DeviceConfig {
        driver2_name: "flarm".to_string(),
        ..DeviceConfig::serial("/dev/ttyMock", 19200, "lxnav")
    };
    let manager = manager(&factory, Timing::default(), vec![config]);
    let flarm = MockFlarm::start(peer.clone(), FlarmScript::default());

    manager.open_all();
    manager.wait_open(OPEN_TIMEOUT);
    let descriptor = manager.descriptor(0).unwrap();
    assert!(descriptor.is_open());

    // the vario identifies itself, which enables pass-through
    peer.send_line("LXWP1,V7,4711,1.2,2.0");
    assert!(wait_until(Duration::from_secs(2), || {
        manager.blackboard().snapshot().device.is_some()
    }));

    let declaration = Declaration {
        pilot_name: "Jane Doe".to_string(),
        turnpoints: vec![
            Waypoint {
                name: "Start".to_string(),
                location: GeoPoint::new(47.5, 8.25),
                elevation: 0.0,
            },
            Waypoint {
                name: "Goal".to_string(),
                location: GeoPoint::new(48.0, 9.0),
                elevation: 0.0,
            },
        ],
        ..Declaration::default()
    };
    let env = NullOperationEnvironment;
    assert!(let Ok(()) = descriptor.declare(&declaration, &env));
    assert!(flarm.lines().contains(&"PFLAC,S,NEWTASK,Task".to_string()));

    let text = peer.host_text();
    let direct = text.find("$PLXV0,CONNECTION,W,DIRECT*");
    let pilot = text.find("$PFLAC,S,PILOT,Jane Doe*");
    let vseven = text.find("$PLXV0,CONNECTION,W,VSEVEN*");
    assert!(direct.is_some());
    assert!(direct < pilot);
    assert!(pilot < vseven);

    // the receive thread runs again once the lease is back
    peer.send_line(RMC);
    assert!(wait_until(Duration::from_secs(2), || {
        manager.blackboard().snapshot().location.is_some()
    }));
}

#[test]
fn invalid_declaration_is_rejected_before_borrowing() {
    let (manager, _peer, _factory) = open_single("flarm", Timing::default());
    let descriptor = manager.descriptor(0).unwrap();
    let declaration = Declaration {
        turnpoints: vec![Waypoint {
            name: "Start".to_string(),
            location: GeoPoint::new(47.5, 8.25),
            elevation: 0.0,
        }],
        ..Declaration::default()
    };

    assert!(let Err(DeviceError::Configuration(_)) = descriptor.declare(&declaration, &NullOperationEnvironment));
    assert!(!descriptor.is_borrowed());
}
