use std::time::Duration;

use clap::Parser;
use glidelink::NmeaInfo;
use glidelink::error::DeviceResult;

use crate::port_options::{PortOptions, first};

#[derive(Parser, Debug, Clone)]
pub(crate) struct MonitorOptions {
    #[clap(flatten)]
    port: PortOptions,

    /// Seconds to listen before printing the snapshot
    #[clap(short = 't', long, default_value_t = 10)]
    duration: u64,

    /// Log every byte sent and received
    #[clap(long, default_value_t = false)]
    dump: bool,
}

pub(crate) fn handle_monitor(opts: MonitorOptions) -> DeviceResult<()> {
    let manager = opts.port.open()?;
    let descriptor = first(&manager)?;
    if opts.dump {
        if let Some(port) = descriptor.port() {
            port.enable();
        }
    }

    for _ in 0..opts.duration {
        std::thread::sleep(Duration::from_secs(1));
        manager.tick();
    }

    println!("alive: {}", descriptor.is_alive());
    print_snapshot(&manager.blackboard().snapshot());
    Ok(())
}

fn print_snapshot(info: &NmeaInfo) {
    if let Some(device) = &info.device {
        let device = &device.value;
        println!(
            "device: {} serial {} software {} hardware {}",
            device.product, device.serial, device.software_version, device.hardware_version
        );
    }
    if let Some(location) = &info.location {
        println!(
            "location: {:.5} {:.5}",
            location.value.latitude, location.value.longitude
        );
    }
    if let Some(time) = &info.date_time {
        println!("time: {}", time.value);
    }
    if let Some(altitude) = &info.gps_altitude {
        println!("GPS altitude: {:.0} m", altitude.value);
    }
    if let Some(altitude) = info.baro_altitude.as_ref().or(info.pressure_altitude.as_ref()) {
        println!("barometric altitude: {:.0} m", altitude.value);
    }
    if let Some(speed) = &info.ground_speed {
        println!("ground speed: {:.1} m/s", speed.value);
    }
    if let Some(vario) = &info.total_energy_vario {
        println!("vario: {:.1} m/s", vario.value);
    }
    if let Some(ias) = &info.indicated_airspeed {
        println!("indicated airspeed: {:.1} m/s", ias.value);
    }
    if let Some(mac_cready) = &info.settings.mac_cready {
        println!("MacCready: {:.1} m/s", mac_cready.value);
    }
    if let Some(status) = &info.flarm.status {
        println!(
            "FLARM: {} targets received, alarm {:?}",
            status.value.rx, status.value.alarm_level
        );
    }
    for traffic in &info.flarm.traffic {
        let t = &traffic.value;
        println!(
            "  {} {:+.0} m N {:+.0} m E {:+.0} m",
            t.id, t.relative_north, t.relative_east, t.relative_altitude
        );
    }
}
