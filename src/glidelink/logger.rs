use std::path::PathBuf;

use clap::Parser;
use glidelink::error::{DeviceError, DeviceResult};
use glidelink::operation::{NullOperationEnvironment, OperationEnvironment, ProgressEnvironment};

use crate::port_options::{PortOptions, first};

#[derive(Parser, Debug, Clone)]
pub(crate) struct FlightsOptions {
    #[clap(flatten)]
    port: PortOptions,

    /// Print the list as JSON
    #[clap(long, default_value_t = false)]
    json: bool,
}

#[derive(Parser, Debug, Clone)]
pub(crate) struct DownloadOptions {
    #[clap(flatten)]
    port: PortOptions,

    /// Flight number as printed by `flights`
    #[clap(short, long)]
    flight: usize,

    /// Target IGC file
    #[clap(short, long)]
    output: PathBuf,
}

pub(crate) fn handle_flights(opts: FlightsOptions) -> DeviceResult<()> {
    let manager = opts.port.open()?;
    let descriptor = first(&manager)?;

    let env = ProgressEnvironment::new(&NullOperationEnvironment, "Reading flight list");
    let flights = descriptor.read_flight_list(&env);
    env.finish();
    let flights = flights?;

    if opts.json {
        let json = serde_json::to_string_pretty(&flights)
            .map_err(|e| DeviceError::Protocol(e.to_string()))?;
        println!("{}", json);
    } else {
        for (i, flight) in flights.iter().enumerate() {
            println!(
                "{:3}  {}  {} - {}",
                i, flight.date, flight.start_time, flight.end_time
            );
        }
    }
    Ok(())
}

pub(crate) fn handle_download(opts: DownloadOptions) -> DeviceResult<()> {
    let manager = opts.port.open()?;
    let descriptor = first(&manager)?;

    let flights = descriptor.read_flight_list(&NullOperationEnvironment)?;
    let flight = flights.get(opts.flight).ok_or_else(|| {
        DeviceError::Configuration(format!(
            "no flight {}, the logger has {}",
            opts.flight,
            flights.len()
        ))
    })?;

    let env = ProgressEnvironment::new(&NullOperationEnvironment, "Downloading");
    match descriptor.download_flight(flight, &opts.output, &env) {
        Ok(()) => {
            env.finish();
            println!("Saved {}", opts.output.display());
            Ok(())
        }
        Err(e) => {
            env.set_error_message(&e.to_string());
            Err(e)
        }
    }
}
