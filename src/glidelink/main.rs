use clap::{Parser, Subcommand};
use glidelink::error::DeviceResult;

mod declare;
mod drivers;
mod logger;
mod monitor;
mod port_options;
mod setting;

use declare::{DeclareOptions, handle_declare};
use logger::{DownloadOptions, FlightsOptions, handle_download, handle_flights};
use monitor::{MonitorOptions, handle_monitor};
use setting::{SettingCommand, handle_setting};

#[derive(Parser, Debug)]
#[command(version, long_about = None)]
struct Cli {
    /// More output; repeat for protocol traces
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// List the available drivers and what they support
    #[command(name = "drivers")]
    Drivers,

    /// Open a device and print what it reports
    #[command(name = "monitor", alias = "m")]
    Monitor(MonitorOptions),

    /// List the flights recorded on the device logger
    #[command(name = "flights", alias = "f")]
    Flights(FlightsOptions),

    /// Download a recorded flight to an IGC file
    #[command(name = "download", alias = "d")]
    Download(DownloadOptions),

    /// Read or write a device setting
    #[command(name = "setting", alias = "s", subcommand)]
    Setting(SettingCommand),

    /// Send a task declaration to the device
    #[command(name = "declare")]
    Declare(DeclareOptions),
}

fn main() -> DeviceResult<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Command::Drivers => drivers::handle_drivers(),
        Command::Monitor(opts) => handle_monitor(opts)?,
        Command::Flights(opts) => handle_flights(opts)?,
        Command::Download(opts) => handle_download(opts)?,
        Command::Setting(cmd) => handle_setting(cmd)?,
        Command::Declare(opts) => handle_declare(opts)?,
    }

    Ok(())
}
