use clap::Subcommand;
use glidelink::error::DeviceResult;
use glidelink::operation::NullOperationEnvironment;

use crate::port_options::{PortOptions, first};

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum SettingCommand {
    /// Ask the device for the current value
    Get {
        #[clap(flatten)]
        port: PortOptions,

        name: String,
    },

    /// Change a value on the device
    Set {
        #[clap(flatten)]
        port: PortOptions,

        name: String,

        value: String,
    },
}

pub(crate) fn handle_setting(cmd: SettingCommand) -> DeviceResult<()> {
    match cmd {
        SettingCommand::Get { port, name } => {
            let manager = port.open()?;
            let value = first(&manager)?.read_setting(&name, &NullOperationEnvironment)?;
            println!("{}={}", name, value);
        }
        SettingCommand::Set { port, name, value } => {
            let manager = port.open()?;
            first(&manager)?.write_setting(&name, &value, &NullOperationEnvironment)?;
        }
    }
    Ok(())
}
