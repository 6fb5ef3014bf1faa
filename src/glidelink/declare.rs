use std::path::PathBuf;

use clap::Parser;
use glidelink::device::Declaration;
use glidelink::error::{DeviceError, DeviceResult};
use glidelink::operation::{NullOperationEnvironment, ProgressEnvironment};

use crate::port_options::{PortOptions, first};

#[derive(Parser, Debug, Clone)]
pub(crate) struct DeclareOptions {
    #[clap(flatten)]
    port: PortOptions,

    /// JSON file with pilot, glider and turn points
    #[clap(short = 'f', long)]
    file: PathBuf,
}

pub(crate) fn handle_declare(opts: DeclareOptions) -> DeviceResult<()> {
    let json = std::fs::read_to_string(&opts.file)?;
    let declaration: Declaration = serde_json::from_str(&json).map_err(|e| {
        DeviceError::Configuration(format!("{}: {}", opts.file.display(), e))
    })?;

    let manager = opts.port.open()?;
    let descriptor = first(&manager)?;

    let env = ProgressEnvironment::new(&NullOperationEnvironment, "Declaring");
    let result = descriptor.declare(&declaration, &env);
    env.finish();
    result?;

    println!(
        "Declared {} turn points to {}",
        declaration.turnpoints.len(),
        descriptor.config().port_name()
    );
    Ok(())
}
