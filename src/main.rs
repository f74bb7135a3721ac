use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use hotplug_passthru::cli::Cli;
use hotplug_passthru::core::sequencer;
use hotplug_passthru::utils::logging;
use hotplug_passthru::vsphere::client::VcClient;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    let (config, plan) = cli.into_parts();
    info!("hotplug-passthru {}", hotplug_passthru::VERSION);

    info!("Connecting to VC {}", config.endpoint);
    let client = match VcClient::connect(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to VC {}: {}", config.endpoint, e.report());
            return ExitCode::from(e.exit_code());
        }
    };
    info!("Created VC session for VC {}", config.endpoint);

    match sequencer::execute(&client, &plan) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e.report());
            ExitCode::from(e.exit_code())
        }
    }
}
