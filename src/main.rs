/// Multi-root TreeKEM simulator - Main entry point
///
/// Builds a group, invites external nodes and checks that every participant
/// converges on the same roots after a series of updates.
use log::{error, info};
use multi_treekem::{config::SimulationConfig, simulation, Result};

fn main() -> Result<()> {
    let config = SimulationConfig::from_args();

    // Initialize logger with appropriate level based on verbose flag
    let log_level = if config.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    info!("Starting multi-root TreeKEM simulation");
    info!("Members: {}", config.members);
    info!("External nodes: {}", config.chatbots);
    info!("Rounds: {}", config.rounds);

    let report = simulation::run(&config)?;
    println!("{}", report);

    if !report.converged {
        error!("Participants did not converge");
        std::process::exit(1);
    }

    Ok(())
}
