mod cli;
mod create;
mod info;
mod list;
mod remove;

use std::error::Error;

use clap::Parser;
use cli::{Cli, Commands};
use vdisk_core::{Engine, EngineConfig};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            EngineConfig::from_toml_str(&text)?
        }
        None => EngineConfig::default(),
    };
    let startup_devices = config.startup_devices.clone();
    let engine = Engine::new(config);
    engine.start_devices(&startup_devices)?;

    match &cli.command {
        Commands::Create(cmd) => create::create(cmd, &engine),
        Commands::List(cmd) => list::list(cmd, &engine),
        Commands::Remove(cmd) => remove::remove(cmd, &engine),
        Commands::Info(cmd) => info::info(cmd, &engine),
    }
}
