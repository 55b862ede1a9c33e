use crate::{create::CreateCmd, info::InfoCmd, list::ListCmd, remove::RemoveCmd};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Engine configuration file (TOML, see `vdisk_core::EngineConfig`).
    /// Without one, the engine starts with no devices and the default
    /// device-count ceiling.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Creates a device and reports its assigned number and geometry.
    Create(CreateCmd),
    /// Lists every device number the engine currently manages.
    List(ListCmd),
    /// Removes a device.
    Remove(RemoveCmd),
    /// Reports a device's geometry, flags, and media-change count.
    Info(InfoCmd),
}
