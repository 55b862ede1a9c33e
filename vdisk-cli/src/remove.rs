use std::error::Error;

use clap::Parser;
use vdisk_core::Engine;

#[derive(Parser, Debug)]
pub struct RemoveCmd {
    pub device_number: u64,
}

pub fn remove(cmd: &RemoveCmd, engine: &Engine) -> Result<(), Box<dyn Error>> {
    engine.remove(cmd.device_number)?;
    println!("removed device {}", cmd.device_number);
    Ok(())
}
