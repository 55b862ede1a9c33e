use std::error::Error;

use clap::Parser;
use vdisk_core::Engine;

#[derive(Parser, Debug)]
pub struct ListCmd;

pub fn list(_cmd: &ListCmd, engine: &Engine) -> Result<(), Box<dyn Error>> {
    for id in engine.list() {
        println!("{id}");
    }
    Ok(())
}
