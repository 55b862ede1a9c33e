use std::error::Error;

use clap::Parser;
use vdisk_core::Engine;

#[derive(Parser, Debug)]
pub struct InfoCmd {
    pub device_number: u64,
}

pub fn info(cmd: &InfoCmd, engine: &Engine) -> Result<(), Box<dyn Error>> {
    let snapshot = engine.info(cmd.device_number)?;
    println!("device {}", snapshot.id);
    println!(
        "  geometry: {} cylinders x {} tracks x {} sectors x {} bytes",
        snapshot.geometry.cylinders,
        snapshot.geometry.tracks_per_cylinder,
        snapshot.geometry.sectors_per_track,
        snapshot.geometry.bytes_per_sector,
    );
    println!("  image_offset: {}", snapshot.image_offset);
    println!(
        "  flags: read_only={} sparse={} byte_swap={} image_modified={}",
        snapshot.flags.read_only(),
        snapshot.flags.sparse(),
        snapshot.flags.byte_swap(),
        snapshot.flags.image_modified(),
    );
    if let Some(letter) = snapshot.drive_letter {
        println!("  drive_letter: {letter}");
    }
    if let Some(filename) = &snapshot.filename {
        println!("  filename: {filename}");
    }
    println!("  media_change_count: {}", snapshot.media_change_count);
    Ok(())
}
