use std::error::Error;

use clap::{Parser, ValueEnum};
use vdisk_core::{
    BackendType, CreationRequest, DeviceFlags, Engine, Geometry, AUTO_SELECT_DEVICE_NUMBER,
};

#[derive(Parser, Debug)]
pub struct CreateCmd {
    /// Backing image path. Omit for a memory-backed ("vm") device.
    pub filename: Option<String>,

    /// Requested total size in bytes, before geometry is filled in.
    #[arg(long, default_value_t = 0)]
    pub size: u64,

    /// Byte offset into `filename` where the image data begins.
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Specific device number to use instead of auto-selecting one.
    #[arg(long)]
    pub device_number: Option<u64>,

    /// Drive letter hint for the host to mount the device under.
    #[arg(long)]
    pub drive_letter: Option<char>,

    /// Which backend adapter to use. Defaults to "vm" for an empty
    /// filename, "file" otherwise.
    #[arg(long, value_enum)]
    pub backend: Option<CliBackendType>,

    #[arg(long)]
    pub read_only: bool,
    #[arg(long)]
    pub sparse: bool,
    #[arg(long)]
    pub byte_swap: bool,
}

#[derive(ValueEnum, Copy, Clone, Debug)]
pub enum CliBackendType {
    File,
    Vm,
    AllocDriver,
}

impl From<CliBackendType> for BackendType {
    fn from(value: CliBackendType) -> Self {
        match value {
            CliBackendType::File | CliBackendType::AllocDriver => BackendType::File,
            CliBackendType::Vm => BackendType::Vm,
        }
    }
}

pub fn create(cmd: &CreateCmd, engine: &Engine) -> Result<(), Box<dyn Error>> {
    let mut flags = DeviceFlags::default();
    if let Some(backend) = cmd.backend {
        flags.set_backend_type(backend.into());
        if matches!(backend, CliBackendType::AllocDriver) {
            flags.set_file_mode(vdisk_core::FileMode::AllocDriver);
        }
    }
    flags.set_read_only(cmd.read_only);
    flags.set_sparse(cmd.sparse);
    flags.set_byte_swap(cmd.byte_swap);

    let response = engine.create(CreationRequest {
        device_number: cmd.device_number.unwrap_or(AUTO_SELECT_DEVICE_NUMBER),
        geometry: Geometry {
            cylinders: cmd.size,
            ..Geometry::default()
        },
        image_offset: cmd.offset,
        flags,
        drive_letter: cmd.drive_letter,
        filename: cmd.filename.clone(),
        proxy_transport: None,
    })?;

    let geometry = response.geometry;
    println!(
        "device {}: {} cylinders x {} tracks x {} sectors x {} bytes = {} bytes",
        response.device_number,
        geometry.cylinders,
        geometry.tracks_per_cylinder,
        geometry.sectors_per_track,
        geometry.bytes_per_sector,
        geometry.total_bytes(),
    );
    Ok(())
}
