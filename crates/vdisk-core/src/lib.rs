#![forbid(unsafe_code)]
//! Virtual block-disk engine: backends, geometry inference, a device
//! registry, and the per-device dispatch loop.
//!
//! [`Engine`] is the crate's single entry point: everything else here is
//! reachable through it, mirroring how the reference driver exposes one
//! control-device surface over a set of virtual disks.

pub mod backend;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod flags;
pub mod geometry;
pub mod registry;

pub use backend::{Backend, BackendHandle, PersistentReservationInfo, PersistentReservationRequest};
pub use config::{EngineConfig, StartupDevice};
pub use device::DeviceInfo;
pub use dispatch::{ManagedDevice, RequestOutcome};
pub use error::{EngineError, Result};
pub use factory::{CreationRequest, CreationResponse, Factory, AUTO_SELECT_DEVICE_NUMBER};
pub use flags::{BackendType, DeviceClass, DeviceFlags, FileMode, ProxySubtype};
pub use geometry::Geometry;
pub use registry::Registry;

use std::sync::Arc;

use vdisk_proto::Range;
use vdisk_transport::Transport;

/// Version information the engine reports to a caller asking "what am I
/// talking to", grounded in the reference driver's `IOCTL_*_QUERY_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// A live device's externally visible state, returned by [`Engine::info`].
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub id: u64,
    pub geometry: Geometry,
    pub image_offset: u64,
    pub flags: DeviceFlags,
    pub drive_letter: Option<char>,
    pub filename: Option<String>,
    pub media_change_count: u64,
}

/// The top-level handle a host process holds: a device [`Registry`] plus
/// the drive-letter deny-list and device-count ceiling loaded from
/// [`EngineConfig`]. One `Engine` corresponds to one running instance of
/// the driver.
pub struct Engine {
    registry: Registry,
    disallowed_drive_letters: Vec<char>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: Registry::new(config.max_devices),
            disallowed_drive_letters: config.disallowed_drive_letters,
        }
    }

    /// Boots every device listed in the config's `startup_devices`, in
    /// order, stopping at the first failure so the caller can see which
    /// entry was bad.
    pub fn start_devices(&self, devices: &[StartupDevice]) -> Result<Vec<CreationResponse>> {
        devices
            .iter()
            .map(|device| {
                self.create(CreationRequest {
                    device_number: device.device_number.unwrap_or(AUTO_SELECT_DEVICE_NUMBER),
                    geometry: Geometry {
                        cylinders: device.size,
                        ..Geometry::default()
                    },
                    image_offset: device.image_offset,
                    flags: DeviceFlags::new(device.flags),
                    drive_letter: device.drive_letter,
                    filename: device.filename.clone(),
                    proxy_transport: None,
                })
            })
            .collect()
    }

    /// Creates a new device. See [`Factory::create`] for the step-by-step
    /// behaviour.
    pub fn create(&self, request: CreationRequest) -> Result<CreationResponse> {
        if let Some(letter) = request.drive_letter {
            if self.disallowed_drive_letters.contains(&letter.to_ascii_uppercase()) {
                return Err(EngineError::AccessDenied(format!(
                    "drive letter {letter} is not permitted by this engine's configuration"
                )));
            }
        }
        Factory::new(&self.registry).create(request)
    }

    /// Convenience wrapper for a proxy-backed device: dials no transport
    /// itself (dialling the OS socket is the caller's concern), just drives
    /// the handshake over an already-connected one.
    pub fn create_proxy_device(
        &self,
        device_number: u64,
        connection_string: &str,
        transport: Box<dyn Transport>,
        drive_letter: Option<char>,
    ) -> Result<CreationResponse> {
        let mut flags = DeviceFlags::default();
        flags.set_backend_type(BackendType::Proxy);
        self.create(CreationRequest {
            device_number,
            geometry: Geometry::default(),
            image_offset: 0,
            flags,
            drive_letter,
            filename: Some(connection_string.to_string()),
            proxy_transport: Some(transport),
        })
    }

    pub fn remove(&self, id: u64) -> Result<()> {
        self.registry.remove(id)
    }

    pub fn list(&self) -> Vec<u64> {
        self.registry.list_ids()
    }

    pub fn info(&self, id: u64) -> Result<DeviceSnapshot> {
        let device = self.registry.get(id)?;
        Ok(DeviceSnapshot {
            id: device.info.id,
            geometry: device.info.geometry,
            image_offset: device.info.image_offset,
            flags: device.info.flags(),
            drive_letter: device.info.drive_letter,
            filename: device.info.filename.clone(),
            media_change_count: device.info.media_change.get(),
        })
    }

    /// Replaces a device's flag word wholesale, mirroring the driver's
    /// `IOCTL_*_SET_FLAGS`. Limited to the flags the original allows
    /// changing post-creation.
    pub fn set_device_flags(&self, id: u64, flags: DeviceFlags) -> Result<()> {
        let device = self.registry.get(id)?;
        *device.info.flags.lock().expect("device flags lock poisoned") = flags;
        device.info.media_change.bump();
        Ok(())
    }

    pub fn read(&self, id: u64, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.registry.get(id)?.read(offset, length)
    }

    pub fn write(&self, id: u64, offset: u64, data: Vec<u8>) -> Result<()> {
        self.registry.get(id)?.write(offset, data)
    }

    pub fn flush(&self, id: u64) -> Result<()> {
        self.registry.get(id)?.flush()
    }

    pub fn unmap(&self, id: u64, ranges: Vec<Range>) -> Result<()> {
        self.registry.get(id)?.unmap(ranges)
    }

    pub fn zero_fill(&self, id: u64, ranges: Vec<Range>) -> Result<()> {
        self.registry.get(id)?.zero_fill(ranges)
    }

    /// Forwards an opaque SCSI command descriptor block to the device's
    /// backend (proxy-backed devices only; others reject it).
    pub fn scsi(
        &self,
        id: u64,
        cdb: [u8; 16],
        request_payload: Vec<u8>,
        max_response_len: u64,
    ) -> Result<Vec<u8>> {
        self.registry.get(id)?.scsi(cdb, request_payload, max_response_len)
    }

    /// Issues a persistent-reservation pass-through request against the
    /// device's backend (proxy-backed devices only; others reject it).
    pub fn shared_reservation(
        &self,
        id: u64,
        request: PersistentReservationRequest,
    ) -> Result<PersistentReservationInfo> {
        self.registry.get(id)?.shared_reservation(request)
    }

    /// Blocks until the device set changes (create/remove), for a caller
    /// that wants to keep a `list()` mirror up to date.
    pub fn wait_for_refresh(&self) {
        self.registry.wait_for_refresh();
    }

    /// Hands a pre-existing handle reference to the registry ahead of a
    /// `CONNECT` that will claim it by key.
    pub fn delegate_handle(&self, object_ptr: u64) -> u64 {
        self.registry.delegate_handle(object_ptr)
    }

    pub fn version() -> EngineInfo {
        EngineInfo {
            major: 1,
            minor: 0,
            patch: 0,
        }
    }
}

/// Borrow a device directly for call sites that need more than the
/// snapshot/request API above (e.g. the CLI's scripted integration tests).
pub fn device_handle(engine: &Engine, id: u64) -> Result<Arc<ManagedDevice>> {
    engine.registry.get(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default())
    }

    fn create_vm_device(engine: &Engine, size: u64) -> CreationResponse {
        let mut flags = DeviceFlags::default();
        flags.set_backend_type(BackendType::Vm);
        engine
            .create(CreationRequest {
                device_number: AUTO_SELECT_DEVICE_NUMBER,
                geometry: Geometry {
                    cylinders: size,
                    ..Geometry::default()
                },
                image_offset: 0,
                flags,
                drive_letter: None,
                filename: None,
                proxy_transport: None,
            })
            .unwrap()
    }

    #[test]
    fn creates_vm_device_and_round_trips_io() {
        let engine = engine();
        let created = create_vm_device(&engine, 1 << 20);
        engine.write(created.device_number, 0, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(engine.read(created.device_number, 0, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(engine.list().contains(&created.device_number));
        engine.remove(created.device_number).unwrap();
        assert!(!engine.list().contains(&created.device_number));
    }

    #[test]
    fn rejects_disallowed_drive_letter() {
        let engine = Engine::new(EngineConfig {
            disallowed_drive_letters: vec!['A'],
            ..EngineConfig::default()
        });
        let mut flags = DeviceFlags::default();
        flags.set_backend_type(BackendType::Vm);
        let result = engine.create(CreationRequest {
            device_number: AUTO_SELECT_DEVICE_NUMBER,
            geometry: Geometry {
                cylinders: 1 << 20,
                ..Geometry::default()
            },
            image_offset: 0,
            flags,
            drive_letter: Some('A'),
            filename: None,
            proxy_transport: None,
        });
        assert!(matches!(result, Err(EngineError::AccessDenied(_))));
    }

    #[test]
    fn creation_below_minimum_size_is_rejected() {
        let engine = engine();
        let mut flags = DeviceFlags::default();
        flags.set_backend_type(BackendType::Vm);
        let result = engine.create(CreationRequest {
            device_number: AUTO_SELECT_DEVICE_NUMBER,
            geometry: Geometry {
                cylinders: 1024,
                ..Geometry::default()
            },
            image_offset: 0,
            flags,
            drive_letter: None,
            filename: None,
            proxy_transport: None,
        });
        assert!(matches!(result, Err(EngineError::InvalidParameter(_))));
    }

    #[test]
    fn info_reflects_media_change_count_on_flag_update() {
        let engine = engine();
        let created = create_vm_device(&engine, 1 << 20);
        let before = engine.info(created.device_number).unwrap();
        assert_eq!(before.media_change_count, 0);

        let mut flags = before.flags;
        flags.set_read_only(true);
        engine.set_device_flags(created.device_number, flags).unwrap();

        let after = engine.info(created.device_number).unwrap();
        assert!(after.flags.read_only());
        assert_eq!(after.media_change_count, 1);
    }

    #[test]
    fn file_backed_device_infers_geometry_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.iso");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![0u8; 1 << 20]).unwrap();
        drop(file);

        let engine = engine();
        let mut flags = DeviceFlags::default();
        flags.set_backend_type(BackendType::File);
        let created = engine
            .create(CreationRequest {
                device_number: AUTO_SELECT_DEVICE_NUMBER,
                geometry: Geometry::default(),
                image_offset: 0,
                flags,
                drive_letter: None,
                filename: Some(path.to_string_lossy().into_owned()),
                proxy_transport: None,
            })
            .unwrap();

        assert!(created.flags.device_class() == Some(DeviceClass::Cd));
        assert!(created.flags.read_only());
        engine.remove(created.device_number).unwrap();
    }
}
