//! Device factory: validates a creation request, resolves and opens a
//! backend, infers geometry, and publishes the new device.
//!
//! Steps are numbered to match the reference driver's creation sequence.
//! Any step from 7 onward that fails simply returns `Err`; the partially
//! built backend (if any) is a local value that drops — and releases its
//! resources — in reverse acquisition order automatically, which matches
//! the required unwind behaviour: a failure after step 7 releases all
//! resources acquired so far in reverse order.

use std::fs::File;
use std::sync::Arc;

use vdisk_transport::{CancelToken, Transport};

use crate::backend::{
    AllocDriverBackend, BackendHandle, ConnectOutcome, FileBackend, FileOpenRequest, MemoryBackend,
    ProxyBackend, ProxyConnection, ALLOC_DRIVER_DEVICE_PATH,
};
use crate::device::DeviceInfo;
use crate::dispatch::ManagedDevice;
use crate::error::{EngineError, Result};
use crate::flags::{BackendType, DeviceClass, DeviceFlags, FileMode};
use crate::geometry::{self, Geometry};
use crate::registry::Registry;

/// Sentinel for `device_number` meaning "auto-select".
pub const AUTO_SELECT_DEVICE_NUMBER: u64 = u64::MAX;

const MINIMUM_TOTAL_SIZE: u64 = 65_536;

/// A creation request, matching the engine's creation-interface tuple.
/// `geometry.cylinders` carries the requested total size until the
/// factory normalises it.
pub struct CreationRequest {
    pub device_number: u64,
    pub geometry: Geometry,
    pub image_offset: u64,
    pub flags: DeviceFlags,
    pub drive_letter: Option<char>,
    pub filename: Option<String>,
    /// An already-dialled transport for proxy backends; dialling the
    /// concrete OS socket is the caller's concern, the factory only drives
    /// the handshake over it.
    pub proxy_transport: Option<Box<dyn Transport>>,
}

pub struct CreationResponse {
    pub device_number: u64,
    pub geometry: Geometry,
    pub flags: DeviceFlags,
}

pub struct Factory<'a> {
    registry: &'a Registry,
}

impl<'a> Factory<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub fn create(&self, mut request: CreationRequest) -> Result<CreationResponse> {
        // Step 1: backend-type default.
        if request.flags.backend_type().is_none() {
            let backend_type = if request.filename.as_deref().unwrap_or("").is_empty() {
                BackendType::Vm
            } else {
                BackendType::File
            };
            request.flags.set_backend_type(backend_type);
        }
        let backend_type = request.flags.backend_type().expect("just set above");

        // Step 2: empty filename only allowed for vm, or alloc-driver with size > 64 KiB.
        let filename_empty = request.filename.as_deref().unwrap_or("").is_empty();
        if filename_empty {
            let allowed = backend_type == BackendType::Vm
                || (request.flags.file_mode() == FileMode::AllocDriver
                    && request.geometry.cylinders > MINIMUM_TOTAL_SIZE);
            if !allowed {
                return Err(EngineError::InvalidParameter(
                    "filename is required for this backend type".into(),
                ));
            }
        }

        // Step 3: byte-swap only valid on buffered-mode file backends.
        if request.flags.byte_swap()
            && backend_type == BackendType::File
            && request.flags.file_mode() != FileMode::Buffered
        {
            return Err(EngineError::InvalidParameter(
                "byte-swap requires buffered file mode".into(),
            ));
        }

        // Step 4: device number.
        let device_number = if request.device_number == AUTO_SELECT_DEVICE_NUMBER {
            self.registry.allocate_id()?
        } else {
            self.registry.reject_if_over_max(request.device_number)?;
            request.device_number
        };

        // Step 5: resolve backend path.
        let resolved_filename = match backend_type {
            BackendType::File if request.flags.file_mode() == FileMode::AllocDriver => request
                .filename
                .as_ref()
                .map(|name| format!("{ALLOC_DRIVER_DEVICE_PATH}{name}")),
            _ => request.filename.clone(),
        };

        // Step 6: impersonation has no analogue without a kernel security
        // token; opening happens as the current process identity (see
        // DESIGN.md).

        // Step 7: open the backend (+ proxy handshake).
        let cancel = CancelToken::new();
        let mut backend = self.open_backend(&mut request, backend_type, resolved_filename.as_deref(), &cancel)?;

        // Step 8: query size (vm already preloaded by open_backend).
        let total_size = backend.size();

        // Step 9: BPB inference if any geometry field is still zero.
        let bpb_hints = if request.geometry.tracks_per_cylinder == 0
            || request.geometry.sectors_per_track == 0
            || request.geometry.bytes_per_sector == 0
        {
            match backend.read(request.image_offset, 512) {
                Ok(sector0) => geometry::infer_from_bpb(&sector0),
                Err(_) => None,
            }
        } else {
            None
        };

        // Step 10: minimum size.
        if total_size <= MINIMUM_TOTAL_SIZE {
            return Err(EngineError::InvalidParameter(format!(
                "total size {total_size} does not exceed the {MINIMUM_TOTAL_SIZE}-byte minimum"
            )));
        }

        // Step 11: fill remaining geometry defaults.
        let mut geometry = request.geometry;
        geometry.cylinders = total_size;

        let mut device_class = request.flags.device_class();
        if device_class.is_none() {
            if let Some(floppy) = geometry::floppy_geometry_for_size(total_size) {
                geometry = floppy;
                device_class = Some(DeviceClass::Floppy);
            }
        }
        if device_class.is_none() {
            device_class = Some(
                resolved_filename
                    .as_deref()
                    .map(geometry::device_class_from_extension)
                    .unwrap_or(DeviceClass::HardDisk),
            );
        }
        let device_class = device_class.expect("resolved above");
        request.flags.set_device_class(device_class);
        if device_class == DeviceClass::Cd {
            request.flags.set_read_only(true);
        }

        geometry::resolve(&mut geometry, total_size, device_class, bpb_hints);

        // Step 12: construct, publish, spawn.
        let info = Arc::new(DeviceInfo::new(
            device_number,
            geometry,
            request.image_offset,
            request.flags,
            request.drive_letter,
            resolved_filename,
        ));
        let managed = Arc::new(ManagedDevice::spawn(Arc::clone(&info), backend));
        self.registry.insert(managed)?;

        log::debug!(
            "factory: created device {device_number} ({:?}/{:?})",
            backend_type,
            device_class
        );

        Ok(CreationResponse {
            device_number,
            geometry,
            flags: request.flags,
        })
    }

    fn open_backend(
        &self,
        request: &mut CreationRequest,
        backend_type: BackendType,
        resolved_filename: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<BackendHandle> {
        let handle = match backend_type {
            BackendType::Vm => {
                let size = request.geometry.cylinders;
                let backend = match resolved_filename {
                    Some(path) if !path.is_empty() => {
                        let mut image = File::open(path).map_err(|e| {
                            EngineError::IoDeviceError(format!("opening image '{path}': {e}"))
                        })?;
                        MemoryBackend::preload(size, &mut image, request.image_offset)?
                    }
                    _ => MemoryBackend::new(size),
                };
                BackendHandle::Memory(backend)
            }
            BackendType::File => {
                let path = resolved_filename.ok_or_else(|| {
                    EngineError::InvalidParameter("file backend requires a filename".into())
                })?;
                if request.flags.file_mode() == FileMode::AllocDriver {
                    BackendHandle::AllocDriver(AllocDriverBackend::open(
                        path,
                        request.flags.read_only(),
                        request.geometry.cylinders,
                    )?)
                } else {
                    BackendHandle::File(FileBackend::open(FileOpenRequest {
                        path,
                        read_only: request.flags.read_only(),
                        requested_size: request.geometry.cylinders,
                        mode: request.flags.file_mode(),
                        sparse: request.flags.sparse(),
                    })?)
                }
            }
            BackendType::Proxy => {
                let transport = request.proxy_transport.take().ok_or_else(|| {
                    EngineError::InvalidParameter("proxy backend requires a pre-dialled transport".into())
                })?;
                let connection_string = resolved_filename.unwrap_or("").to_string();
                let ConnectOutcome {
                    connection,
                    delegated_handle,
                } = ProxyConnection::connect(transport, &connection_string, cancel)?;

                if let Some(object_ptr) = delegated_handle {
                    // Spec.md §4.2: a non-zero handoff reference is claimed
                    // through the local registry before it replaces the
                    // transport handle. This engine's registry tracks
                    // handles by delegation key, not raw pointer identity,
                    // so there is nothing further to exchange here beyond
                    // recording that the claim happened.
                    let _ = self.registry.claim_handle(object_ptr);
                }

                BackendHandle::Proxy(ProxyBackend::new(connection))
            }
        };
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::flags::{BackendType, DeviceClass, FileMode};

    fn geometry_for_size(total_size: u64) -> Geometry {
        Geometry {
            cylinders: total_size,
            tracks_per_cylinder: 0,
            sectors_per_track: 0,
            bytes_per_sector: 0,
        }
    }

    fn base_request(total_size: u64) -> CreationRequest {
        CreationRequest {
            device_number: AUTO_SELECT_DEVICE_NUMBER,
            geometry: geometry_for_size(total_size),
            image_offset: 0,
            flags: DeviceFlags::default(),
            drive_letter: None,
            filename: None,
            proxy_transport: None,
        }
    }

    #[test]
    fn creating_vm_disk_with_empty_filename_picks_hard_disk_class() {
        let registry = Registry::new(16);
        let factory = Factory::new(&registry);
        let response = factory.create(base_request(1_048_576)).unwrap();

        assert_eq!(response.device_number, 0);
        assert_eq!(response.flags.backend_type(), Some(BackendType::Vm));
        assert_eq!(response.flags.device_class(), Some(DeviceClass::HardDisk));
        assert_eq!(response.geometry.bytes_per_sector, 512);
        assert_eq!(response.geometry.sectors_per_track, 63);
    }

    #[test]
    fn creating_file_disk_with_iso_extension_is_read_only_cd() {
        let mut file = tempfile::Builder::new().suffix(".iso").tempfile().unwrap();
        file.write_all(&vec![0u8; 200_000]).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let registry = Registry::new(16);
        let factory = Factory::new(&registry);
        let mut request = base_request(0);
        request.filename = Some(path);
        let response = factory.create(request).unwrap();

        assert_eq!(response.flags.device_class(), Some(DeviceClass::Cd));
        assert!(response.flags.read_only());
    }

    #[test]
    fn creation_below_minimum_size_is_rejected() {
        let registry = Registry::new(16);
        let factory = Factory::new(&registry);
        let err = factory.create(base_request(65_536)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
    }

    #[test]
    fn byte_swap_on_non_buffered_file_mode_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 200_000]).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let registry = Registry::new(16);
        let factory = Factory::new(&registry);
        let mut request = base_request(200_000);
        request.filename = Some(path);
        request.flags.set_byte_swap(true);
        request.flags.set_file_mode(FileMode::Queued);

        let err = factory.create(request).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
    }

    #[test]
    fn empty_filename_without_vm_or_alloc_driver_is_rejected() {
        let registry = Registry::new(16);
        let factory = Factory::new(&registry);
        let mut request = base_request(1_048_576);
        request.flags.set_backend_type(BackendType::File);

        let err = factory.create(request).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
    }

    #[test]
    fn auto_selected_device_number_is_max_existing_plus_one() {
        let registry = Registry::new(16);
        let factory = Factory::new(&registry);
        let first = factory.create(base_request(1_048_576)).unwrap();
        assert_eq!(first.device_number, 0);
        let second = factory.create(base_request(1_048_576)).unwrap();
        assert_eq!(second.device_number, 1);

        // Removing the lowest-numbered device does not open up a gap the
        // next auto-select fills: it still picks one past the current
        // maximum (1), not the just-freed 0.
        registry.remove(0).unwrap();
        let third = factory.create(base_request(1_048_576)).unwrap();
        assert_eq!(third.device_number, 2);
    }

    #[test]
    fn device_ids_are_reused_once_the_registry_is_empty_again() {
        let registry = Registry::new(16);
        let factory = Factory::new(&registry);
        let first = factory.create(base_request(1_048_576)).unwrap();
        assert_eq!(first.device_number, 0);

        registry.remove(0).unwrap();
        let second = factory.create(base_request(1_048_576)).unwrap();
        assert_eq!(second.device_number, 0);
    }
}
