//! Backend adapters: the uniform capability set every virtual-disk source
//! implements, regardless of whether it's a host file, an anonymous memory
//! region, an alloc-driver handle, or a proxy connection.

mod alloc_driver;
mod file;
mod memory;
mod proxy;

pub use alloc_driver::{AllocDriverBackend, ALLOC_DRIVER_DEVICE_PATH};
pub use file::{FileBackend, FileOpenRequest};
pub use memory::MemoryBackend;
pub use proxy::{ConnectOutcome, ProxyBackend, ProxyConnection};

use vdisk_proto::Range;

use crate::error::{EngineError, Result};

/// Parameters for a `SHARED` (persistent-reservation pass-through) request,
/// independent of the proxy wire encoding.
pub struct PersistentReservationRequest {
    pub op: u64,
    pub scope: u64,
    pub type_: u64,
    pub existing_key: u64,
    pub current_key: u64,
    pub op_key: u64,
}

/// Result of a `SHARED` request.
pub struct PersistentReservationInfo {
    pub unique_id: [u8; 16],
    pub channel_key: u64,
    pub reservation_key: u64,
    pub scope: u64,
    pub type_: u64,
    pub length: u64,
}

/// A source a virtual disk can be backed by. `read`/`write` operate in
/// backend-relative offsets (the device's `image_offset` has already been
/// added by the caller — see `dispatch`).
pub trait Backend: Send {
    fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Must be a full write or fail; no partial-write success.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// No-op if the backend is inherently synchronous (e.g. memory).
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// `true` if [`Backend::unmap`] does more than report success without
    /// touching the backend.
    fn supports_unmap(&self) -> bool {
        false
    }

    /// `true` if [`Backend::zero_fill`] has a native fast path instead of
    /// falling back to a write of zeros.
    fn supports_zero_fill(&self) -> bool {
        false
    }

    /// Default: no-op success. A backend with no native trim support
    /// still reports the unmap as successful.
    fn unmap(&mut self, _ranges: &[Range]) -> Result<()> {
        Ok(())
    }

    /// Default: emit a write of zeros per range.
    fn zero_fill(&mut self, ranges: &[Range]) -> Result<()> {
        for range in ranges {
            let zeros = vec![0u8; range.length as usize];
            self.write(range.offset, &zeros)?;
        }
        Ok(())
    }

    fn size(&self) -> u64;

    /// A power of two; 1 for backends with no native alignment constraint.
    fn required_alignment(&self) -> u64 {
        1
    }

    /// Parallel-I/O capable backends complete requests in the caller's
    /// thread; others are dispatched through a per-device worker queue.
    fn supports_parallel_io(&self) -> bool {
        false
    }

    /// Forwards an opaque SCSI command descriptor block (the `SCSI` proxy
    /// opcode). Only a proxy backend can satisfy this.
    fn scsi(&mut self, cdb: [u8; 16], request_payload: &[u8], max_response_len: u64) -> Result<Vec<u8>> {
        let _ = (cdb, request_payload, max_response_len);
        Err(EngineError::InvalidParameter(
            "this backend does not support SCSI command pass-through".into(),
        ))
    }

    /// Issues a persistent-reservation pass-through request (the `SHARED`
    /// proxy opcode). Only a proxy backend can satisfy this.
    fn shared_reservation(
        &mut self,
        request: PersistentReservationRequest,
    ) -> Result<PersistentReservationInfo> {
        let _ = request;
        Err(EngineError::InvalidParameter(
            "this backend does not support persistent-reservation pass-through".into(),
        ))
    }
}

/// The backend a device owns, as a tagged variant rather than a trait
/// object — avoiding a virtual-dispatch hierarchy. Each variant's
/// behaviour is still defined once, on the corresponding `*Backend` type's
/// [`Backend`] impl; this enum only picks which one a given device holds.
pub enum BackendHandle {
    File(FileBackend),
    Memory(MemoryBackend),
    AllocDriver(AllocDriverBackend),
    Proxy(ProxyBackend),
}

macro_rules! forward {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            BackendHandle::File(b) => b.$method($($arg),*),
            BackendHandle::Memory(b) => b.$method($($arg),*),
            BackendHandle::AllocDriver(b) => b.$method($($arg),*),
            BackendHandle::Proxy(b) => b.$method($($arg),*),
        }
    };
}

impl BackendHandle {
    pub fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        forward!(self, read, offset, len)
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        forward!(self, write, offset, data)
    }

    pub fn flush(&mut self) -> Result<()> {
        forward!(self, flush)
    }

    pub fn supports_unmap(&self) -> bool {
        forward!(self, supports_unmap)
    }

    pub fn supports_zero_fill(&self) -> bool {
        forward!(self, supports_zero_fill)
    }

    pub fn unmap(&mut self, ranges: &[Range]) -> Result<()> {
        forward!(self, unmap, ranges)
    }

    pub fn zero_fill(&mut self, ranges: &[Range]) -> Result<()> {
        forward!(self, zero_fill, ranges)
    }

    pub fn size(&self) -> u64 {
        forward!(self, size)
    }

    pub fn required_alignment(&self) -> u64 {
        forward!(self, required_alignment)
    }

    pub fn supports_parallel_io(&self) -> bool {
        forward!(self, supports_parallel_io)
    }

    pub fn scsi(&mut self, cdb: [u8; 16], request_payload: &[u8], max_response_len: u64) -> Result<Vec<u8>> {
        forward!(self, scsi, cdb, request_payload, max_response_len)
    }

    pub fn shared_reservation(
        &mut self,
        request: PersistentReservationRequest,
    ) -> Result<PersistentReservationInfo> {
        forward!(self, shared_reservation, request)
    }
}
