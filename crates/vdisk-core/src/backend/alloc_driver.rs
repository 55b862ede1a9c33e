//! Pre-allocated physical-memory allocator backend ("alloc-driver"):
//! behaves like a file backend but is always parallel-I/O capable,
//! forwarding each request through the driver's native I/O stack instead
//! of a per-device worker thread.

use super::file::{FileBackend, FileOpenRequest};
use super::Backend;
use crate::error::Result;
use crate::flags::FileMode;

/// Device-path prefix the caller-supplied name is appended to, for
/// alloc-driver backends.
pub const ALLOC_DRIVER_DEVICE_PATH: &str = "/dev/vdisk-alloc/";

pub struct AllocDriverBackend {
    inner: FileBackend,
}

impl AllocDriverBackend {
    /// `path` is the already-resolved driver path (device path prefix plus
    /// caller-supplied name, per the factory's backend-path resolution
    /// step); this does not re-prefix it.
    pub fn open(path: &str, read_only: bool, requested_size: u64) -> Result<Self> {
        let inner = FileBackend::open(FileOpenRequest {
            path,
            read_only,
            requested_size,
            mode: FileMode::AllocDriver,
            sparse: false,
        })?;
        Ok(Self { inner })
    }
}

impl Backend for AllocDriverBackend {
    fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.inner.read(offset, len)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.write(offset, data)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn supports_parallel_io(&self) -> bool {
        true
    }
}
