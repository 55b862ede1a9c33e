//! Anonymous in-process memory region backend
//! "Virtual-memory").

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use super::Backend;
use crate::error::{EngineError, Result};

pub struct MemoryBackend {
    region: Vec<u8>,
}

impl MemoryBackend {
    /// Allocates a zeroed region of `size` bytes.
    pub fn new(size: u64) -> Self {
        Self {
            region: vec![0u8; size as usize],
        }
    }

    /// Allocates a region of `size` bytes and preloads it from `image_file`
    /// starting at `image_offset`, fully, before the device accepts its
    /// first request.
    pub fn preload(size: u64, image_file: &mut File, image_offset: u64) -> Result<Self> {
        let mut backend = Self::new(size);

        image_file
            .seek(SeekFrom::Start(image_offset))
            .map_err(|e| EngineError::IoDeviceError(e.to_string()))?;

        let mut total_read = 0usize;
        while total_read < backend.region.len() {
            match image_file.read(&mut backend.region[total_read..]) {
                Ok(0) => break,
                Ok(n) => total_read += n,
                Err(e) => return Err(EngineError::IoDeviceError(e.to_string())),
            }
        }

        log::debug!("preloaded {total_read} bytes of {size} into vm-disk region from image file");
        Ok(backend)
    }
}

impl Backend for MemoryBackend {
    fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let start = offset as usize;
        let end = (start + len as usize).min(self.region.len());
        if start >= self.region.len() {
            return Ok(Vec::new());
        }
        Ok(self.region[start..end].to_vec())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.region.len() {
            return Err(EngineError::InvalidParameter(format!(
                "write at {offset}..+{} exceeds region size {}",
                data.len(),
                self.region.len()
            )));
        }
        self.region[start..end].copy_from_slice(data);
        Ok(())
    }

    fn supports_zero_fill(&self) -> bool {
        true
    }

    fn size(&self) -> u64 {
        self.region.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut backend = MemoryBackend::new(4096);
        backend.write(512, &[0xAB; 128]).unwrap();
        assert_eq!(backend.read(512, 128).unwrap(), vec![0xAB; 128]);
    }

    #[test]
    fn read_past_end_short_reads() {
        let mut backend = MemoryBackend::new(64);
        let got = backend.read(32, 64).unwrap();
        assert_eq!(got.len(), 32);
    }

    #[test]
    fn read_starting_past_end_returns_empty() {
        let mut backend = MemoryBackend::new(64);
        assert!(backend.read(128, 16).unwrap().is_empty());
    }

    #[test]
    fn write_past_end_is_rejected() {
        let mut backend = MemoryBackend::new(64);
        assert!(backend.write(60, &[0u8; 16]).is_err());
    }

    #[test]
    fn preload_fills_region_from_image_file() {
        let mut image = tempfile::tempfile().unwrap();
        use std::io::Write;
        image.write_all(&[0x11; 256]).unwrap();

        let backend = MemoryBackend::preload(1024, &mut image, 0).unwrap();
        assert_eq!(backend.size(), 1024);
    }
}
