use std::sync::{Arc, Mutex};
use std::time::Duration;

use vdisk_proto::SHARED_MEMORY_HEADER_SIZE;

use crate::{CancelToken, Signal, Transport, TransportError};

/// A shared-memory proxy transport.
///
/// Bytes `[0, 4096)` are the header area (request header on the way in,
/// response header on the way out); bytes `[4096, region_size)` are the
/// data area. `request` is signalled by the client when a request is
/// ready; `response` is signalled by the server when a response is ready.
/// The region's total size, fixed at connection time, determines the
/// maximum per-call transfer unit (`region_size - 4096`).
///
/// The region itself is modeled as an in-process `Arc<Mutex<Vec<u8>>>`
/// rather than a real OS mapping; see `DESIGN.md`.
pub struct SharedMemoryTransport {
    region: Arc<Mutex<Vec<u8>>>,
    request: Signal,
    response: Signal,
    alignment: u64,
}

impl SharedMemoryTransport {
    pub fn new(region_size: usize, alignment: u64) -> Self {
        assert!(
            region_size > SHARED_MEMORY_HEADER_SIZE,
            "shared-memory region must be larger than the header area"
        );
        Self {
            region: Arc::new(Mutex::new(vec![0u8; region_size])),
            request: Signal::new(),
            response: Signal::new(),
            alignment,
        }
    }

    /// The maximum payload size a single `call` can carry: region size
    /// minus the 4096-byte header area.
    pub fn transfer_unit(&self) -> usize {
        self.region.lock().unwrap().len() - SHARED_MEMORY_HEADER_SIZE
    }

    /// Updates the alignment after it is learned from the server's `INFO`
    /// response.
    pub fn set_alignment(&mut self, alignment: u64) {
        self.alignment = alignment;
    }

    /// A handle the server side uses to observe `request` and serve it.
    pub fn server_handle(&self) -> SharedMemoryServerHandle {
        SharedMemoryServerHandle {
            region: self.region.clone(),
            request: self.request.clone(),
            response: self.response.clone(),
        }
    }
}

impl Transport for SharedMemoryTransport {
    fn write_request(&mut self, header: &[u8], payload: &[u8]) -> Result<(), TransportError> {
        debug_assert!(header.len() <= SHARED_MEMORY_HEADER_SIZE);
        let mut region = self.region.lock().unwrap();
        region[..header.len()].copy_from_slice(header);
        if !payload.is_empty() {
            let start = SHARED_MEMORY_HEADER_SIZE;
            region[start..start + payload.len()].copy_from_slice(payload);
        }
        drop(region);
        self.request.signal();
        Ok(())
    }

    fn read_response_header(
        &mut self,
        header: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<(), TransportError> {
        // Check cancellation before the wait begins, not only while
        // waiting, so a cancel signalled before the call starts
        // short-circuits instead of performing the request anyway.
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            if self.response.wait_timeout(Duration::from_millis(1)) {
                break;
            }
        }
        let region = self.region.lock().unwrap();
        header.copy_from_slice(&region[..header.len()]);
        Ok(())
    }

    fn read_response_payload(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let region = self.region.lock().unwrap();
        let start = SHARED_MEMORY_HEADER_SIZE;
        buf.copy_from_slice(&region[start..start + buf.len()]);
        Ok(())
    }

    fn required_alignment(&self) -> u64 {
        self.alignment
    }

    fn max_transfer_unit(&self) -> Option<u64> {
        Some(self.transfer_unit() as u64)
    }

    fn is_shared_memory(&self) -> bool {
        true
    }
}

/// The server side of a [`SharedMemoryTransport`]: waits for `request`,
/// serves it by writing a response header (and optional payload) into the
/// region, then signals `response`.
pub struct SharedMemoryServerHandle {
    region: Arc<Mutex<Vec<u8>>>,
    request: Signal,
    response: Signal,
}

impl SharedMemoryServerHandle {
    /// Blocks until a request is ready and returns the raw header bytes.
    pub fn wait_request(&self, header_len: usize) -> Vec<u8> {
        self.request.wait();
        let region = self.region.lock().unwrap();
        region[..header_len].to_vec()
    }

    /// Reads `len` bytes of request payload from the data area.
    pub fn request_payload(&self, len: usize) -> Vec<u8> {
        let region = self.region.lock().unwrap();
        let start = SHARED_MEMORY_HEADER_SIZE;
        region[start..start + len].to_vec()
    }

    /// Writes a response header (and optional payload) and signals
    /// `response`.
    pub fn respond(&self, header: &[u8], payload: &[u8]) {
        let mut region = self.region.lock().unwrap();
        region[..header.len()].copy_from_slice(header);
        if !payload.is_empty() {
            let start = SHARED_MEMORY_HEADER_SIZE;
            region[start..start + payload.len()].copy_from_slice(payload);
        }
        drop(region);
        self.response.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn client_write_then_server_read_round_trips_header_and_payload() {
        let mut client = SharedMemoryTransport::new(65536, 512);
        let server = client.server_handle();

        let handle = thread::spawn(move || {
            let header = server.wait_request(8);
            assert_eq!(header, vec![1, 2, 3, 4, 5, 6, 7, 8]);
            let payload = server.request_payload(4);
            assert_eq!(payload, vec![9, 9, 9, 9]);
            server.respond(&[0xAA; 8], &[0xBB; 4]);
        });

        client.write_request(&[1, 2, 3, 4, 5, 6, 7, 8], &[9, 9, 9, 9]).unwrap();

        let mut resp_header = [0u8; 8];
        let cancel = CancelToken::new();
        client
            .read_response_header(&mut resp_header, &cancel)
            .unwrap();
        assert_eq!(resp_header, [0xAA; 8]);

        let mut resp_payload = [0u8; 4];
        client.read_response_payload(&mut resp_payload).unwrap();
        assert_eq!(resp_payload, [0xBB; 4]);

        handle.join().unwrap();
    }

    #[test]
    fn cancel_before_wait_short_circuits_without_performing_request() {
        let mut client = SharedMemoryTransport::new(65536, 512);
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut resp_header = [0u8; 8];
        let err = client
            .read_response_header(&mut resp_header, &cancel)
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[test]
    fn transfer_unit_is_region_size_minus_header() {
        let transport = SharedMemoryTransport::new(65536, 512);
        assert_eq!(transport.transfer_unit(), 65536 - SHARED_MEMORY_HEADER_SIZE);
    }
}
