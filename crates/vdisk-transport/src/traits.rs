use crate::{CancelToken, TransportError};

/// A proxy connection: either a byte-stream duplex channel or a
/// shared-memory region with event signalling.
///
/// The two concrete transports do not share a wire representation, only
/// this contract: write a request, read back a response header, then
/// optionally read a response payload. `vdisk-core`'s proxy backend drives
/// both through [`call`] without knowing which one it has.
pub trait Transport: Send {
    /// Writes the request header concatenated with its payload (payload
    /// may be empty) and makes it visible to the peer.
    fn write_request(&mut self, header: &[u8], payload: &[u8]) -> Result<(), TransportError>;

    /// Blocks until a response is available (or `cancel` fires) and copies
    /// exactly `header.len()` bytes into it.
    fn read_response_header(
        &mut self,
        header: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<(), TransportError>;

    /// Copies `buf.len()` bytes of response payload, which must already be
    /// known (from the decoded response header) to be available.
    fn read_response_payload(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;

    /// The connection's required buffer alignment, as advertised at
    /// handshake time. The caller rejects values greater than 512.
    fn required_alignment(&self) -> u64;

    /// The largest payload a single `call` can carry, if the transport
    /// bounds it. `None` means the transport's transfer unit is "whole
    /// request" (byte-stream); `Some(n)` means callers must iterate to
    /// satisfy requests larger than `n` (shared-memory: region size minus
    /// the header area).
    fn max_transfer_unit(&self) -> Option<u64> {
        None
    }

    /// `true` for the shared-memory transport, whose handshake exchanges no
    /// `CONNECT` wire bytes (the two named events and the mapping are
    /// assumed already held by both sides).
    fn is_shared_memory(&self) -> bool {
        false
    }
}

/// Drives one request/response exchange over `transport`.
///
/// `response_payload_len` inspects the already-filled `response_header`
/// buffer and returns how many payload bytes follow (0 for opcodes with no
/// response payload); its semantics are opcode-specific and live in the
/// caller.
///
/// Returns the number of bytes written into `response_payload`.
pub fn call(
    transport: &mut dyn Transport,
    request_header: &[u8],
    request_payload: &[u8],
    response_header: &mut [u8],
    response_payload_len: impl FnOnce(&[u8]) -> u64,
    response_payload: &mut [u8],
    cancel: &CancelToken,
) -> Result<u64, TransportError> {
    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }

    transport.write_request(request_header, request_payload)?;
    transport.read_response_header(response_header, cancel)?;

    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }

    let declared = response_payload_len(response_header);
    if declared == 0 {
        return Ok(0);
    }
    if declared > response_payload.len() as u64 {
        return Err(TransportError::BufferOverflow {
            declared,
            capacity: response_payload.len() as u64,
        });
    }

    transport.read_response_payload(&mut response_payload[..declared as usize])?;
    Ok(declared)
}
