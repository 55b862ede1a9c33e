use std::io::{Read, Write};

use crate::{CancelToken, Transport, TransportError};

/// Well-known byte-stream endpoint name. The concrete path is
/// platform-specific; this constant documents the convention without
/// choosing a platform.
pub const PROXY_SERVICE_ENDPOINT_NAME: &str = "vdiskproxy";

/// A proxy transport over any ordered duplex byte channel: a TCP socket, a
/// Unix domain socket, or an anonymous pipe.
///
/// The byte-stream `call` concatenates header and payload into a single
/// buffer (so the peer sees one write), then reads the response header
/// and (if declared) response payload as two subsequent reads. The
/// "transfer unit" for a single `call` is the whole request: large
/// reads/writes are satisfied by the caller iterating.
pub struct ByteStreamTransport<S> {
    stream: S,
    alignment: u64,
}

impl<S> ByteStreamTransport<S>
where
    S: Read + Write + Send,
{
    /// `alignment` is the value negotiated at handshake time via the
    /// `INFO` exchange; callers must reject connections whose advertised
    /// alignment exceeds 512 before constructing this.
    pub fn new(stream: S, alignment: u64) -> Self {
        Self { stream, alignment }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Updates the alignment after it is learned from the server's `INFO`
    /// response.
    pub fn set_alignment(&mut self, alignment: u64) {
        self.alignment = alignment;
    }
}

impl<S> Transport for ByteStreamTransport<S>
where
    S: Read + Write + Send,
{
    fn write_request(&mut self, header: &[u8], payload: &[u8]) -> Result<(), TransportError> {
        if payload.is_empty() {
            self.stream.write_all(header)?;
            return Ok(());
        }
        let mut buf = Vec::with_capacity(header.len() + payload.len());
        buf.extend_from_slice(header);
        buf.extend_from_slice(payload);
        self.stream.write_all(&buf)?;
        Ok(())
    }

    fn read_response_header(
        &mut self,
        header: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<(), TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.stream
            .read_exact(header)
            .map_err(map_read_err)?;
        Ok(())
    }

    fn read_response_payload(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.stream.read_exact(buf).map_err(map_read_err)?;
        Ok(())
    }

    fn required_alignment(&self) -> u64 {
        self.alignment
    }
}

fn map_read_err(err: std::io::Error) -> TransportError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::PeerClosed
    } else {
        TransportError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// An in-memory duplex pair good enough to exercise the framing logic
    /// without a real socket: writes go to `out`, reads come from `input`.
    struct Loopback {
        input: Cursor<Vec<u8>>,
        out: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.out.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_request_concatenates_header_and_payload() {
        let mut transport = ByteStreamTransport::new(
            Loopback {
                input: Cursor::new(Vec::new()),
                out: Vec::new(),
            },
            512,
        );
        transport.write_request(&[1, 2, 3], &[4, 5]).unwrap();
        assert_eq!(transport.stream.out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn write_request_with_empty_payload_writes_header_only() {
        let mut transport = ByteStreamTransport::new(
            Loopback {
                input: Cursor::new(Vec::new()),
                out: Vec::new(),
            },
            512,
        );
        transport.write_request(&[9, 9], &[]).unwrap();
        assert_eq!(transport.stream.out, vec![9, 9]);
    }

    #[test]
    fn read_response_header_reports_peer_closed_on_short_read() {
        let mut transport = ByteStreamTransport::new(
            Loopback {
                input: Cursor::new(vec![1, 2]),
                out: Vec::new(),
            },
            512,
        );
        let mut header = [0u8; 8];
        let cancel = CancelToken::new();
        let err = transport
            .read_response_header(&mut header, &cancel)
            .unwrap_err();
        assert!(matches!(err, TransportError::PeerClosed));
    }

    #[test]
    fn read_response_header_honors_cancellation() {
        let mut transport = ByteStreamTransport::new(
            Loopback {
                input: Cursor::new(vec![0; 64]),
                out: Vec::new(),
            },
            512,
        );
        let mut header = [0u8; 8];
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = transport
            .read_response_header(&mut header, &cancel)
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }
}
