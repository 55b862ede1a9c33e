//! Proxy backend: every operation translates to a wire request over a
//! connection held by `vdisk-transport`.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use vdisk_proto::{
    info_flags, CloseReq, ConnectReq, ConnectResp, InfoReq, InfoResp, Range, ReadReq, ReadResp,
    ScsiReq, ScsiResp, SharedReq, SharedResp, UnmapReq, UnmapResp, WriteReq, WriteResp, ZeroReq,
    ZeroResp,
};
use vdisk_transport::{call, CancelToken, Transport, TransportError};

use super::{Backend, PersistentReservationInfo, PersistentReservationRequest};
use crate::error::{EngineError, Result};

fn encode<T>(value: &T) -> Vec<u8>
where
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut buf = Cursor::new(Vec::new());
    value
        .write(&mut buf)
        .expect("writing a fixed-size wire header cannot fail");
    buf.into_inner()
}

fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'a> BinRead<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(bytes);
    T::read(&mut cursor).map_err(|e| EngineError::DriverInternalError(e.to_string()))
}

/// The handshake result when the server hands off a pre-existing handle
/// reference instead of leaving the freshly dialled transport in place:
/// the client asks its own local registry to validate and claim that
/// reference. Resolving this is the factory's job, via
/// `Registry::claim_handle`.
pub struct ConnectOutcome {
    pub connection: ProxyConnection,
    pub delegated_handle: Option<u64>,
}

pub struct ProxyConnection {
    transport: Box<dyn Transport>,
    alignment: u64,
    capability_flags: u64,
    size: u64,
}

impl ProxyConnection {
    /// Performs the `CONNECT` handshake over an already dialled transport,
    /// then an immediate `INFO` query to learn size, alignment, and
    /// capability flags. `connection_string` is encoded as UTF-16-LE,
    /// matching the wire format.
    pub fn connect(
        mut transport: Box<dyn Transport>,
        connection_string: &str,
        cancel: &CancelToken,
    ) -> Result<ConnectOutcome> {
        // Shared-memory transports skip the CONNECT wire exchange entirely:
        // the two named events and the mapping are assumed already held by
        // both sides, so there is no handle-handoff to negotiate.
        let delegated_handle = if transport.is_shared_memory() {
            None
        } else {
            let payload: Vec<u8> =
                connection_string.encode_utf16().flat_map(u16::to_le_bytes).collect();
            let request = ConnectReq::new(0, payload.len() as u64);

            let mut response_header = [0u8; 16];
            call(
                transport.as_mut(),
                &encode(&request),
                &payload,
                &mut response_header,
                |_| 0,
                &mut [],
                cancel,
            )
            .map_err(EngineError::from)?;

            let response: ConnectResp = decode(&response_header)?;
            if !response.is_ok() {
                return Err(EngineError::ConnectionRefused(format!(
                    "server returned error_code={}",
                    response.error_code
                )));
            }

            if response.object_ptr != 0 {
                Some(response.object_ptr)
            } else {
                None
            }
        };

        let mut connection = Self {
            transport,
            alignment: 1,
            capability_flags: 0,
            size: 0,
        };
        connection.refresh_info(cancel)?;

        Ok(ConnectOutcome {
            connection,
            delegated_handle,
        })
    }

    fn refresh_info(&mut self, cancel: &CancelToken) -> Result<()> {
        let request = InfoReq::new();
        let mut response_header = [0u8; 24];
        call(
            self.transport.as_mut(),
            &encode(&request),
            &[],
            &mut response_header,
            |_| 0,
            &mut [],
            cancel,
        )
        .map_err(EngineError::from)?;

        let response: InfoResp = decode(&response_header)?;
        if response.req_alignment > 512 {
            return Err(EngineError::InvalidParameter(format!(
                "proxy server advertised alignment {} exceeds the 512-byte maximum",
                response.req_alignment
            )));
        }

        self.alignment = response.req_alignment.max(1);
        self.capability_flags = response.flags;
        self.size = response.file_size;
        Ok(())
    }
}

/// Proxy-backed virtual disk. The plain [`Backend`] trait methods use a
/// fresh, never-fired cancel token per call; [`ProxyBackend::read_with_cancel`]
/// and friends accept a caller-supplied token for call sites (such as the
/// dispatch engine) that have a real cancellation source to thread through.
pub struct ProxyBackend {
    connection: ProxyConnection,
    connection_dead: bool,
}

impl ProxyBackend {
    pub fn new(connection: ProxyConnection) -> Self {
        Self {
            connection,
            connection_dead: false,
        }
    }

    /// Drives one request/response exchange, noting a peer-initiated close
    /// the first time it is observed so subsequent calls short-circuit
    /// instead of repeating a doomed round trip.
    fn call(
        &mut self,
        request_header: &[u8],
        request_payload: &[u8],
        response_header: &mut [u8],
        response_payload_len: impl FnOnce(&[u8]) -> u64,
        response_payload: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<u64> {
        call(
            self.connection.transport.as_mut(),
            request_header,
            request_payload,
            response_header,
            response_payload_len,
            response_payload,
            cancel,
        )
        .map_err(|e| {
            if matches!(e, TransportError::PeerClosed) && !self.connection_dead {
                self.connection_dead = true;
                log::warn!("proxy connection closed by peer; failing subsequent requests");
            }
            EngineError::from(e)
        })
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.connection_dead {
            return Err(EngineError::IoDeviceError(
                "proxy connection closed by peer".into(),
            ));
        }
        Ok(())
    }

    pub fn read_with_cancel(
        &mut self,
        offset: u64,
        len: u64,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        self.ensure_alive()?;
        let unit = self
            .connection
            .transport
            .max_transfer_unit()
            .unwrap_or(len.max(1));
        let mut out = Vec::with_capacity(len as usize);
        let mut remaining = len;
        let mut at = offset;
        while remaining > 0 {
            let chunk_len = remaining.min(unit);
            out.extend_from_slice(&self.read_chunk(at, chunk_len, cancel)?);
            at += chunk_len;
            remaining -= chunk_len;
        }
        Ok(out)
    }

    fn read_chunk(&mut self, offset: u64, len: u64, cancel: &CancelToken) -> Result<Vec<u8>> {
        let request = ReadReq::new(offset, len);
        let mut response_header = [0u8; 16];
        let mut payload = vec![0u8; len as usize];

        let written = self.call(
            &encode(&request),
            &[],
            &mut response_header,
            |header| decode::<ReadResp>(header).map(|r| r.length).unwrap_or(0),
            &mut payload,
            cancel,
        )?;

        let response: ReadResp = decode(&response_header)?;
        if !response.is_ok() {
            return Err(EngineError::IoDeviceError(format!(
                "proxy READ failed, errno={}",
                response.errno
            )));
        }

        payload.truncate(written as usize);
        Ok(payload)
    }

    pub fn write_with_cancel(
        &mut self,
        offset: u64,
        data: &[u8],
        cancel: &CancelToken,
    ) -> Result<()> {
        self.ensure_alive()?;
        let unit = self
            .connection
            .transport
            .max_transfer_unit()
            .unwrap_or(data.len() as u64)
            .max(1);
        let mut at = offset;
        for chunk in data.chunks(unit as usize) {
            self.write_chunk(at, chunk, cancel)?;
            at += chunk.len() as u64;
        }
        Ok(())
    }

    fn write_chunk(&mut self, offset: u64, data: &[u8], cancel: &CancelToken) -> Result<()> {
        let request = WriteReq::new(offset, data.len() as u64);
        let mut response_header = [0u8; 16];

        self.call(
            &encode(&request),
            data,
            &mut response_header,
            |_| 0,
            &mut [],
            cancel,
        )?;

        let response: WriteResp = decode(&response_header)?;
        if !response.is_ok() || response.length != data.len() as u64 {
            return Err(EngineError::IoDeviceError(format!(
                "proxy WRITE incomplete or failed, errno={}, wrote={}",
                response.errno, response.length
            )));
        }
        Ok(())
    }

    /// Forwards an opaque SCSI command descriptor block, passing it
    /// through untouched.
    pub fn scsi_with_cancel(
        &mut self,
        cdb: [u8; 16],
        request_payload: &[u8],
        max_response_len: u64,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        self.ensure_alive()?;
        if self.connection.capability_flags & info_flags::SUPPORTS_SCSI == 0 {
            return Err(EngineError::InvalidParameter(
                "proxy server does not advertise SCSI command pass-through support".into(),
            ));
        }

        let request = ScsiReq::new(cdb, request_payload.len() as u64, max_response_len);
        let mut response_header = [0u8; 16];
        let mut payload = vec![0u8; max_response_len as usize];

        let written = self.call(
            &encode(&request),
            request_payload,
            &mut response_header,
            |header| decode::<ScsiResp>(header).map(|r| r.length).unwrap_or(0),
            &mut payload,
            cancel,
        )?;

        let response: ScsiResp = decode(&response_header)?;
        if response.errno != 0 {
            return Err(EngineError::IoDeviceError(format!(
                "proxy SCSI command failed, errno={}",
                response.errno
            )));
        }
        payload.truncate(written as usize);
        Ok(payload)
    }

    /// Issues a persistent-reservation pass-through request (`SHARED`).
    pub fn shared_with_cancel(
        &mut self,
        request: PersistentReservationRequest,
        cancel: &CancelToken,
    ) -> Result<PersistentReservationInfo> {
        self.ensure_alive()?;
        if self.connection.capability_flags & info_flags::SUPPORTS_SHARED == 0 {
            return Err(EngineError::InvalidParameter(
                "proxy server does not advertise persistent-reservation pass-through support"
                    .into(),
            ));
        }

        let wire_request = SharedReq::new(
            request.op,
            request.scope,
            request.type_,
            request.existing_key,
            request.current_key,
            request.op_key,
        );
        let mut response_header = [0u8; 64];

        self.call(
            &encode(&wire_request),
            &[],
            &mut response_header,
            |_| 0,
            &mut [],
            cancel,
        )?;

        let response: SharedResp = decode(&response_header)?;
        if response.errno != 0 {
            return Err(EngineError::IoDeviceError(format!(
                "proxy SHARED command failed, errno={}",
                response.errno
            )));
        }
        Ok(PersistentReservationInfo {
            unique_id: response.unique_id,
            channel_key: response.channel_key,
            reservation_key: response.reservation_key,
            scope: response.scope,
            type_: response.type_,
            length: response.length,
        })
    }

    fn close(&mut self, cancel: &CancelToken) {
        let request = CloseReq::new();
        let _ = self
            .connection
            .transport
            .write_request(&encode(&request), &[]);
        let _ = cancel;
    }
}

impl Backend for ProxyBackend {
    fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.read_with_cancel(offset, len, &CancelToken::new())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.write_with_cancel(offset, data, &CancelToken::new())
    }

    fn supports_unmap(&self) -> bool {
        self.connection.capability_flags & info_flags::SUPPORTS_UNMAP != 0
    }

    fn supports_zero_fill(&self) -> bool {
        self.connection.capability_flags & info_flags::SUPPORTS_ZERO != 0
    }

    fn unmap(&mut self, ranges: &[Range]) -> Result<()> {
        self.ensure_alive()?;
        if !self.supports_unmap() {
            return Ok(());
        }
        let cancel = CancelToken::new();
        let request = UnmapReq::new(ranges.len() as u64);
        let payload = encode_ranges(ranges);
        let mut response_header = [0u8; 8];

        self.call(
            &encode(&request),
            &payload,
            &mut response_header,
            |_| 0,
            &mut [],
            &cancel,
        )?;

        let response: UnmapResp = decode(&response_header)?;
        if response.errno != 0 {
            return Err(EngineError::IoDeviceError(format!(
                "proxy UNMAP failed, errno={}",
                response.errno
            )));
        }
        Ok(())
    }

    fn zero_fill(&mut self, ranges: &[Range]) -> Result<()> {
        self.ensure_alive()?;
        if !self.supports_zero_fill() {
            for range in ranges {
                let zeros = vec![0u8; range.length as usize];
                self.write(range.offset, &zeros)?;
            }
            return Ok(());
        }

        let cancel = CancelToken::new();
        let request = ZeroReq::new(ranges.len() as u64);
        let payload = encode_ranges(ranges);
        let mut response_header = [0u8; 8];

        self.call(
            &encode(&request),
            &payload,
            &mut response_header,
            |_| 0,
            &mut [],
            &cancel,
        )?;

        let response: ZeroResp = decode(&response_header)?;
        if response.errno != 0 {
            return Err(EngineError::IoDeviceError(format!(
                "proxy ZERO failed, errno={}",
                response.errno
            )));
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.connection.size
    }

    fn required_alignment(&self) -> u64 {
        self.connection.alignment
    }

    fn scsi(&mut self, cdb: [u8; 16], request_payload: &[u8], max_response_len: u64) -> Result<Vec<u8>> {
        self.scsi_with_cancel(cdb, request_payload, max_response_len, &CancelToken::new())
    }

    fn shared_reservation(
        &mut self,
        request: PersistentReservationRequest,
    ) -> Result<PersistentReservationInfo> {
        self.shared_with_cancel(request, &CancelToken::new())
    }
}

impl Drop for ProxyBackend {
    fn drop(&mut self) {
        self.close(&CancelToken::new());
    }
}

fn encode_ranges(ranges: &[Range]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    for range in ranges {
        range
            .write(&mut buf)
            .expect("writing a fixed-size wire header cannot fail");
    }
    buf.into_inner()
}
