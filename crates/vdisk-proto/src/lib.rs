//! Wire format for the vdisk proxy protocol.
//!
//! All integer fields are 64-bit little-endian unless noted.
//! Every request header starts with the [`Opcode`] word; headers are
//! fixed-size and payloads (when present) follow immediately after, either
//! on the byte-stream transport or inside the shared-memory data window.
//! See `vdisk-transport` for how these headers are actually exchanged.

mod connect;
mod error;
mod info;
mod opcode;
mod range_ops;
mod read_write;
mod scsi;
mod shared;

pub use connect::{CloseReq, ConnectReq, ConnectResp};
pub use error::ProtoError;
pub use info::{info_flags, InfoReq, InfoResp};
pub use opcode::Opcode;
pub use range_ops::{Range, UnmapReq, UnmapResp, ZeroReq, ZeroResp};
pub use read_write::{ReadReq, ReadResp, WriteReq, WriteResp};
pub use scsi::{ScsiReq, ScsiResp};
pub use shared::{SharedReq, SharedResp};

/// The header area of a shared-memory region is always this many bytes;
/// the data area starts immediately after it.
pub const SHARED_MEMORY_HEADER_SIZE: usize = 4096;

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::{BinRead, BinWrite};
    use std::io::Cursor;

    fn roundtrip<T>(value: T) -> T
    where
        T: for<'a> BinRead<Args<'a> = ()> + for<'a> BinWrite<Args<'a> = ()> + PartialEq + Clone,
    {
        let mut buf = Cursor::new(Vec::new());
        value.clone().write(&mut buf).unwrap();
        buf.set_position(0);
        T::read(&mut buf).unwrap()
    }

    #[test]
    fn read_req_roundtrips() {
        let req = ReadReq::new(4096, 8192);
        assert_eq!(roundtrip(req), req);
    }

    #[test]
    fn write_req_roundtrips() {
        let req = WriteReq::new(0, 512);
        assert_eq!(roundtrip(req), req);
    }

    #[test]
    fn connect_req_roundtrips() {
        let req = ConnectReq::new(0, 64);
        assert_eq!(roundtrip(req), req);
        assert_eq!(req.opcode, Opcode::Connect);
    }

    #[test]
    fn connect_resp_error_detection() {
        let ok = ConnectResp {
            error_code: 0,
            object_ptr: 0,
        };
        assert!(ok.is_ok());
        let refused = ConnectResp {
            error_code: 5,
            object_ptr: 0,
        };
        assert!(!refused.is_ok());
    }

    #[test]
    fn info_resp_flag_bits() {
        let resp = InfoResp {
            file_size: 1 << 20,
            req_alignment: 512,
            flags: info_flags::SUPPORTS_UNMAP | info_flags::READ_ONLY,
        };
        assert!(resp.has_flag(info_flags::SUPPORTS_UNMAP));
        assert!(resp.has_flag(info_flags::READ_ONLY));
        assert!(!resp.has_flag(info_flags::SUPPORTS_ZERO));
    }

    #[test]
    fn range_array_roundtrips() {
        let ranges = vec![Range { offset: 0, length: 512 }, Range { offset: 4096, length: 1024 }];
        let mut buf = Cursor::new(Vec::new());
        for r in &ranges {
            r.write(&mut buf).unwrap();
        }
        buf.set_position(0);
        let mut decoded = Vec::new();
        for _ in 0..ranges.len() {
            decoded.push(Range::read(&mut buf).unwrap());
        }
        assert_eq!(decoded, ranges);
    }

    #[test]
    fn opcode_wire_values_match_protocol_constants() {
        assert_eq!(Opcode::Info as u64, 1);
        assert_eq!(Opcode::Read as u64, 2);
        assert_eq!(Opcode::Write as u64, 3);
        assert_eq!(Opcode::Connect as u64, 4);
        assert_eq!(Opcode::Close as u64, 5);
        assert_eq!(Opcode::Unmap as u64, 6);
        assert_eq!(Opcode::Zero as u64, 7);
        assert_eq!(Opcode::Scsi as u64, 8);
        assert_eq!(Opcode::Shared as u64, 9);
    }
}
