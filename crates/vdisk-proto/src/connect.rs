use binrw::binrw;

use crate::Opcode;

/// `CONNECT` request header, followed by `length` bytes of UTF-16-LE
/// connection string.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectReq {
    pub opcode: Opcode,
    pub flags: u64,
    pub length: u64,
}

impl ConnectReq {
    pub fn new(flags: u64, length: u64) -> Self {
        Self {
            opcode: Opcode::Connect,
            flags,
            length,
        }
    }
}

/// `CONNECT` response header. No payload.
///
/// A non-zero `object_ptr` is a server-issued handle reference the client
/// must claim through its local registry before reusing it as the
/// transport handle.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResp {
    pub error_code: u64,
    pub object_ptr: u64,
}

impl ConnectResp {
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

/// `CLOSE` request header. No request or response payload; for shared
/// memory the opcode is written into the header area and `request` is
/// pulsed with no expectation of a reply.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReq {
    pub opcode: Opcode,
}

impl CloseReq {
    pub fn new() -> Self {
        Self {
            opcode: Opcode::Close,
        }
    }
}

impl Default for CloseReq {
    fn default() -> Self {
        Self::new()
    }
}
