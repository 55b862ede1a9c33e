use binrw::binrw;

use crate::Opcode;

/// `READ` request header. No request payload; `length` bytes follow the
/// matching [`ReadResp`] in the response stream.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReq {
    pub opcode: Opcode,
    pub offset: u64,
    pub length: u64,
}

impl ReadReq {
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            opcode: Opcode::Read,
            offset,
            length,
        }
    }
}

/// `READ` response header. A non-zero `errno` means the read failed and no
/// payload follows; otherwise `length` data bytes follow.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResp {
    pub errno: u64,
    pub length: u64,
}

impl ReadResp {
    pub fn ok(length: u64) -> Self {
        Self { errno: 0, length }
    }

    pub fn is_ok(&self) -> bool {
        self.errno == 0
    }
}

/// `WRITE` request header, followed by `length` payload bytes.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReq {
    pub opcode: Opcode,
    pub offset: u64,
    pub length: u64,
}

impl WriteReq {
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            opcode: Opcode::Write,
            offset,
            length,
        }
    }
}

/// `WRITE` response header. No payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResp {
    pub errno: u64,
    pub length: u64,
}

impl WriteResp {
    pub fn ok(length: u64) -> Self {
        Self { errno: 0, length }
    }

    pub fn is_ok(&self) -> bool {
        self.errno == 0
    }
}
