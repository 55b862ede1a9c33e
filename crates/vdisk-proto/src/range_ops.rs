use binrw::binrw;

use crate::Opcode;

/// One `(offset, length)` entry of a `UNMAP`/`ZERO` payload array.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub offset: u64,
    pub length: u64,
}

/// `UNMAP` request header. `length` is the number of [`Range`] entries that
/// follow as the payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmapReq {
    pub opcode: Opcode,
    pub length: u64,
}

impl UnmapReq {
    pub fn new(range_count: u64) -> Self {
        Self {
            opcode: Opcode::Unmap,
            length: range_count,
        }
    }
}

/// `UNMAP` response header. No payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmapResp {
    pub errno: u64,
}

/// `ZERO` request header. `length` is the number of [`Range`] entries that
/// follow as the payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroReq {
    pub opcode: Opcode,
    pub length: u64,
}

impl ZeroReq {
    pub fn new(range_count: u64) -> Self {
        Self {
            opcode: Opcode::Zero,
            length: range_count,
        }
    }
}

/// `ZERO` response header. No payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroResp {
    pub errno: u64,
}
