use binrw::binrw;

use crate::Opcode;

/// `INFO` request header. Carries no payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoReq {
    pub opcode: Opcode,
}

impl InfoReq {
    pub fn new() -> Self {
        Self {
            opcode: Opcode::Info,
        }
    }
}

impl Default for InfoReq {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability bits carried in [`InfoResp::flags`].
pub mod info_flags {
    pub const READ_ONLY: u64 = 0x01;
    pub const SUPPORTS_UNMAP: u64 = 0x02;
    pub const SUPPORTS_ZERO: u64 = 0x04;
    pub const SUPPORTS_SCSI: u64 = 0x08;
    pub const SUPPORTS_SHARED: u64 = 0x10;
    pub const KEEP_OPEN: u64 = 0x20;
}

/// `INFO` response header.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoResp {
    pub file_size: u64,
    pub req_alignment: u64,
    pub flags: u64,
}

impl InfoResp {
    pub fn has_flag(&self, flag: u64) -> bool {
        self.flags & flag != 0
    }
}
