use binrw::binrw;

use crate::Opcode;

/// `SCSI` request header, followed by `req_len` bytes of opaque command
/// descriptor block payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiReq {
    pub opcode: Opcode,
    pub cdb: [u8; 16],
    pub req_len: u64,
    pub max_resp_len: u64,
}

impl ScsiReq {
    pub fn new(cdb: [u8; 16], req_len: u64, max_resp_len: u64) -> Self {
        Self {
            opcode: Opcode::Scsi,
            cdb,
            req_len,
            max_resp_len,
        }
    }
}

/// `SCSI` response header. A non-zero `errno` means the command failed;
/// otherwise `length` bytes of sense/response data follow.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiResp {
    pub errno: u64,
    pub length: u64,
}
