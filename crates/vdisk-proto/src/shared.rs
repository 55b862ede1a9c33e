use binrw::binrw;

use crate::Opcode;

/// `SHARED` (persistent-reservation pass-through) request header. No
/// request payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedReq {
    pub opcode: Opcode,
    pub op: u64,
    pub scope: u64,
    pub type_: u64,
    pub existing_key: u64,
    pub current_key: u64,
    pub op_key: u64,
}

impl SharedReq {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        op: u64,
        scope: u64,
        type_: u64,
        existing_key: u64,
        current_key: u64,
        op_key: u64,
    ) -> Self {
        Self {
            opcode: Opcode::Shared,
            op,
            scope,
            type_,
            existing_key,
            current_key,
            op_key,
        }
    }
}

/// `SHARED` response header. No payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedResp {
    pub errno: u64,
    pub unique_id: [u8; 16],
    pub channel_key: u64,
    pub reservation_key: u64,
    pub scope: u64,
    pub type_: u64,
    pub length: u64,
}
