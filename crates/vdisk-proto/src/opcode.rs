use binrw::binrw;

/// The `request_code`/`opcode` word that starts every proxy request header.
///
/// Wire values match `examples/original_source/inc/fscryptdproxy.h`'s
/// `FSCRYPTDPROXY_REQ` enum (offset by one: `NULL` is not a valid request
/// and is not represented here).
#[binrw]
#[brw(little, repr = u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Info = 1,
    Read = 2,
    Write = 3,
    Connect = 4,
    Close = 5,
    Unmap = 6,
    Zero = 7,
    Scsi = 8,
    Shared = 9,
}
