use thiserror::Error;

/// Errors that can occur while encoding or decoding proxy wire messages.
///
/// This is intentionally narrow: transport-level failures (closed socket,
/// timed out wait) belong to `vdisk-transport::TransportError`, which wraps
/// this type for framing failures only.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: binrw::Error,
    },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: binrw::Error,
    },

    #[error("server declared response length {declared} exceeds caller buffer {capacity}")]
    ResponseTooLarge { declared: u64, capacity: u64 },
}
