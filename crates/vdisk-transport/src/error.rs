use thiserror::Error;

/// Errors surfaced by a [`crate::Transport`].
///
/// `vdisk-core` maps every variant here onto one of its `EngineError` kinds:
/// `Io`/`PeerClosed` become `IoDeviceError`, `BufferOverflow` stays
/// `BufferOverflow`, `Cancelled` stays `Cancelled`,
/// `ConnectionRefused`/`InvalidParameter` map one-to-one.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("response framing error: {0}")]
    Proto(#[from] vdisk_proto::ProtoError),

    #[error("server declared response length {declared} exceeds caller buffer {capacity}")]
    BufferOverflow { declared: u64, capacity: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("connection refused by peer (error_code={0})")]
    ConnectionRefused(u64),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("peer closed the connection")]
    PeerClosed,
}
