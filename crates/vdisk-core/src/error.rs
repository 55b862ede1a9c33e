use thiserror::Error;

/// The error kinds the engine surfaces to upstream.
///
/// Parameter validation failures in the factory are fatal to that creation
/// (no partial device is registered); per-request failures complete only
/// that request and leave the device live.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("I/O device error: {0}")]
    IoDeviceError(String),

    #[error("buffer overflow: response of {declared} bytes exceeds caller buffer of {capacity} bytes")]
    BufferOverflow { declared: u64, capacity: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("driver internal error: {0}")]
    DriverInternalError(String),
}

impl From<vdisk_transport::TransportError> for EngineError {
    fn from(err: vdisk_transport::TransportError) -> Self {
        use vdisk_transport::TransportError as T;
        match err {
            T::Io(e) => EngineError::IoDeviceError(e.to_string()),
            T::Proto(e) => EngineError::IoDeviceError(e.to_string()),
            T::BufferOverflow { declared, capacity } => {
                EngineError::BufferOverflow { declared, capacity }
            }
            T::Cancelled => EngineError::Cancelled,
            T::ConnectionRefused(code) => {
                EngineError::ConnectionRefused(format!("server returned error_code={code}"))
            }
            T::InvalidParameter(msg) => EngineError::InvalidParameter(msg),
            T::PeerClosed => EngineError::IoDeviceError("peer closed the connection".into()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::IoDeviceError(err.to_string())
    }
}

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, EngineError>;
