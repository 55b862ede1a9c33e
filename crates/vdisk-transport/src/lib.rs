//! Transport implementations for the vdisk proxy protocol.
//!
//! A proxy connection is a sum type over two transports that share no wire
//! representation: a byte-stream duplex channel, or a shared-memory region
//! with event signalling. Both are dispatched through the single
//! [`Transport::call`]-style contract in [`traits`].

mod byte_stream;
mod cancel;
mod config;
mod error;
mod shared_memory;
mod signal;
mod traits;

pub use byte_stream::{ByteStreamTransport, PROXY_SERVICE_ENDPOINT_NAME};
pub use cancel::CancelToken;
pub use config::TransportConfig;
pub use error::TransportError;
pub use shared_memory::{SharedMemoryServerHandle, SharedMemoryTransport};
pub use signal::Signal;
pub use traits::{call, Transport};

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, TransportError>;
