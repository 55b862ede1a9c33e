/// Selects which proxy transport a `Proxy` backend connects with (flag
/// word bits `0xF000` with `0x0300` type set).
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Ordered duplex byte channel (TCP, or a Unix domain socket standing
    /// in for the original's named pipe on this platform).
    ByteStream { endpoint: String },

    /// Shared-memory region with event signalling.
    SharedMemory {
        base_name: String,
        region_size: usize,
    },
}

impl TransportConfig {
    /// The fixed, well-known endpoint name used when none is configured
    /// explicitly.
    pub fn default_byte_stream() -> Self {
        Self::ByteStream {
            endpoint: crate::byte_stream::PROXY_SERVICE_ENDPOINT_NAME.to_string(),
        }
    }
}
