//! Connection configuration.

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Loopback address the privileged peer listens on by default.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:1720";

/// Default size of the reader's socket buffer (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for one bridge connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Largest frame payload accepted in either direction.
    pub max_frame_size: usize,
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
    /// Optional bound on frames queued for the writer.
    ///
    /// `None` keeps the outbound queue unbounded. When set, `send` fails with
    /// `QueueFull` instead of waiting.
    pub max_pending_frames: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_pending_frames: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_frame_size, 8 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.max_pending_frames, None);
    }

    #[test]
    fn test_default_address_parses() {
        let addr: std::net::SocketAddr = DEFAULT_ADDRESS.parse().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 1720);
    }
}
