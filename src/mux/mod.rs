//! Stream multiplexing over a single message transport.
//!
//! Many logical endpoints share one physical transport. Every frame carries
//! the endpoint identifier and a control tag (see [`frame`]). Each side runs
//! exactly one dispatch loop reading frames and exactly one writer task
//! sending them, which keeps frames atomic and per-endpoint order intact.
//!
//! ```text
//! client                                         server
//! dial("tcp","host:80") ── [id|0|tcp://host:80] ──►  dial host:80
//!                       ◄── [id|1]             ───  success
//! write(b"GET ...")     ── [id|2|GET ...]      ──►  forward
//!                       ◄── [id|2|HTTP/1.0 ...] ──  response
//! close()               ── [id|3]              ──►  close socket
//! ```

pub mod client;
pub mod frame;
#[cfg(feature = "server")]
pub mod server;
pub mod stats;
pub mod table;
pub mod writer;

use std::time::Duration;

pub use client::{Endpoint, MuxClient};
pub use frame::{Control, Frame, StreamId, MAX_FRAME_PAYLOAD};
#[cfg(feature = "server")]
pub use server::MuxServer;
pub use stats::{MuxStats, StatsSnapshot};

/// Default capacity of the outbound frame queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default number of inbound events buffered per endpoint.
pub const DEFAULT_ENDPOINT_BUFFER: usize = 64;

/// Default time to wait for the server's answer to a dial.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-instance multiplexer settings.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Frames queued for the writer before producers block
    pub queue_capacity: usize,
    /// Inbound events buffered per endpoint before dispatch blocks
    pub endpoint_buffer: usize,
    /// Time a client dial waits for connection-success
    pub dial_timeout: Duration,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            endpoint_buffer: DEFAULT_ENDPOINT_BUFFER,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MuxConfig::default();
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.endpoint_buffer, DEFAULT_ENDPOINT_BUFFER);
        assert_eq!(config.dial_timeout, Duration::from_secs(10));
    }
}
