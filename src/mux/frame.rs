//! Multiplexing frame codec.
//!
//! Each transport message carries exactly one frame:
//!
//! ```text
//! ┌──────────────────────┬─────────────┬─────────────────────┐
//! │ Identifier (4, BE)   │ Control (1) │ Payload (variable)  │
//! └──────────────────────┴─────────────┴─────────────────────┘
//! ```
//!
//! The payload is only meaningful for [`Control::Connecting`] (a
//! `network://host:port` target) and [`Control::Data`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Endpoint identifier type.
pub type StreamId = u32;

/// Frame header size.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Maximum payload carried by a single data frame.
pub const MAX_FRAME_PAYLOAD: usize = 32 * 1024;

/// Frame control tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Client asks the server to dial a destination.
    Connecting = 0,
    /// Server dialed the destination successfully.
    ConnectionSuccess = 1,
    /// Payload bytes for an established endpoint.
    Data = 2,
    /// Endpoint is gone; terminal for the identifier.
    Closed = 3,
}

impl TryFrom<u8> for Control {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Control::Connecting),
            1 => Ok(Control::ConnectionSuccess),
            2 => Ok(Control::Data),
            3 => Ok(Control::Closed),
            _ => Err(Error::frame(format!("unknown control tag: 0x{:02x}", value))),
        }
    }
}

/// A multiplexing frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: StreamId,
    pub control: Control,
    pub payload: Bytes,
}

impl Frame {
    /// Encode the frame into a single transport message.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u32(self.id);
        buf.put_u8(self.control as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a frame from a transport message.
    ///
    /// The payload shares the message's buffer.
    pub fn decode(msg: Bytes) -> Result<Self> {
        if msg.len() < FRAME_HEADER_SIZE {
            return Err(Error::frame(format!("frame too short: {} bytes", msg.len())));
        }

        let id = u32::from_be_bytes([msg[0], msg[1], msg[2], msg[3]]);
        let control = Control::try_from(msg[4])?;

        Ok(Self {
            id,
            control,
            payload: msg.slice(FRAME_HEADER_SIZE..),
        })
    }

    /// Create a Connecting frame for `network://address`.
    pub fn connecting(id: StreamId, network: &str, address: &str) -> Self {
        Self {
            id,
            control: Control::Connecting,
            payload: Bytes::from(format!("{}://{}", network, address)),
        }
    }

    /// Create a ConnectionSuccess frame.
    pub fn connection_success(id: StreamId) -> Self {
        Self {
            id,
            control: Control::ConnectionSuccess,
            payload: Bytes::new(),
        }
    }

    /// Create a Data frame.
    pub fn data(id: StreamId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            control: Control::Data,
            payload: payload.into(),
        }
    }

    /// Create a Closed frame.
    pub fn closed(id: StreamId) -> Self {
        Self {
            id,
            control: Control::Closed,
            payload: Bytes::new(),
        }
    }
}

/// Parse a Connecting payload into `(network, address)`.
pub fn parse_target(payload: &[u8]) -> Result<(String, String)> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| Error::address("connecting payload is not UTF-8"))?;

    let (network, address) = text
        .split_once("://")
        .ok_or_else(|| Error::address(format!("missing scheme in {:?}", text)))?;

    if network.is_empty() || address.is_empty() {
        return Err(Error::address(format!("incomplete target {:?}", text)));
    }

    Ok((network.to_string(), address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connecting_wire_bytes() {
        let frame = Frame::connecting(1, "tcp", "93.184.216.34:80");
        let encoded = frame.encode();

        let mut expected = vec![0x00, 0x00, 0x00, 0x01, 0x00];
        expected.extend_from_slice(b"tcp://93.184.216.34:80");
        assert_eq!(&encoded[..], &expected[..]);
    }

    #[test]
    fn test_control_frames_have_no_payload() {
        assert_eq!(&Frame::connection_success(1).encode()[..], &[0, 0, 0, 1, 1]);
        assert_eq!(&Frame::closed(0x0102_0304).encode()[..], &[1, 2, 3, 4, 3]);
    }

    #[test]
    fn test_decode_data() {
        let msg = Bytes::from_static(b"\x00\x00\x00\x2a\x02hello world");
        let frame = Frame::decode(msg).unwrap();

        assert_eq!(frame.id, 42);
        assert_eq!(frame.control, Control::Data);
        assert_eq!(&frame.payload[..], b"hello world");
    }

    #[test]
    fn test_decode_rejects_short_and_unknown() {
        assert!(Frame::decode(Bytes::from_static(b"\x00\x00\x01")).is_err());
        assert!(Frame::decode(Bytes::from_static(b"\x00\x00\x00\x01\x09")).is_err());
    }

    #[test]
    fn test_parse_target() {
        let (network, address) = parse_target(b"tcp://example.com:443").unwrap();
        assert_eq!(network, "tcp");
        assert_eq!(address, "example.com:443");

        let (_, address) = parse_target(b"tcp6://[::1]:8080").unwrap();
        assert_eq!(address, "[::1]:8080");

        assert!(parse_target(b"example.com:443").is_err());
        assert!(parse_target(b"tcp://").is_err());
        assert!(parse_target(&[0xff, 0xfe]).is_err());
    }
}
