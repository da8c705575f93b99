//! Binary codec for relay frames and discovery datagrams.
//!
//! Relay frame format:
//! ```text
//! [msg_type:1][';':1][payload:N]
//! ```
//! The payload is a MessagePack map (field names included) produced by
//! `rmp_serde::to_vec_named`.  `ReleaseFocus` has an empty payload.
//!
//! Discovery datagrams carry a bare MessagePack map and must fit in
//! [`MAX_DATAGRAM_SIZE`] bytes, the size of the receive buffer every peer
//! reads into.
//!
//! # Why MessagePack with named fields? (for beginners)
//!
//! MessagePack is a compact binary cousin of JSON.  Encoding structs as maps
//! (with field names) instead of positional arrays costs a few bytes per
//! message but lets either side add optional fields later without breaking
//! older builds that simply ignore unknown keys.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::domain::geometry::DisplayBounds;
use crate::protocol::messages::{
    DiscoveryMessage, MessageType, RelayMessage, FRAME_SEPARATOR,
};

/// Largest relay frame either side will accept.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Receive buffer size for discovery datagrams.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The frame is shorter than the two-byte header.
    #[error("truncated frame: {len} bytes")]
    Truncated { len: usize },

    /// The second byte of the frame is not the separator.
    #[error("missing separator: found 0x{0:02X}")]
    MissingSeparator(u8),

    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("datagram too large: {size} bytes (max {max})")]
    DatagramTooLarge { size: usize, max: usize },

    /// A `Connect` frame reported unusable monitor geometry.
    #[error("invalid display #{index}: {bounds:?}")]
    InvalidDisplay { index: usize, bounds: DisplayBounds },
}

// ── Relay frames ──────────────────────────────────────────────────────────────

/// Encodes a [`RelayMessage`] into a complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if MessagePack serialization fails.
///
/// # Examples
///
/// ```rust
/// use kvm_mesh_core::protocol::{decode_frame, encode_frame, RelayMessage};
///
/// let bytes = encode_frame(&RelayMessage::ReleaseFocus).unwrap();
/// assert_eq!(bytes, vec![3, b';']);
/// assert_eq!(decode_frame(&bytes).unwrap(), RelayMessage::ReleaseFocus);
/// ```
pub fn encode_frame(msg: &RelayMessage) -> Result<Vec<u8>, ProtocolError> {
    let payload = match msg {
        RelayMessage::Connect(m) => to_payload(m)?,
        RelayMessage::FocusReceived(m) => to_payload(m)?,
        RelayMessage::ChangeFocus(m) => to_payload(m)?,
        RelayMessage::ReleaseFocus => Vec::new(),
        RelayMessage::InputEvent(m) => to_payload(m)?,
        RelayMessage::TransitionZoneAssigned(m) => to_payload(m)?,
    };

    let mut buf = Vec::with_capacity(2 + payload.len());
    buf.push(msg.message_type() as u8);
    buf.push(FRAME_SEPARATOR);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the header is malformed, the type byte is
/// unknown, or the payload does not match the type.
pub fn decode_frame(bytes: &[u8]) -> Result<RelayMessage, ProtocolError> {
    let [type_byte, separator, payload @ ..] = bytes else {
        return Err(ProtocolError::Truncated { len: bytes.len() });
    };
    if *separator != FRAME_SEPARATOR {
        return Err(ProtocolError::MissingSeparator(*separator));
    }
    let msg_type =
        MessageType::try_from(*type_byte).map_err(ProtocolError::UnknownMessageType)?;

    let msg = match msg_type {
        MessageType::Connect => RelayMessage::Connect(from_payload(payload)?),
        MessageType::FocusReceived => RelayMessage::FocusReceived(from_payload(payload)?),
        MessageType::ChangeFocus => RelayMessage::ChangeFocus(from_payload(payload)?),
        MessageType::ReleaseFocus => RelayMessage::ReleaseFocus,
        MessageType::InputEvent => RelayMessage::InputEvent(from_payload(payload)?),
        MessageType::TransitionZoneAssigned => {
            RelayMessage::TransitionZoneAssigned(from_payload(payload)?)
        }
    };
    Ok(msg)
}

// ── Discovery datagrams ───────────────────────────────────────────────────────

/// Encodes a discovery datagram.
///
/// # Errors
///
/// Returns [`ProtocolError::DatagramTooLarge`] if the encoding would not fit
/// in a receiver's buffer (for example, an oversized cluster id).
pub fn encode_datagram(msg: &DiscoveryMessage) -> Result<Vec<u8>, ProtocolError> {
    let bytes = to_payload(msg)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::DatagramTooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

/// Decodes a discovery datagram.
pub fn decode_datagram(bytes: &[u8]) -> Result<DiscoveryMessage, ProtocolError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::DatagramTooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    from_payload(bytes)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

fn from_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
