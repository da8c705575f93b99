//! Protocol module containing message types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_datagram, decode_frame, encode_datagram, encode_frame, ProtocolError,
    MAX_DATAGRAM_SIZE, MAX_FRAME_SIZE,
};
pub use messages::*;
