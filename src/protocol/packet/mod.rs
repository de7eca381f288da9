pub mod game;
pub mod gamedata;
pub mod root;
mod error;
mod utils;

pub use error::DecodeError;
pub use game::{GameListing, GameMessage, GameSettings, ReactorMessage};
pub use gamedata::GameDataMessage;
pub use root::{Disconnect, DisconnectReason, Hello, RootPacket};

use bytes::{Buf, BufMut};

/// Which dialect a buffer should be read with. A few tags carry
/// different payloads depending on who sent them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Serverbound,
    /// Server to client.
    Clientbound,
}

/// Trait implemented by all concrete child message body types.
///
/// Implementations are responsible for encoding/decoding only the
/// message body – the Hazel frame (length + tag) is handled by the
/// registry enum.
pub trait ChildMessage: Sized {
    /// The fixed tag byte used to identify this message on the wire.
    const TAG: u8;

    /// Encode the body of this message into the destination buffer.
    fn encode_body(&self, dst: &mut impl BufMut);

    /// Decode the body of this message from the source buffer.
    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError>;
}

/// Trait for types that know how to encode/decode themselves using
/// the Hazel wire format.
pub trait HazelEncodable: Sized {
    /// Encode this value into the destination buffer.
    fn encode_hazel(&self, dst: &mut impl BufMut);

    /// Decode a value of this type from the source buffer.
    fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError>;
}
