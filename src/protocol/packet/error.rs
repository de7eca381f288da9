use thiserror::Error;

/// Errors that may occur while decoding Hazel protocol values or
/// packets.
///
/// This type is kept small and generic so it can be shared by all
/// `HazelEncodable` implementations and packet bodies.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The buffer did not contain enough bytes to decode the requested value.
    #[error("Unexpected EoF, not enough bytes to read requested type.")]
    UnexpectedEof,

    /// A root packet tag was not recognised.
    #[error("Unknown root packet, tag: {0}")]
    UnknownRootTag(u8),

    /// A packed integer ran past its 32-bit limit.
    #[error("Packed integer wider than 32 bits provided.")]
    PackedIntExceedsLimit,

    /// A length-prefixed string held invalid UTF-8.
    #[error("String payload is not valid UTF-8.")]
    InvalidUtf8,

    /// A disconnect reason value that does not map to any known variant.
    #[error("An unknown disconnect reason was provided. Reason byte: {0}")]
    UnknownDisconnectReason(u8),

    /// A reactor handshake sub-message tag outside the known set.
    #[error("An unknown reactor message was provided. Tag byte: {0}")]
    UnknownReactorTag(u8),

    /// A mod network side byte outside the known set.
    #[error("An unknown mod side was provided. Side byte: {0}")]
    UnknownModSide(u8),
}
