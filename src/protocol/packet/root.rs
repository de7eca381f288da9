//! Root packets: the closed set of datagram shapes, one per leading
//! tag byte.

use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::{
    constants::{
        HAZEL_VERSION, TAG_ACK, TAG_DISCONNECT, TAG_HELLO, TAG_PING, TAG_RELIABLE, TAG_UNRELIABLE,
    },
    packet::{game::GameMessage, DecodeError, Direction, HazelEncodable},
    types::{ClientVersion, Frame, PackedUInt, U16BE},
};

/// Reason sent along with a disconnect or join rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    ExitGame,
    GameFull,
    GameStarted,
    GameNotFound,
    IncorrectVersion,
    Banned,
    Kicked,
    /// Free-form, localized server-side text; the client renders it.
    Custom(String),
    InvalidName,
    Hacking,
    Destroy,
    Error,
}

impl DisconnectReason {
    pub fn code(&self) -> u8 {
        match self {
            DisconnectReason::ExitGame => 0,
            DisconnectReason::GameFull => 1,
            DisconnectReason::GameStarted => 2,
            DisconnectReason::GameNotFound => 3,
            DisconnectReason::IncorrectVersion => 5,
            DisconnectReason::Banned => 6,
            DisconnectReason::Kicked => 7,
            DisconnectReason::Custom(_) => 8,
            DisconnectReason::InvalidName => 9,
            DisconnectReason::Hacking => 10,
            DisconnectReason::Destroy => 16,
            DisconnectReason::Error => 17,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        Ok(match code {
            0 => DisconnectReason::ExitGame,
            1 => DisconnectReason::GameFull,
            2 => DisconnectReason::GameStarted,
            3 => DisconnectReason::GameNotFound,
            5 => DisconnectReason::IncorrectVersion,
            6 => DisconnectReason::Banned,
            7 => DisconnectReason::Kicked,
            8 => DisconnectReason::Custom(String::new()),
            9 => DisconnectReason::InvalidName,
            10 => DisconnectReason::Hacking,
            16 => DisconnectReason::Destroy,
            17 => DisconnectReason::Error,
            other => return Err(DecodeError::UnknownDisconnectReason(other)),
        })
    }
}

/// Trailing block of a modded hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModdedHello {
    pub protocol_version: u8,
    pub mod_count: u32,
}

/// Identity handshake. A trailing mod-framework block upgrades an
/// ordinary hello to a modded one.
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    pub nonce: u16,
    pub hazel_version: u8,
    pub client_version: ClientVersion,
    pub username: String,
    pub language: u32,
    pub modded: Option<ModdedHello>,
}

impl Hello {
    pub fn new(nonce: u16, client_version: ClientVersion, username: &str, language: u32) -> Self {
        Self {
            nonce,
            hazel_version: HAZEL_VERSION,
            client_version,
            username: username.to_string(),
            language,
            modded: None,
        }
    }
}

/// Connection teardown. Clientbound carries a reason; serverbound is
/// normally empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Disconnect {
    pub reason: Option<DisconnectReason>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RootPacket {
    Unreliable {
        children: Vec<GameMessage>,
    },
    Reliable {
        nonce: u16,
        children: Vec<GameMessage>,
    },
    Hello(Hello),
    Disconnect(Disconnect),
    Ack {
        nonce: u16,
        /// Bit i set means nonce−i−1 was not received.
        missing: u8,
    },
    Ping {
        nonce: u16,
    },
}

impl RootPacket {
    pub fn tag(&self) -> u8 {
        match self {
            RootPacket::Unreliable { .. } => TAG_UNRELIABLE,
            RootPacket::Reliable { .. } => TAG_RELIABLE,
            RootPacket::Hello(_) => TAG_HELLO,
            RootPacket::Disconnect(_) => TAG_DISCONNECT,
            RootPacket::Ack { .. } => TAG_ACK,
            RootPacket::Ping { .. } => TAG_PING,
        }
    }

    /// The nonce this packet carries, when it participates in the
    /// reliability layer.
    pub fn nonce(&self) -> Option<u16> {
        match self {
            RootPacket::Reliable { nonce, .. }
            | RootPacket::Hello(Hello { nonce, .. })
            | RootPacket::Ping { nonce } => Some(*nonce),
            _ => None,
        }
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.tag());
        match self {
            RootPacket::Unreliable { children } => {
                for child in children {
                    child.encode(dst);
                }
            }
            RootPacket::Reliable { nonce, children } => {
                U16BE(*nonce).encode_hazel(dst);
                for child in children {
                    child.encode(dst);
                }
            }
            RootPacket::Hello(hello) => {
                U16BE(hello.nonce).encode_hazel(dst);
                dst.put_u8(hello.hazel_version);
                hello.client_version.encode_hazel(dst);
                hello.username.encode_hazel(dst);
                hello.language.encode_hazel(dst);
                if let Some(modded) = &hello.modded {
                    dst.put_u8(modded.protocol_version);
                    PackedUInt(modded.mod_count).encode_hazel(dst);
                }
            }
            RootPacket::Disconnect(disconnect) => {
                if let Some(reason) = &disconnect.reason {
                    dst.put_u8(1);
                    Frame::write_with(dst, 0x00, |body| {
                        body.put_u8(reason.code());
                        if let DisconnectReason::Custom(text) = reason {
                            text.encode_hazel(body);
                        }
                    });
                }
            }
            RootPacket::Ack { nonce, missing } => {
                U16BE(*nonce).encode_hazel(dst);
                dst.put_u8(*missing);
            }
            RootPacket::Ping { nonce } => {
                U16BE(*nonce).encode_hazel(dst);
            }
        }
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(src: &mut impl Buf, direction: Direction) -> Result<Self, DecodeError> {
        if !src.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let tag = src.get_u8();
        Ok(match tag {
            TAG_UNRELIABLE => RootPacket::Unreliable {
                children: GameMessage::decode_all(src, direction)?,
            },
            TAG_RELIABLE => RootPacket::Reliable {
                nonce: U16BE::decode_hazel(src)?.0,
                children: GameMessage::decode_all(src, direction)?,
            },
            TAG_HELLO => {
                let nonce = U16BE::decode_hazel(src)?.0;
                let hazel_version = u8::decode_hazel(src)?;
                let client_version = ClientVersion::decode_hazel(src)?;
                let username = String::decode_hazel(src)?;
                let language = u32::decode_hazel(src)?;
                let modded = if src.has_remaining() {
                    Some(ModdedHello {
                        protocol_version: u8::decode_hazel(src)?,
                        mod_count: PackedUInt::decode_hazel(src)?.0,
                    })
                } else {
                    None
                };
                RootPacket::Hello(Hello {
                    nonce,
                    hazel_version,
                    client_version,
                    username,
                    language,
                    modded,
                })
            }
            TAG_DISCONNECT => {
                let reason = if src.has_remaining() {
                    let _immediate = u8::decode_hazel(src)?;
                    match Frame::next(src)? {
                        Some(frame) => {
                            let mut body = frame.payload.clone();
                            let code = u8::decode_hazel(&mut body)?;
                            let reason = match DisconnectReason::from_code(code)? {
                                DisconnectReason::Custom(_) => {
                                    DisconnectReason::Custom(String::decode_hazel(&mut body)?)
                                }
                                other => other,
                            };
                            Some(reason)
                        }
                        None => None,
                    }
                } else {
                    None
                };
                RootPacket::Disconnect(Disconnect { reason })
            }
            TAG_ACK => RootPacket::Ack {
                nonce: U16BE::decode_hazel(src)?.0,
                missing: u8::decode_hazel(src)?,
            },
            TAG_PING => RootPacket::Ping {
                nonce: U16BE::decode_hazel(src)?.0,
            },
            other => return Err(DecodeError::UnknownRootTag(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::game::GameSettings;

    fn roundtrip_bytes(pkt: &RootPacket, direction: Direction) {
        let encoded = pkt.to_bytes();
        let mut slice = encoded.clone();
        let decoded = RootPacket::decode(&mut slice, direction).unwrap();
        assert_eq!(&decoded, pkt);
        // Byte-exact re-encode.
        assert_eq!(decoded.to_bytes(), encoded);
    }

    #[test]
    fn reliable_roundtrip() {
        roundtrip_bytes(
            &RootPacket::Reliable {
                nonce: 1,
                children: vec![GameMessage::HostGameRequest {
                    settings: GameSettings::new(10, 0, 0, 2),
                }],
            },
            Direction::Serverbound,
        );
    }

    #[test]
    fn hello_ordinary_roundtrip() {
        roundtrip_bytes(
            &RootPacket::Hello(Hello::new(
                1,
                ClientVersion::new(2021, 6, 30, 0),
                "big bob",
                0,
            )),
            Direction::Serverbound,
        );
    }

    #[test]
    fn hello_modded_roundtrip() {
        let mut hello = Hello::new(1, ClientVersion::new(2021, 6, 30, 0), "modder", 0);
        hello.modded = Some(ModdedHello {
            protocol_version: 1,
            mod_count: 3,
        });
        roundtrip_bytes(&RootPacket::Hello(hello), Direction::Serverbound);
    }

    #[test]
    fn disconnect_with_custom_reason() {
        roundtrip_bytes(
            &RootPacket::Disconnect(Disconnect {
                reason: Some(DisconnectReason::Custom("mod-framework required".into())),
            }),
            Direction::Clientbound,
        );
    }

    #[test]
    fn disconnect_empty() {
        roundtrip_bytes(
            &RootPacket::Disconnect(Disconnect { reason: None }),
            Direction::Serverbound,
        );
    }

    #[test]
    fn ack_and_ping_roundtrip() {
        roundtrip_bytes(
            &RootPacket::Ack {
                nonce: 5,
                missing: 0b0000_0010,
            },
            Direction::Serverbound,
        );
        roundtrip_bytes(&RootPacket::Ping { nonce: 9 }, Direction::Clientbound);
    }

    #[test]
    fn unknown_root_tag_errors() {
        let mut slice = bytes::Bytes::from_static(&[0x7b, 0, 0]);
        assert!(matches!(
            RootPacket::decode(&mut slice, Direction::Serverbound),
            Err(DecodeError::UnknownRootTag(0x7b))
        ));
    }
}
