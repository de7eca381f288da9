//! Root children carried inside Reliable / Unreliable packets.
//!
//! A handful of tags are dual-meaning: the payload differs between
//! the serverbound and clientbound dialects, so decoding takes a
//! [`Direction`]. Encoding does not – each variant already knows
//! which dialect it belongs to.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::{
    packet::{
        gamedata::GameDataMessage, root::DisconnectReason, DecodeError, Direction, HazelEncodable,
    },
    types::{Frame, GameCode, PackedInt, PackedUInt},
};

const TAG_HOST_GAME: u8 = 0x00;
const TAG_JOIN_GAME: u8 = 0x01;
const TAG_START_GAME: u8 = 0x02;
const TAG_REMOVE_GAME: u8 = 0x03;
const TAG_REMOVE_PLAYER: u8 = 0x04;
const TAG_GAME_DATA: u8 = 0x05;
const TAG_GAME_DATA_TO: u8 = 0x06;
const TAG_JOINED_GAME: u8 = 0x07;
const TAG_END_GAME: u8 = 0x08;
const TAG_ALTER_GAME: u8 = 0x0a;
const TAG_KICK_PLAYER: u8 = 0x0b;
const TAG_GET_GAME_LIST: u8 = 0x10;
const TAG_REACTOR: u8 = 0xff;

/// Lobby settings blob. Opaque to the relay except for the handful
/// of header fields used by join checks and game listing; the raw
/// body is kept so re-encoding is byte-exact.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSettings {
    pub version: u8,
    pub max_players: u8,
    pub keywords: u32,
    pub map: u8,
    pub num_impostors: u8,
    raw: Bytes,
}

// Byte offsets into the settings body.
const OFFSET_KEYWORDS: usize = 2;
const OFFSET_MAP: usize = 6;
const OFFSET_IMPOSTORS: usize = 30;

impl GameSettings {
    /// Builds a settings blob from the routed header fields, with
    /// neutral values for everything the relay never reads.
    pub fn new(max_players: u8, keywords: u32, map: u8, num_impostors: u8) -> Self {
        let mut body = BytesMut::zeroed(41);
        body[0] = 1; // settings version
        body[1] = max_players;
        body[OFFSET_KEYWORDS..OFFSET_KEYWORDS + 4].copy_from_slice(&keywords.to_le_bytes());
        body[OFFSET_MAP] = map;
        body[OFFSET_IMPOSTORS] = num_impostors;
        Self {
            version: 1,
            max_players,
            keywords,
            map,
            num_impostors,
            raw: body.freeze(),
        }
    }
}

impl HazelEncodable for GameSettings {
    fn encode_hazel(&self, dst: &mut impl BufMut) {
        PackedUInt(self.raw.len() as u32).encode_hazel(dst);
        dst.put_slice(&self.raw);
    }

    fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let len = PackedUInt::decode_hazel(src)?.0 as usize;
        if src.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let raw = src.copy_to_bytes(len);
        if raw.len() < OFFSET_MAP + 1 {
            return Err(DecodeError::UnexpectedEof);
        }
        let keywords = u32::from_le_bytes([
            raw[OFFSET_KEYWORDS],
            raw[OFFSET_KEYWORDS + 1],
            raw[OFFSET_KEYWORDS + 2],
            raw[OFFSET_KEYWORDS + 3],
        ]);
        Ok(Self {
            version: raw[0],
            max_players: raw[1],
            keywords,
            map: raw[OFFSET_MAP],
            num_impostors: raw.get(OFFSET_IMPOSTORS).copied().unwrap_or(1),
            raw,
        })
    }
}

/// One row of a game listing response.
#[derive(Debug, Clone, PartialEq)]
pub struct GameListing {
    pub ip: [u8; 4],
    pub port: u16,
    pub code: GameCode,
    pub host_name: String,
    pub players: u8,
    pub age_seconds: u32,
    pub map: u8,
    pub num_impostors: u8,
    pub max_players: u8,
}

impl GameListing {
    fn encode(&self, dst: &mut impl BufMut) {
        Frame::write_with(dst, 0x00, |body| {
            body.put_slice(&self.ip);
            self.port.encode_hazel(body);
            self.code.encode_hazel(body);
            self.host_name.encode_hazel(body);
            body.put_u8(self.players);
            PackedUInt(self.age_seconds).encode_hazel(body);
            body.put_u8(self.map);
            body.put_u8(self.num_impostors);
            body.put_u8(self.max_players);
        });
    }

    fn decode(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < 4 {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut ip = [0u8; 4];
        src.copy_to_slice(&mut ip);
        Ok(Self {
            ip,
            port: u16::decode_hazel(src)?,
            code: GameCode::decode_hazel(src)?,
            host_name: String::decode_hazel(src)?,
            players: u8::decode_hazel(src)?,
            age_seconds: PackedUInt::decode_hazel(src)?.0,
            map: u8::decode_hazel(src)?,
            num_impostors: u8::decode_hazel(src)?,
            max_players: u8::decode_hazel(src)?,
        })
    }
}

/// Network side a declared mod runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModSide {
    Clientside = 0,
    Serverside = 1,
    Both = 2,
}

impl HazelEncodable for ModSide {
    fn encode_hazel(&self, dst: &mut impl BufMut) {
        dst.put_u8(*self as u8);
    }

    fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError> {
        match u8::decode_hazel(src)? {
            0 => Ok(ModSide::Clientside),
            1 => Ok(ModSide::Serverside),
            2 => Ok(ModSide::Both),
            other => Err(DecodeError::UnknownModSide(other)),
        }
    }
}

/// One mod announced by a modded client.
#[derive(Debug, Clone, PartialEq)]
pub struct ModDeclaration {
    /// Net id assigned by the client for custom rpc routing.
    pub net_id: u32,
    pub id: String,
    pub version: String,
    pub side: ModSide,
}

/// Mod-framework handshake traffic under the reserved 0xff tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ReactorMessage {
    /// Server acknowledges a modded hello.
    Handshake {
        server_brand: String,
        version: String,
        plugin_count: u32,
    },
    /// Client announces one of its mods.
    ModDeclaration(ModDeclaration),
    /// Server mirrors one of its plugins as a mod.
    PluginDeclaration { id: String, version: String },
}

impl ReactorMessage {
    fn encode_body(&self, dst: &mut impl BufMut) {
        match self {
            ReactorMessage::Handshake {
                server_brand,
                version,
                plugin_count,
            } => {
                dst.put_u8(0);
                server_brand.encode_hazel(dst);
                version.encode_hazel(dst);
                PackedUInt(*plugin_count).encode_hazel(dst);
            }
            ReactorMessage::ModDeclaration(decl) => {
                dst.put_u8(1);
                PackedUInt(decl.net_id).encode_hazel(dst);
                decl.id.encode_hazel(dst);
                decl.version.encode_hazel(dst);
                decl.side.encode_hazel(dst);
            }
            ReactorMessage::PluginDeclaration { id, version } => {
                dst.put_u8(2);
                id.encode_hazel(dst);
                version.encode_hazel(dst);
            }
        }
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        match u8::decode_hazel(src)? {
            0 => Ok(ReactorMessage::Handshake {
                server_brand: String::decode_hazel(src)?,
                version: String::decode_hazel(src)?,
                plugin_count: PackedUInt::decode_hazel(src)?.0,
            }),
            1 => Ok(ReactorMessage::ModDeclaration(ModDeclaration {
                net_id: PackedUInt::decode_hazel(src)?.0,
                id: String::decode_hazel(src)?,
                version: String::decode_hazel(src)?,
                side: ModSide::decode_hazel(src)?,
            })),
            2 => Ok(ReactorMessage::PluginDeclaration {
                id: String::decode_hazel(src)?,
                version: String::decode_hazel(src)?,
            }),
            other => Err(DecodeError::UnknownReactorTag(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameMessage {
    // tag 0x00
    HostGameRequest {
        settings: GameSettings,
    },
    HostGameResponse {
        code: GameCode,
    },
    // tag 0x01: the clientbound dialect carries either the join
    // notification (12 bytes) or a bare join error (4 bytes)
    JoinGameRequest {
        code: GameCode,
    },
    JoinGameNotify {
        code: GameCode,
        client_id: i32,
        host_id: i32,
    },
    JoinGameError {
        reason: DisconnectReason,
    },
    StartGame {
        code: GameCode,
    },
    RemoveGame {
        reason: u8,
    },
    RemovePlayer {
        code: GameCode,
        client_id: i32,
        host_id: i32,
        reason: u8,
    },
    GameData {
        code: GameCode,
        children: Vec<GameDataMessage>,
    },
    GameDataTo {
        code: GameCode,
        target: i32,
        children: Vec<GameDataMessage>,
    },
    JoinedGame {
        code: GameCode,
        client_id: i32,
        host_id: i32,
        others: Vec<i32>,
    },
    EndGame {
        code: GameCode,
        reason: u8,
        show_ad: bool,
    },
    AlterGame {
        code: GameCode,
        alter_tag: u8,
        value: u8,
    },
    KickPlayerRequest {
        target: i32,
        banned: bool,
    },
    KickPlayerNotify {
        code: GameCode,
        target: i32,
        banned: bool,
    },
    GetGameListRequest {
        version: i32,
        filter: GameSettings,
    },
    GetGameListResponse {
        games: Vec<GameListing>,
    },
    Reactor(ReactorMessage),
    Unknown {
        tag: u8,
        payload: Bytes,
    },
}

impl GameMessage {
    pub fn tag(&self) -> u8 {
        match self {
            GameMessage::HostGameRequest { .. } | GameMessage::HostGameResponse { .. } => {
                TAG_HOST_GAME
            }
            GameMessage::JoinGameRequest { .. }
            | GameMessage::JoinGameNotify { .. }
            | GameMessage::JoinGameError { .. } => TAG_JOIN_GAME,
            GameMessage::StartGame { .. } => TAG_START_GAME,
            GameMessage::RemoveGame { .. } => TAG_REMOVE_GAME,
            GameMessage::RemovePlayer { .. } => TAG_REMOVE_PLAYER,
            GameMessage::GameData { .. } => TAG_GAME_DATA,
            GameMessage::GameDataTo { .. } => TAG_GAME_DATA_TO,
            GameMessage::JoinedGame { .. } => TAG_JOINED_GAME,
            GameMessage::EndGame { .. } => TAG_END_GAME,
            GameMessage::AlterGame { .. } => TAG_ALTER_GAME,
            GameMessage::KickPlayerRequest { .. } | GameMessage::KickPlayerNotify { .. } => {
                TAG_KICK_PLAYER
            }
            GameMessage::GetGameListRequest { .. } | GameMessage::GetGameListResponse { .. } => {
                TAG_GET_GAME_LIST
            }
            GameMessage::Reactor(_) => TAG_REACTOR,
            GameMessage::Unknown { tag, .. } => *tag,
        }
    }

    /// Encodes the full frame (length, tag, body).
    pub fn encode(&self, dst: &mut impl BufMut) {
        Frame::write_with(dst, self.tag(), |body| self.encode_payload(body));
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        match self {
            GameMessage::HostGameRequest { settings } => settings.encode_hazel(dst),
            GameMessage::HostGameResponse { code } => code.encode_hazel(dst),
            GameMessage::JoinGameRequest { code } => code.encode_hazel(dst),
            GameMessage::JoinGameNotify {
                code,
                client_id,
                host_id,
            } => {
                code.encode_hazel(dst);
                client_id.encode_hazel(dst);
                host_id.encode_hazel(dst);
            }
            GameMessage::JoinGameError { reason } => {
                (reason.code() as i32).encode_hazel(dst);
            }
            GameMessage::StartGame { code } => code.encode_hazel(dst),
            GameMessage::RemoveGame { reason } => dst.put_u8(*reason),
            GameMessage::RemovePlayer {
                code,
                client_id,
                host_id,
                reason,
            } => {
                code.encode_hazel(dst);
                client_id.encode_hazel(dst);
                host_id.encode_hazel(dst);
                dst.put_u8(*reason);
            }
            GameMessage::GameData { code, children } => {
                code.encode_hazel(dst);
                for child in children {
                    child.encode(dst);
                }
            }
            GameMessage::GameDataTo {
                code,
                target,
                children,
            } => {
                code.encode_hazel(dst);
                PackedInt(*target).encode_hazel(dst);
                for child in children {
                    child.encode(dst);
                }
            }
            GameMessage::JoinedGame {
                code,
                client_id,
                host_id,
                others,
            } => {
                code.encode_hazel(dst);
                client_id.encode_hazel(dst);
                host_id.encode_hazel(dst);
                PackedUInt(others.len() as u32).encode_hazel(dst);
                for id in others {
                    PackedInt(*id).encode_hazel(dst);
                }
            }
            GameMessage::EndGame {
                code,
                reason,
                show_ad,
            } => {
                code.encode_hazel(dst);
                dst.put_u8(*reason);
                show_ad.encode_hazel(dst);
            }
            GameMessage::AlterGame {
                code,
                alter_tag,
                value,
            } => {
                code.encode_hazel(dst);
                dst.put_u8(*alter_tag);
                dst.put_u8(*value);
            }
            GameMessage::KickPlayerRequest { target, banned } => {
                PackedInt(*target).encode_hazel(dst);
                banned.encode_hazel(dst);
            }
            GameMessage::KickPlayerNotify {
                code,
                target,
                banned,
            } => {
                code.encode_hazel(dst);
                PackedInt(*target).encode_hazel(dst);
                banned.encode_hazel(dst);
            }
            GameMessage::GetGameListRequest { version, filter } => {
                PackedInt(*version).encode_hazel(dst);
                filter.encode_hazel(dst);
            }
            GameMessage::GetGameListResponse { games } => {
                for game in games {
                    game.encode(dst);
                }
            }
            GameMessage::Reactor(msg) => msg.encode_body(dst),
            GameMessage::Unknown { payload, .. } => dst.put_slice(payload),
        }
    }

    /// Decodes one framed root child with the given dialect.
    /// Unrecognised tags land in `Unknown`.
    pub fn decode_frame(frame: &Frame, direction: Direction) -> Result<Self, DecodeError> {
        let mut src = frame.payload.clone();
        let msg = match (frame.tag, direction) {
            (TAG_HOST_GAME, Direction::Serverbound) => GameMessage::HostGameRequest {
                settings: GameSettings::decode_hazel(&mut src)?,
            },
            (TAG_HOST_GAME, Direction::Clientbound) => GameMessage::HostGameResponse {
                code: GameCode::decode_hazel(&mut src)?,
            },
            (TAG_JOIN_GAME, Direction::Serverbound) => GameMessage::JoinGameRequest {
                code: GameCode::decode_hazel(&mut src)?,
            },
            (TAG_JOIN_GAME, Direction::Clientbound) => {
                if frame.payload.len() == 12 {
                    GameMessage::JoinGameNotify {
                        code: GameCode::decode_hazel(&mut src)?,
                        client_id: i32::decode_hazel(&mut src)?,
                        host_id: i32::decode_hazel(&mut src)?,
                    }
                } else {
                    let raw = i32::decode_hazel(&mut src)?;
                    GameMessage::JoinGameError {
                        reason: DisconnectReason::from_code(raw as u8)?,
                    }
                }
            }
            (TAG_START_GAME, _) => GameMessage::StartGame {
                code: GameCode::decode_hazel(&mut src)?,
            },
            (TAG_REMOVE_GAME, _) => GameMessage::RemoveGame {
                reason: u8::decode_hazel(&mut src)?,
            },
            (TAG_REMOVE_PLAYER, _) => GameMessage::RemovePlayer {
                code: GameCode::decode_hazel(&mut src)?,
                client_id: i32::decode_hazel(&mut src)?,
                host_id: i32::decode_hazel(&mut src)?,
                reason: u8::decode_hazel(&mut src)?,
            },
            (TAG_GAME_DATA, _) => GameMessage::GameData {
                code: GameCode::decode_hazel(&mut src)?,
                children: GameDataMessage::decode_all(&mut src)?,
            },
            (TAG_GAME_DATA_TO, _) => GameMessage::GameDataTo {
                code: GameCode::decode_hazel(&mut src)?,
                target: PackedInt::decode_hazel(&mut src)?.0,
                children: GameDataMessage::decode_all(&mut src)?,
            },
            (TAG_JOINED_GAME, _) => {
                let code = GameCode::decode_hazel(&mut src)?;
                let client_id = i32::decode_hazel(&mut src)?;
                let host_id = i32::decode_hazel(&mut src)?;
                let count = PackedUInt::decode_hazel(&mut src)?.0;
                let mut others = Vec::with_capacity(count.min(32) as usize);
                for _ in 0..count {
                    others.push(PackedInt::decode_hazel(&mut src)?.0);
                }
                GameMessage::JoinedGame {
                    code,
                    client_id,
                    host_id,
                    others,
                }
            }
            (TAG_END_GAME, _) => GameMessage::EndGame {
                code: GameCode::decode_hazel(&mut src)?,
                reason: u8::decode_hazel(&mut src)?,
                show_ad: bool::decode_hazel(&mut src)?,
            },
            (TAG_ALTER_GAME, _) => GameMessage::AlterGame {
                code: GameCode::decode_hazel(&mut src)?,
                alter_tag: u8::decode_hazel(&mut src)?,
                value: u8::decode_hazel(&mut src)?,
            },
            (TAG_KICK_PLAYER, Direction::Serverbound) => GameMessage::KickPlayerRequest {
                target: PackedInt::decode_hazel(&mut src)?.0,
                banned: bool::decode_hazel(&mut src)?,
            },
            (TAG_KICK_PLAYER, Direction::Clientbound) => GameMessage::KickPlayerNotify {
                code: GameCode::decode_hazel(&mut src)?,
                target: PackedInt::decode_hazel(&mut src)?.0,
                banned: bool::decode_hazel(&mut src)?,
            },
            (TAG_GET_GAME_LIST, Direction::Serverbound) => GameMessage::GetGameListRequest {
                version: PackedInt::decode_hazel(&mut src)?.0,
                filter: GameSettings::decode_hazel(&mut src)?,
            },
            (TAG_GET_GAME_LIST, Direction::Clientbound) => {
                let mut games = Vec::new();
                while let Some(entry) = Frame::next(&mut src)? {
                    let mut body = entry.payload.clone();
                    games.push(GameListing::decode(&mut body)?);
                }
                GameMessage::GetGameListResponse { games }
            }
            (TAG_REACTOR, _) => GameMessage::Reactor(ReactorMessage::decode_body(&mut src)?),
            (tag, _) => GameMessage::Unknown {
                tag,
                payload: frame.payload.clone(),
            },
        };
        Ok(msg)
    }

    /// Decodes every framed root child in `src`.
    pub fn decode_all(
        src: &mut impl Buf,
        direction: Direction,
    ) -> Result<Vec<GameMessage>, DecodeError> {
        let mut out = Vec::new();
        while let Some(frame) = Frame::next(src)? {
            out.push(GameMessage::decode_frame(&frame, direction)?);
        }
        Ok(out)
    }
}
