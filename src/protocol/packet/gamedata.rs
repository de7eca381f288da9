//! Game-data children carried inside GameData / GameDataTo messages.
//!
//! The relay treats most of these as opaque: it needs the tags and
//! the leading net-object ids for routing decisions, the rest of the
//! payload is forwarded byte-for-byte.

use bytes::{Buf, BufMut, Bytes};

use crate::protocol::{
    constants::SpawnFlags,
    packet::{utils::define_game_data_messages, ChildMessage, DecodeError, HazelEncodable},
    types::{Frame, PackedInt, PackedUInt},
};

/// Raw state update for one net object.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub net_id: u32,
    pub payload: Bytes,
}

impl ChildMessage for Data {
    const TAG: u8 = 0x01;

    fn encode_body(&self, dst: &mut impl BufMut) {
        PackedUInt(self.net_id).encode_hazel(dst);
        dst.put_slice(&self.payload);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let net_id = PackedUInt::decode_hazel(src)?.0;
        let remaining = src.remaining();
        Ok(Self {
            net_id,
            payload: src.copy_to_bytes(remaining),
        })
    }
}

/// Remote procedure call on a net object.
#[derive(Debug, Clone, PartialEq)]
pub struct Rpc {
    pub net_id: u32,
    pub call_id: u8,
    pub payload: Bytes,
}

impl Rpc {
    /// Chat text for a SendChat call, when well-formed.
    pub fn chat_text(&self) -> Option<String> {
        let mut src = self.payload.clone();
        String::decode_hazel(&mut src).ok()
    }
}

impl ChildMessage for Rpc {
    const TAG: u8 = 0x02;

    fn encode_body(&self, dst: &mut impl BufMut) {
        PackedUInt(self.net_id).encode_hazel(dst);
        dst.put_u8(self.call_id);
        dst.put_slice(&self.payload);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let net_id = PackedUInt::decode_hazel(src)?.0;
        let call_id = u8::decode_hazel(src)?;
        let remaining = src.remaining();
        Ok(Self {
            net_id,
            call_id,
            payload: src.copy_to_bytes(remaining),
        })
    }
}

/// One component of a spawned prefab. Component data is opaque; the
/// frame tag is preserved for byte-exact re-encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnComponent {
    pub net_id: u32,
    pub tag: u8,
    pub data: Bytes,
}

/// Prefab instantiation. Decoded only deep enough to learn the
/// component net ids; the relay uses those for movement routing.
#[derive(Debug, Clone, PartialEq)]
pub struct Spawn {
    pub spawn_type: u32,
    pub owner: i32,
    pub flags: SpawnFlags,
    pub components: Vec<SpawnComponent>,
}

impl ChildMessage for Spawn {
    const TAG: u8 = 0x04;

    fn encode_body(&self, dst: &mut impl BufMut) {
        PackedUInt(self.spawn_type).encode_hazel(dst);
        PackedInt(self.owner).encode_hazel(dst);
        dst.put_u8(self.flags.bits());
        PackedUInt(self.components.len() as u32).encode_hazel(dst);
        for component in &self.components {
            PackedUInt(component.net_id).encode_hazel(dst);
            Frame::write(dst, component.tag, &component.data);
        }
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let spawn_type = PackedUInt::decode_hazel(src)?.0;
        let owner = PackedInt::decode_hazel(src)?.0;
        let flags = SpawnFlags::from_bits_retain(u8::decode_hazel(src)?);
        let count = PackedUInt::decode_hazel(src)?.0;
        let mut components = Vec::with_capacity(count.min(16) as usize);
        for _ in 0..count {
            let net_id = PackedUInt::decode_hazel(src)?.0;
            let frame = Frame::next(src)?.ok_or(DecodeError::UnexpectedEof)?;
            components.push(SpawnComponent {
                net_id,
                tag: frame.tag,
                data: frame.payload,
            });
        }
        Ok(Self {
            spawn_type,
            owner,
            flags,
            components,
        })
    }
}

/// Net object teardown.
#[derive(Debug, Clone, PartialEq)]
pub struct Despawn {
    pub net_id: u32,
}

impl ChildMessage for Despawn {
    const TAG: u8 = 0x05;

    fn encode_body(&self, dst: &mut impl BufMut) {
        PackedUInt(self.net_id).encode_hazel(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            net_id: PackedUInt::decode_hazel(src)?.0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneChange {
    pub client_id: i32,
    pub scene: String,
}

impl ChildMessage for SceneChange {
    const TAG: u8 = 0x06;

    fn encode_body(&self, dst: &mut impl BufMut) {
        PackedInt(self.client_id).encode_hazel(dst);
        self.scene.encode_hazel(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            client_id: PackedInt::decode_hazel(src)?.0,
            scene: String::decode_hazel(src)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
    pub client_id: i32,
}

impl ChildMessage for Ready {
    const TAG: u8 = 0x07;

    fn encode_body(&self, dst: &mut impl BufMut) {
        PackedInt(self.client_id).encode_hazel(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            client_id: PackedInt::decode_hazel(src)?.0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub client_id: i32,
    pub platform: u32,
}

impl ChildMessage for ClientInfo {
    const TAG: u8 = 0xcd;

    fn encode_body(&self, dst: &mut impl BufMut) {
        PackedInt(self.client_id).encode_hazel(dst);
        PackedUInt(self.platform).encode_hazel(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            client_id: PackedInt::decode_hazel(src)?.0,
            platform: PackedUInt::decode_hazel(src)?.0,
        })
    }
}

define_game_data_messages! {
    Data,
    Rpc,
    Spawn,
    Despawn,
    SceneChange,
    Ready,
    ClientInfo,
}

impl GameDataMessage {
    /// Decodes every framed child in `src`.
    pub fn decode_all(src: &mut impl Buf) -> Result<Vec<GameDataMessage>, DecodeError> {
        let mut out = Vec::new();
        while let Some(frame) = Frame::next(src)? {
            out.push(GameDataMessage::decode_frame(&frame)?);
        }
        Ok(out)
    }
}
