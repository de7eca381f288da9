use crate::protocol::packet::{DecodeError, HazelEncodable};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::mem;

pub mod code;
pub mod version;

pub use code::GameCode;
pub use version::ClientVersion;

macro_rules! impl_hazel_int {
    ($ty:ty, $put:ident, $get:ident) => {
        impl HazelEncodable for $ty {
            fn encode_hazel(&self, dst: &mut impl BufMut) {
                dst.$put(*self as _);
            }

            fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError> {
                let size = mem::size_of::<$ty>();
                if src.remaining() < size {
                    return Err(DecodeError::UnexpectedEof);
                }
                Ok(src.$get() as $ty)
            }
        }
    };
}

// Payload integers are little-endian on the wire:
impl_hazel_int!(u16, put_u16_le, get_u16_le);
impl_hazel_int!(u32, put_u32_le, get_u32_le);
impl_hazel_int!(i16, put_i16_le, get_i16_le);
impl_hazel_int!(i32, put_i32_le, get_i32_le);

/// Nonces are the one big-endian field in the protocol.
pub struct U16BE(pub u16);

impl HazelEncodable for U16BE {
    fn encode_hazel(&self, dst: &mut impl BufMut) {
        dst.put_u16(self.0);
    }

    fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < 2 {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(U16BE(src.get_u16()))
    }
}

/// 7-bit group variable-length encoding used for "packed" integers.
///
/// Unlike protobuf varints this is capped at 32 bits (5 bytes).
pub struct PackedUInt(pub u32);

impl HazelEncodable for PackedUInt {
    fn encode_hazel(&self, dst: &mut impl BufMut) {
        let mut v = self.0;
        while v >= 0x80 {
            dst.put_u8(((v & 0x7f) | 0x80) as u8);
            v >>= 7;
        }
        dst.put_u8((v & 0x7f) as u8);
    }

    fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            if shift >= 35 {
                return Err(DecodeError::PackedIntExceedsLimit);
            }
            if !src.has_remaining() {
                return Err(DecodeError::UnexpectedEof);
            }
            let v = src.get_u8();
            result |= ((v & 0x7f) as u32) << shift;
            if v & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(PackedUInt(result))
    }
}

/// Packed signed integer; the two's-complement bits are packed as-is
/// (no zigzag), matching the client runtime.
pub struct PackedInt(pub i32);

impl HazelEncodable for PackedInt {
    fn encode_hazel(&self, dst: &mut impl BufMut) {
        PackedUInt(self.0 as u32).encode_hazel(dst);
    }

    fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(PackedInt(PackedUInt::decode_hazel(src)?.0 as i32))
    }
}

impl HazelEncodable for u8 {
    fn encode_hazel(&self, dst: &mut impl BufMut) {
        dst.put_u8(*self);
    }
    fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if !src.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(src.get_u8())
    }
}

impl HazelEncodable for bool {
    fn encode_hazel(&self, dst: &mut impl BufMut) {
        dst.put_u8(if *self { 1 } else { 0 });
    }

    fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if !src.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(src.get_u8() == 1)
    }
}

/// Strings are a packed byte length followed by UTF-8 bytes.
impl HazelEncodable for String {
    fn encode_hazel(&self, dst: &mut impl BufMut) {
        PackedUInt(self.len() as u32).encode_hazel(dst);
        dst.put_slice(self.as_bytes());
    }

    fn decode_hazel(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let len = PackedUInt::decode_hazel(src)?.0 as usize;
        if src.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let raw = src.copy_to_bytes(len);
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}

/// One Hazel-framed inner message: u16 LE length, u8 tag, payload.
pub struct Frame {
    pub tag: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Reads the next frame, or `None` when the buffer is exhausted.
    pub fn next(src: &mut impl Buf) -> Result<Option<Frame>, DecodeError> {
        if !src.has_remaining() {
            return Ok(None);
        }
        if src.remaining() < 3 {
            return Err(DecodeError::UnexpectedEof);
        }
        let len = src.get_u16_le() as usize;
        let tag = src.get_u8();
        if src.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(Some(Frame {
            tag,
            payload: src.copy_to_bytes(len),
        }))
    }

    /// Frames `body` under `tag` into `dst`.
    pub fn write(dst: &mut impl BufMut, tag: u8, body: &[u8]) {
        debug_assert!(body.len() <= u16::MAX as usize);
        dst.put_u16_le(body.len() as u16);
        dst.put_u8(tag);
        dst.put_slice(body);
    }

    /// Frames the output of `f` under `tag`, sparing callers the
    /// temporary buffer dance.
    pub fn write_with(dst: &mut impl BufMut, tag: u8, f: impl FnOnce(&mut BytesMut)) {
        let mut body = BytesMut::new();
        f(&mut body);
        Frame::write(dst, tag, &body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed_roundtrip(v: u32) -> u32 {
        let mut buf = BytesMut::new();
        PackedUInt(v).encode_hazel(&mut buf);
        let mut slice = buf.freeze();
        PackedUInt::decode_hazel(&mut slice).unwrap().0
    }

    #[test]
    fn packed_uint_roundtrip() {
        for v in [0, 1, 0x7f, 0x80, 0x3fff, 0x4000, u32::MAX] {
            assert_eq!(packed_roundtrip(v), v);
        }
    }

    #[test]
    fn packed_int_negative() {
        let mut buf = BytesMut::new();
        PackedInt(-1).encode_hazel(&mut buf);
        assert_eq!(buf.len(), 5);
        let mut slice = buf.freeze();
        assert_eq!(PackedInt::decode_hazel(&mut slice).unwrap().0, -1);
    }

    #[test]
    fn packed_uint_rejects_overlong() {
        let mut slice = Bytes::from_static(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(
            PackedUInt::decode_hazel(&mut slice),
            Err(DecodeError::PackedIntExceedsLimit)
        ));
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = BytesMut::new();
        "big bob".to_string().encode_hazel(&mut buf);
        let mut slice = buf.freeze();
        assert_eq!(String::decode_hazel(&mut slice).unwrap(), "big bob");
    }

    #[test]
    fn frame_roundtrip() {
        let mut buf = BytesMut::new();
        Frame::write(&mut buf, 0x05, &[1, 2, 3]);
        Frame::write(&mut buf, 0x01, &[]);
        let mut slice = buf.freeze();

        let first = Frame::next(&mut slice).unwrap().unwrap();
        assert_eq!(first.tag, 0x05);
        assert_eq!(&first.payload[..], &[1, 2, 3]);

        let second = Frame::next(&mut slice).unwrap().unwrap();
        assert_eq!(second.tag, 0x01);
        assert!(second.payload.is_empty());

        assert!(Frame::next(&mut slice).unwrap().is_none());
    }

    #[test]
    fn frame_truncated_payload() {
        let mut slice = Bytes::from_static(&[0x05, 0x00, 0x01, 0xaa]);
        assert!(matches!(
            Frame::next(&mut slice),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn nonce_is_big_endian() {
        let mut buf = BytesMut::new();
        U16BE(0x0102).encode_hazel(&mut buf);
        assert_eq!(&buf[..], &[0x01, 0x02]);
    }
}
