/// INTERNAL
/// Used to generate the GameDataMessage enum type
/// this will be used in all relay loops
/// to encode and decode game-data children.
macro_rules! define_game_data_messages {
    (
        $(
            $name:ident,
        )+
    ) => {
        #[derive(Debug, Clone, PartialEq)]
        pub enum GameDataMessage {
            $(
                $name($name),
            )+
            Unknown { tag: u8, payload: bytes::Bytes },
        }

        impl GameDataMessage {
            /// Decodes one framed child. Unrecognised tags land in
            /// `Unknown` so callers can decide whether to forward
            /// or drop them.
            pub fn decode_frame(frame: &Frame) -> Result<Self, DecodeError> {
                let mut src = frame.payload.clone();
                Ok(match frame.tag {
                    $(
                        <$name as ChildMessage>::TAG => {
                            GameDataMessage::$name(<$name as ChildMessage>::decode_body(&mut src)?)
                        }
                    )+
                    other => GameDataMessage::Unknown {
                        tag: other,
                        payload: frame.payload.clone(),
                    },
                })
            }

            pub fn tag(&self) -> u8 {
                match self {
                    $(
                        GameDataMessage::$name(_inner) => <$name as ChildMessage>::TAG,
                    )+
                    GameDataMessage::Unknown { tag, .. } => *tag,
                }
            }

            /// Encodes the full frame (length, tag, body).
            pub fn encode(&self, dst: &mut impl BufMut) {
                match self {
                    $(
                        GameDataMessage::$name(inner) => {
                            Frame::write_with(dst, <$name as ChildMessage>::TAG, |body| {
                                inner.encode_body(body)
                            });
                        }
                    )+
                    GameDataMessage::Unknown { tag, payload } => {
                        Frame::write(dst, *tag, payload);
                    }
                }
            }
        }
    }
}
pub(crate) use define_game_data_messages;
