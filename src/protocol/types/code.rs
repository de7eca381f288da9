use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::protocol::packet::{DecodeError, HazelEncodable};

/// Alphabet used by the 6-letter code scheme, in wire order.
const V2_CHARS: &[u8; 26] = b"QWXRTYLPESDFGHUJKZOCVBINMA";

/// Index of each ASCII uppercase letter into [`V2_CHARS`].
const V2_INDEX: [u8; 26] = [
    25, 21, 19, 10, 8, 11, 12, 13, 22, 15, 16, 6, 24, 23, 18, 7, 0, 3, 9, 4, 14, 20, 1, 2, 5, 17,
];

/// A room identifier, packed into a 32-bit integer on the wire.
///
/// Positive values are 4-letter (v1) codes, negative values are
/// 6-letter (v2) codes. The value `0x20` is the reserved local
/// lobby and is never allocated or listed publicly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GameCode(i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeScheme {
    V1,
    V2,
}

impl GameCode {
    /// Reserved lobby code; excluded from generation and listings.
    pub const LOCAL: GameCode = GameCode(0x20);

    pub fn from_raw(raw: i32) -> GameCode {
        GameCode(raw)
    }

    pub fn raw(&self) -> i32 {
        self.0
    }

    pub fn is_local(&self) -> bool {
        *self == Self::LOCAL
    }

    /// Draws a fresh code under the given scheme. Redraws internally
    /// until the result is not the reserved local value.
    pub fn random(scheme: CodeScheme, rng: &mut impl Rng) -> GameCode {
        loop {
            let code = match scheme {
                CodeScheme::V1 => Self::random_v1(rng),
                CodeScheme::V2 => Self::random_v2(rng),
            };
            if !code.is_local() {
                return code;
            }
        }
    }

    fn random_v1(rng: &mut impl Rng) -> GameCode {
        let mut raw: i32 = 0;
        for shift in [0, 8, 16, 24] {
            let letter = rng.gen_range(b'A'..=b'Z') as i32;
            raw |= letter << shift;
        }
        GameCode(raw)
    }

    fn random_v2(rng: &mut impl Rng) -> GameCode {
        let mut letters = [0u8; 6];
        for slot in letters.iter_mut() {
            *slot = b'A' + rng.gen_range(0..26u8);
        }
        // Six fresh letters always form a valid v2 code.
        Self::from_v2_letters(&letters)
    }

    fn from_v2_letters(letters: &[u8; 6]) -> GameCode {
        let idx = |c: u8| V2_INDEX[(c - b'A') as usize] as i32;
        let first_two = idx(letters[0]) + 26 * idx(letters[1]);
        let last_four = idx(letters[2])
            + 26 * (idx(letters[3]) + 26 * (idx(letters[4]) + 26 * idx(letters[5])));
        let raw = (first_two & 0x3ff) | ((last_four << 10) & 0x3fff_fc00) | i32::MIN;
        GameCode(raw)
    }

    fn v2_letters(&self) -> [u8; 6] {
        let raw = self.0;
        let first_two = raw & 0x3ff;
        let last_four = (raw >> 10) & 0xf_ffff;
        [
            V2_CHARS[(first_two % 26) as usize],
            V2_CHARS[(first_two / 26) as usize],
            V2_CHARS[(last_four % 26) as usize],
            V2_CHARS[((last_four / 26) % 26) as usize],
            V2_CHARS[((last_four / 676) % 26) as usize],
            V2_CHARS[((last_four / 17576) % 26) as usize],
        ]
    }
}

impl fmt::Display for GameCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            return f.write_str("LOCAL");
        }
        if self.0 < 0 {
            let letters = self.v2_letters();
            for c in letters {
                write!(f, "{}", c as char)?;
            }
            Ok(())
        } else {
            // v1: four ASCII letters packed little-endian
            let raw = self.0 as u32;
            for shift in [0, 8, 16, 24] {
                write!(f, "{}", (((raw >> shift) & 0xff) as u8) as char)?;
            }
            Ok(())
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("not a valid game code: {0:?}")]
pub struct ParseCodeError(String);

impl FromStr for GameCode {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        if upper == "LOCAL" {
            return Ok(GameCode::LOCAL);
        }
        let bytes = upper.as_bytes();
        if !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(ParseCodeError(s.to_string()));
        }
        match bytes.len() {
            4 => {
                let mut raw: i32 = 0;
                for (i, &b) in bytes.iter().enumerate() {
                    raw |= (b as i32) << (8 * i);
                }
                Ok(GameCode(raw))
            }
            6 => {
                let mut letters = [0u8; 6];
                letters.copy_from_slice(bytes);
                Ok(GameCode::from_v2_letters(&letters))
            }
            _ => Err(ParseCodeError(s.to_string())),
        }
    }
}

impl HazelEncodable for GameCode {
    fn encode_hazel(&self, dst: &mut impl bytes::BufMut) {
        self.0.encode_hazel(dst);
    }

    fn decode_hazel(src: &mut impl bytes::Buf) -> Result<Self, DecodeError> {
        Ok(GameCode(i32::decode_hazel(src)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn index_table_inverts_alphabet() {
        for (i, &c) in V2_CHARS.iter().enumerate() {
            assert_eq!(V2_INDEX[(c - b'A') as usize] as usize, i);
        }
    }

    #[test]
    fn v1_roundtrip() {
        let code: GameCode = "ABCD".parse().unwrap();
        assert!(code.raw() > 0);
        assert_eq!(code.to_string(), "ABCD");
    }

    #[test]
    fn v2_roundtrip() {
        let code: GameCode = "QWXRTY".parse().unwrap();
        assert!(code.raw() < 0);
        assert_eq!(code.to_string(), "QWXRTY");
    }

    #[test]
    fn local_is_reserved_value() {
        assert_eq!(GameCode::LOCAL.raw(), 0x20);
        assert_eq!("LOCAL".parse::<GameCode>().unwrap(), GameCode::LOCAL);
        assert_eq!(GameCode::LOCAL.to_string(), "LOCAL");
    }

    #[test]
    fn generator_never_yields_local() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2048 {
            assert!(!GameCode::random(CodeScheme::V1, &mut rng).is_local());
            assert!(!GameCode::random(CodeScheme::V2, &mut rng).is_local());
        }
    }

    #[test]
    fn random_v2_displays_six_letters() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..64 {
            let code = GameCode::random(CodeScheme::V2, &mut rng);
            let shown = code.to_string();
            assert_eq!(shown.len(), 6);
            let reparsed: GameCode = shown.parse().unwrap();
            assert_eq!(reparsed, code);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!("ab!".parse::<GameCode>().is_err());
        assert!("TOOLONGCODE".parse::<GameCode>().is_err());
    }
}
