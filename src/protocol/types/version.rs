use std::fmt;
use std::str::FromStr;

use crate::protocol::packet::{DecodeError, HazelEncodable};

/// Client build identity, packed into a single i32 on the wire as
/// `year * 25000 + month * 1800 + day * 50 + revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientVersion {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub revision: u32,
}

impl ClientVersion {
    pub fn new(year: u32, month: u32, day: u32, revision: u32) -> Self {
        Self {
            year,
            month,
            day,
            revision,
        }
    }

    pub fn to_raw(self) -> i32 {
        (self.year * 25000 + self.month * 1800 + self.day * 50 + self.revision) as i32
    }

    pub fn from_raw(raw: i32) -> Self {
        let mut rest = raw as u32;
        let year = rest / 25000;
        rest %= 25000;
        let month = rest / 1800;
        rest %= 1800;
        let day = rest / 50;
        let revision = rest % 50;
        Self {
            year,
            month,
            day,
            revision,
        }
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revision == 0 {
            write!(f, "{}.{}.{}", self.year, self.month, self.day)
        } else {
            write!(
                f,
                "{}.{}.{}.{}",
                self.year, self.month, self.day, self.revision
            )
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("not a valid client version: {0:?}")]
pub struct ParseVersionError(String);

impl FromStr for ClientVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut take = || -> Result<u32, ParseVersionError> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| ParseVersionError(s.to_string()))
        };
        let year = take()?;
        let month = take()?;
        let day = take()?;
        let revision = parts.next().map(|p| p.parse().ok());
        let revision = match revision {
            Some(Some(r)) => r,
            Some(None) => return Err(ParseVersionError(s.to_string())),
            None => 0,
        };
        if parts.next().is_some() {
            return Err(ParseVersionError(s.to_string()));
        }
        Ok(Self::new(year, month, day, revision))
    }
}

impl HazelEncodable for ClientVersion {
    fn encode_hazel(&self, dst: &mut impl bytes::BufMut) {
        self.to_raw().encode_hazel(dst);
    }

    fn decode_hazel(src: &mut impl bytes::Buf) -> Result<Self, DecodeError> {
        Ok(Self::from_raw(i32::decode_hazel(src)?))
    }
}
