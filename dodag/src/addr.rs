use core::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Link layer address of a neighbor, the key of the neighbor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkAddr([u8; LinkAddr::BYTE_SIZE]);

impl LinkAddr {
    /// Size in bytes of a `LinkAddr`.
    pub const BYTE_SIZE: usize = 8;

    /// Create a new `LinkAddr` from raw bytes.
    pub const fn new(bytes: [u8; Self::BYTE_SIZE]) -> Self {
        LinkAddr(bytes)
    }

    /// View this `LinkAddr` as a byte array.
    pub const fn as_bytes(&self) -> &[u8; Self::BYTE_SIZE] {
        &self.0
    }
}

impl From<u64> for LinkAddr {
    fn from(value: u64) -> Self {
        LinkAddr(value.to_be_bytes())
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&faster_hex::hex_string(&self.0))
    }
}

/// Error returned when parsing a [`LinkAddr`] from its hex representation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid link address, expected {} hex characters", LinkAddr::BYTE_SIZE * 2)]
pub struct InvalidLinkAddr;

impl FromStr for LinkAddr {
    type Err = InvalidLinkAddr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::BYTE_SIZE * 2 {
            return Err(InvalidLinkAddr);
        }
        let mut out = [0; Self::BYTE_SIZE];
        faster_hex::hex_decode(s.as_bytes(), &mut out).map_err(|_| InvalidLinkAddr)?;
        Ok(LinkAddr(out))
    }
}

impl Serialize for LinkAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LinkAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
