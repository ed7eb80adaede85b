use std::{fmt, str};

use arbitrary::Arbitrary;
use bitcoin::{hashes::Hash, BlockHash, Txid};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::HASH_SIZE;

// 32-byte buf, useful for hashes and txids
#[derive(
    Copy,
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct Buf32(pub [u8; HASH_SIZE]);

impl Buf32 {
    pub fn zero() -> Self {
        Self([0; HASH_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; HASH_SIZE]
    }
}

impl From<[u8; HASH_SIZE]> for Buf32 {
    fn from(value: [u8; HASH_SIZE]) -> Self {
        Self(value)
    }
}

impl From<Buf32> for [u8; HASH_SIZE] {
    fn from(value: Buf32) -> Self {
        value.0
    }
}

impl From<BlockHash> for Buf32 {
    fn from(value: BlockHash) -> Self {
        value.to_byte_array().into()
    }
}

impl From<Buf32> for BlockHash {
    fn from(value: Buf32) -> Self {
        BlockHash::from_byte_array(value.0)
    }
}

impl From<Txid> for Buf32 {
    fn from(value: Txid) -> Self {
        value.to_byte_array().into()
    }
}

impl From<Buf32> for Txid {
    fn from(value: Buf32) -> Self {
        Txid::from_byte_array(value.0)
    }
}

impl fmt::Debug for Buf32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0; 2 * HASH_SIZE];
        hex::encode_to_slice(self.0, &mut buf).expect("buf: enc hex");
        // hex output is always ascii
        f.write_str(str::from_utf8(&buf).map_err(|_| fmt::Error)?)
    }
}

impl fmt::Display for Buf32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl str::FromStr for Buf32 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buf = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut buf)?;
        Ok(Self(buf))
    }
}

impl Serialize for Buf32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Buf32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
