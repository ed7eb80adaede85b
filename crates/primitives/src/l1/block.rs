use std::{
    fmt,
    io::{self, Read, Write},
};

use arbitrary::{Arbitrary, Unstructured};
use bitcoin::BlockHash;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::buf::Buf32;

/// A block on a tracked chain identified by both its hash and its height.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    hash: BlockHash,
    height: u64,
}

impl BlockRef {
    pub fn new(hash: BlockHash, height: u64) -> Self {
        Self { hash, height }
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }

    pub fn height(&self) -> u64 {
        self.height
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.hash, self.height)
    }
}

impl BorshSerialize for BlockRef {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        BorshSerialize::serialize(&Buf32::from(self.hash), writer)?;
        BorshSerialize::serialize(&self.height, writer)
    }
}

impl BorshDeserialize for BlockRef {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let hash = Buf32::deserialize_reader(reader)?;
        let height = u64::deserialize_reader(reader)?;

        Ok(Self {
            hash: hash.into(),
            height,
        })
    }
}

impl<'a> Arbitrary<'a> for BlockRef {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let hash = Buf32::arbitrary(u)?;
        // keep heights in a range a real chain could reach
        let height = u.int_in_range(0..=10_000_000)?;

        Ok(Self {
            hash: hash.into(),
            height,
        })
    }
}
