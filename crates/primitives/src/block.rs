use std::fmt;

use bitcoin::{hashes::Hash, BlockHash, Txid};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::buf::Buf32;

/// Identity of a base-chain block, as stored and gossiped by the node.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct L1BlockId(Buf32);

impl L1BlockId {
    pub const fn new(buf: Buf32) -> Self {
        Self(buf)
    }

    pub fn inner(&self) -> &Buf32 {
        &self.0
    }

    /// Folds the 32-byte id into a stable 64-bit fingerprint.
    ///
    /// Accumulator rotates left 7 bits then XORs each byte in order. Must
    /// stay bit-for-bit reproducible across implementations; do not change.
    pub fn safe_u64(&self) -> u64 {
        self.0
            .as_bytes()
            .iter()
            .fold(0u64, |acc, b| acc.rotate_left(7) ^ (*b as u64))
    }
}

impl From<BlockHash> for L1BlockId {
    fn from(hash: BlockHash) -> Self {
        Self(Buf32::new(hash.to_byte_array()))
    }
}

impl From<L1BlockId> for BlockHash {
    fn from(id: L1BlockId) -> Self {
        BlockHash::from_byte_array(id.0.into_bytes())
    }
}

impl From<Buf32> for L1BlockId {
    fn from(buf: Buf32) -> Self {
        Self(buf)
    }
}

impl fmt::Display for L1BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for L1BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// Identity of an OPNet transaction in committed history.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct OpTxId(Buf32);

impl OpTxId {
    pub const fn new(buf: Buf32) -> Self {
        Self(buf)
    }

    pub fn inner(&self) -> &Buf32 {
        &self.0
    }
}

impl From<Txid> for OpTxId {
    fn from(txid: Txid) -> Self {
        Self(Buf32::new(txid.to_byte_array()))
    }
}

impl From<OpTxId> for Txid {
    fn from(id: OpTxId) -> Self {
        Txid::from_byte_array(id.0.into_bytes())
    }
}

impl fmt::Display for OpTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for OpTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// A `(height, block id)` pair naming one base-chain block.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct BlockRef {
    height: u64,
    blkid: L1BlockId,
}

impl BlockRef {
    pub const fn new(height: u64, blkid: L1BlockId) -> Self {
        Self { height, blkid }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn blkid(&self) -> &L1BlockId {
        &self.blkid
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.height, self.blkid)
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:?}", self.height, self.blkid)
    }
}
