//! Consensus state checkpoint carried in block headers
//!
//! A checkpoint is the six table roots in a fixed order. Its combined root is
//! keccak-256 over the concatenated roots, which is exactly the canonical
//! binary encoding produced by [`Checkpoint::encode`].

use crate::{ConsensusError, Result};
use devote_core::crypto::keccak256_concat;
use devote_core::{Hash, HASH_LENGTH};
use serde::{Deserialize, Serialize};

/// Number of table roots in a checkpoint
pub const ROOT_COUNT: usize = 6;

/// Length of the canonical binary encoding
pub const ENCODED_LENGTH: usize = ROOT_COUNT * HASH_LENGTH;

/// The six table roots of one committed consensus state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Root of the cycle table
    pub cycle_root: Hash,
    /// Root of the cache table
    pub cache_root: Hash,
    /// Root of the masternode table
    pub masternode_root: Hash,
    /// Root of the vote table
    pub vote_root: Hash,
    /// Root of the rotation (minted block count) table
    pub rotation_root: Hash,
    /// Root of the vote tally table
    pub vote_tally_root: Hash,
}

impl Checkpoint {
    /// Checkpoint of the empty genesis state
    pub const GENESIS: Checkpoint = Checkpoint {
        cycle_root: Hash::ZERO,
        cache_root: Hash::ZERO,
        masternode_root: Hash::ZERO,
        vote_root: Hash::ZERO,
        rotation_root: Hash::ZERO,
        vote_tally_root: Hash::ZERO,
    };

    /// Roots in canonical order: cycle, cache, masternode, vote, rotation, vote tally
    pub fn roots(&self) -> [Hash; ROOT_COUNT] {
        [
            self.cycle_root,
            self.cache_root,
            self.masternode_root,
            self.vote_root,
            self.rotation_root,
            self.vote_tally_root,
        ]
    }

    /// Combined root binding all six tables
    pub fn root(&self) -> Hash {
        let roots = self.roots();
        keccak256_concat(roots.iter().map(Hash::as_bytes))
    }

    /// Canonical binary form for embedding in a block header
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode the canonical binary form; trailing or missing bytes are rejected
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENCODED_LENGTH {
            return Err(ConsensusError::Encoding(format!(
                "checkpoint must be {} bytes, got {}",
                ENCODED_LENGTH,
                bytes.len()
            )));
        }
        Ok(bincode::deserialize(bytes)?)
    }
}
