//! Hashing helpers
//!
//! Every root and digest in the consensus state is keccak-256.

use crate::Hash;
use sha3::{Digest, Keccak256};

/// Keccak-256 of a single byte string
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Keccak-256 of the concatenation of `parts`, without allocating it
pub fn keccak256_concat<'a, I>(parts: I) -> Hash
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}
