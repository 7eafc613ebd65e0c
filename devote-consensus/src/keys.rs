//! Key and value layouts of the consensus tables

use crate::{ConsensusError, Result};
use devote_core::{Address, MasternodeId};

/// Cache key: `masternode ‖ delegator`
pub(crate) fn cache_key(masternode: &MasternodeId, delegator: &[u8]) -> Vec<u8> {
    [masternode.as_bytes(), delegator].concat()
}

/// Rotation key: `BE u64 cycle ‖ witness`
pub(crate) fn rotation_key(cycle: u64, witness: &Address) -> Vec<u8> {
    [cycle.to_be_bytes().as_slice(), witness.as_bytes()].concat()
}

pub(crate) fn encode_count(count: u64) -> [u8; 8] {
    count.to_be_bytes()
}

pub(crate) fn decode_count(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ConsensusError::Encoding(format!("counter must be 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}
