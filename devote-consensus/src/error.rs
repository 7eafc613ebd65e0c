//! Error types for the consensus state

use devote_core::{Address, Hash, MasternodeId, TrieError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    /// A looked-up entry is absent
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// A delegation names a masternode that is not registered
    #[error("Invalid masternode target: {0}")]
    InvalidTarget(MasternodeId),

    /// An undelegation names a masternode the delegator does not vote for
    #[error("Masternode mismatch for delegator {delegator}: votes for {current:?}, requested {requested}")]
    Mismatch {
        delegator: Address,
        current: Option<MasternodeId>,
        requested: MasternodeId,
    },

    /// A stored value or key could not be decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The state database failed or is missing committed state
    #[error("Storage error: {0}")]
    Storage(String),

    /// The committed state disagrees with the root declared in a header
    #[error("State root mismatch: expected {expected}, got {actual}")]
    RootMismatch { expected: Hash, actual: Hash },

    #[error("Block operation {index} failed: {source}")]
    InvalidOperation {
        index: usize,
        #[source]
        source: Box<ConsensusError>,
    },
}

impl From<TrieError> for ConsensusError {
    fn from(err: TrieError) -> Self {
        match err {
            TrieError::NotFound(key) => ConsensusError::NotFound(key),
            TrieError::Encoding(msg) => ConsensusError::Encoding(msg),
            other => ConsensusError::Storage(other.to_string()),
        }
    }
}

impl From<bincode::Error> for ConsensusError {
    fn from(err: bincode::Error) -> Self {
        ConsensusError::Encoding(err.to_string())
    }
}
