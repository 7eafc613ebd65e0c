//! Error types for storage and authenticated map operations

use crate::Hash;
use thiserror::Error;

/// Failure of a database or authenticated map operation
#[derive(Error, Debug)]
pub enum TrieError {
    /// The key is absent from the map
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// No state is stored for the requested root
    #[error("Missing state for root {0}")]
    MissingRoot(Hash),

    /// Stored state does not hash to the root it was stored under
    #[error("Corrupted state: expected root {expected}, got {actual}")]
    Corrupted { expected: Hash, actual: Hash },

    /// Stored bytes could not be decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The database itself failed
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for TrieError {
    fn from(err: bincode::Error) -> Self {
        TrieError::Encoding(err.to_string())
    }
}

impl TrieError {
    /// Whether this error only reports an absent entry
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrieError::NotFound(_))
    }
}
