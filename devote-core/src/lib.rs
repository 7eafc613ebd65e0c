//! Devote Core - storage primitives for the masternode consensus state
//!
//! This crate provides the fixed-width identifiers used across the consensus
//! layer, a namespaced key-value database, and the authenticated map that
//! every consensus table is built on.

pub mod crypto;
pub mod database;
pub mod error;
pub mod trie;
pub mod types;

pub use crypto::keccak256;
pub use database::{Database, MemoryDatabase, Table};
pub use error::TrieError;
pub use trie::{AuthenticatedMap, MerkleMap};
pub use types::{Address, Hash, MasternodeId, ADDRESS_LENGTH, HASH_LENGTH, MASTERNODE_ID_LENGTH};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, TrieError>;

/// Devote core version
pub const DEVOTE_CORE_VERSION: &str = "0.1.0";
