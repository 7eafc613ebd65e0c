//! Devote node
//!
//! File-backed driver for the devote consensus state: a configuration layer,
//! a store that keeps the state database and the latest checkpoint on disk,
//! and the `devote` command-line tool built on top of both.

pub mod config;
pub mod store;

pub use config::NodeConfig;
pub use store::{Head, NodeStore};

use devote_consensus::ConsensusError;
use devote_core::TrieError;
use std::path::PathBuf;

/// Node errors
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Node is not initialized: {0} does not exist")]
    NotInitialized(PathBuf),

    #[error("Node is already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Storage error: {0}")]
    Storage(#[from] TrieError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Get default configuration directory
pub fn get_default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".devote")
}
