//! On-disk node state
//!
//! A node directory holds two files: the content-addressed state database and
//! a small JSON head naming the latest committed checkpoint. Blocks are
//! applied all or nothing; the head only advances once the new state has been
//! committed.
//!
//! Each block appends the nodes it created to the database file, then
//! replaces the head. A crash between the two leaves the old head pointing at
//! state that is still complete.

use crate::config::NodeConfig;
use crate::{NodeError, Result};
use devote_consensus::{process_block, Checkpoint, ConsensusError, DevoteOp, DevoteProtocol};
use devote_core::database::write_file_atomic;
use devote_core::{Database, Hash, MemoryDatabase};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Latest committed state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    /// Number of blocks applied since init
    pub height: u64,
    /// Combined root of `checkpoint`
    pub root: Hash,
    /// Per-table roots the head was committed with
    pub checkpoint: Checkpoint,
}

impl Head {
    /// Head of a freshly initialized node
    pub fn genesis() -> Self {
        Self {
            height: 0,
            root: Checkpoint::GENESIS.root(),
            checkpoint: Checkpoint::GENESIS,
        }
    }

    fn advance(&self, checkpoint: Checkpoint) -> Self {
        Self {
            height: self.height + 1,
            root: checkpoint.root(),
            checkpoint,
        }
    }
}

/// State database plus head, backed by a node directory
#[derive(Debug)]
pub struct NodeStore {
    config: NodeConfig,
    db: Arc<MemoryDatabase>,
    head: Head,
}

impl NodeStore {
    /// Create a new node directory at genesis
    ///
    /// Refuses to overwrite an existing node unless `force` is set.
    pub fn init(config: NodeConfig, force: bool) -> Result<Self> {
        config.validate()?;
        let head_path = config.head_path();
        if head_path.exists() && !force {
            return Err(NodeError::AlreadyInitialized(config.data_dir));
        }

        let store = Self {
            config,
            db: MemoryDatabase::shared(),
            head: Head::genesis(),
        };
        store.save()?;
        info!("Initialized devote node at {}", store.config.data_dir.display());
        Ok(store)
    }

    /// Open an existing node directory
    pub fn open(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let head_path = config.head_path();
        if !head_path.exists() {
            return Err(NodeError::NotInitialized(head_path));
        }

        let head: Head = serde_json::from_str(&std::fs::read_to_string(&head_path)?)?;
        let actual = head.checkpoint.root();
        if actual != head.root {
            return Err(ConsensusError::RootMismatch {
                expected: head.root,
                actual,
            }
            .into());
        }

        let database_path = config.database_path();
        let db = if database_path.exists() {
            MemoryDatabase::load_from_file(&database_path)?
        } else {
            MemoryDatabase::new()
        };

        let store = Self {
            config,
            db: Arc::new(db),
            head,
        };
        // every root of the head must resolve in the database
        store.state()?;
        debug!("Opened node at height {} ({})", store.head.height, store.head.root);
        Ok(store)
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Latest committed head
    pub fn head(&self) -> &Head {
        &self.head
    }

    /// Consensus state at the head
    pub fn state(&self) -> Result<DevoteProtocol> {
        let db: Arc<dyn Database> = self.db.clone();
        Ok(DevoteProtocol::from_checkpoint(db, &self.head.checkpoint)?)
    }

    /// Apply one block of operations on top of the head and persist it
    ///
    /// When `declared_root` is given the block is only accepted if the
    /// resulting combined root matches it.
    pub fn apply_block(&mut self, ops: &[DevoteOp], declared_root: Option<&Hash>) -> Result<Head> {
        let checkpoint = match declared_root {
            Some(root) => {
                let db: Arc<dyn Database> = self.db.clone();
                process_block(db, &self.head.checkpoint, ops, root)?
            }
            None => {
                let mut state = self.state()?;
                state.apply_block(ops)?;
                state.commit()?
            }
        };

        let head = self.head.advance(checkpoint);
        let appended = self.db.append_to_file(&self.config.database_path())?;
        self.write_head(&head)?;
        self.head = head;
        debug!("Appended {} database records", appended);
        info!(
            "Applied {} operations, height {} root {}",
            ops.len(),
            self.head.height,
            self.head.root
        );
        Ok(self.head)
    }

    /// Rewrite the database file in full, then the head
    ///
    /// Blocks only append to the database file; this compacts away the records
    /// that later writes have superseded.
    pub fn save(&self) -> Result<()> {
        self.db.save_to_file(&self.config.database_path())?;
        self.write_head(&self.head)
    }

    fn write_head(&self, head: &Head) -> Result<()> {
        write_file_atomic(
            &self.config.head_path(),
            serde_json::to_string_pretty(head)?.as_bytes(),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_head() {
        let head = Head::genesis();
        assert_eq!(head.height, 0);
        assert_eq!(head.root, Checkpoint::GENESIS.root());
    }

    #[test]
    fn test_advance_tracks_root() {
        let checkpoint = Checkpoint {
            vote_root: Hash([9; 32]),
            ..Checkpoint::GENESIS
        };
        let next = Head::genesis().advance(checkpoint);
        assert_eq!(next.height, 1);
        assert_eq!(next.root, checkpoint.root());
    }
}
