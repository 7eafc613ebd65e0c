//! Applying a block's consensus operations
//!
//! The block pipeline reopens the state at the parent checkpoint, applies the
//! block's operations in order, checks the resulting combined root against
//! the header and only then commits.

use crate::checkpoint::Checkpoint;
use crate::protocol::DevoteProtocol;
use crate::{ConsensusError, Masternode, Result};
use devote_core::{Address, Database, Hash, MasternodeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One consensus-affecting operation carried by a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DevoteOp {
    Register {
        id: MasternodeId,
        account: Address,
    },
    Unregister {
        id: MasternodeId,
    },
    /// Unregister every masternode bonded by an account
    UnregisterAccount {
        account: Address,
    },
    Delegate {
        delegator: Address,
        masternode: MasternodeId,
    },
    #[serde(rename = "undelegate")]
    UnDelegate {
        delegator: Address,
        masternode: MasternodeId,
    },
    SetWitnesses {
        witnesses: Vec<Address>,
    },
    /// Mint accounting for the block's producer
    Rolling {
        parent_timestamp: u64,
        timestamp: u64,
        witness: Address,
    },
}

impl DevoteProtocol {
    /// Apply a single operation
    pub fn apply(&mut self, op: &DevoteOp) -> Result<()> {
        match op {
            DevoteOp::Register { id, account } => self.register(&Masternode::new(*id, *account)),
            DevoteOp::Unregister { id } => self.unregister(id),
            DevoteOp::UnregisterAccount { account } => self.unregister_account(account).map(|_| ()),
            DevoteOp::Delegate {
                delegator,
                masternode,
            } => self.delegate(delegator, masternode),
            DevoteOp::UnDelegate {
                delegator,
                masternode,
            } => self.undelegate(delegator, masternode),
            DevoteOp::SetWitnesses { witnesses } => self.set_witnesses(witnesses),
            DevoteOp::Rolling {
                parent_timestamp,
                timestamp,
                witness,
            } => self
                .rolling(*parent_timestamp, *timestamp, witness)
                .map(|_| ()),
        }
    }

    /// Apply `ops` in order, all or nothing
    ///
    /// On the first failure every change made by earlier operations is
    /// reverted and the failure is returned with its index.
    pub fn apply_block(&mut self, ops: &[DevoteOp]) -> Result<()> {
        let snapshot = self.snapshot();

        for (index, op) in ops.iter().enumerate() {
            if let Err(err) = self.apply(op) {
                warn!("Block operation {} failed, reverting: {}", index, err);
                self.revert_to_snapshot(snapshot);
                return Err(ConsensusError::InvalidOperation {
                    index,
                    source: Box::new(err),
                });
            }
        }
        Ok(())
    }
}

/// Process one block's consensus operations on top of `parent`
///
/// Nothing is persisted unless every operation succeeds and the resulting
/// combined root equals `declared_root`.
pub fn process_block(
    db: Arc<dyn Database>,
    parent: &Checkpoint,
    ops: &[DevoteOp],
    declared_root: &Hash,
) -> Result<Checkpoint> {
    let mut state = DevoteProtocol::from_checkpoint(db, parent)?;
    state.apply_block(ops)?;

    if let Err(err) = state.verify_root(declared_root) {
        warn!("Rejecting block: {}", err);
        return Err(err);
    }

    let checkpoint = state.commit()?;
    info!(
        "Processed {} devote operations, new state {}",
        ops.len(),
        checkpoint.root()
    );
    Ok(checkpoint)
}
