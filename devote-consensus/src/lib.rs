//! Devote Consensus - masternode state layer
//!
//! Tracks masternode registration, delegator votes, the block-producer
//! rotation and per-cycle mint counts. The six tables are committed together
//! and bound into one combined root that every block header carries.

pub mod block;
pub mod checkpoint;
pub mod error;
mod keys;
pub mod masternode;
pub mod protocol;
pub mod rolling;

pub use block::{process_block, DevoteOp};
pub use checkpoint::Checkpoint;
pub use error::ConsensusError;
pub use masternode::Masternode;
pub use protocol::{DevoteProtocol, DevoteSnapshot};
pub use rolling::cycle_of;

pub use devote_core::{Address, Hash, MasternodeId};

/// Result type for consensus operations
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Devote protocol version
pub const DEVOTE_VERSION: &str = "0.1.0";

/// Protocol constants
pub mod constants {
    /// Length of one rotation cycle, in block timestamp units
    pub const CYCLE_INTERVAL: u64 = 3600;

    /// Key of the witness schedule inside the cycle table
    pub const WITNESS_KEY: &[u8] = b"witness";
}

/// Key namespaces of the six tables inside the shared database
pub mod namespaces {
    /// Witness schedule of the active cycle
    pub const CYCLE: &str = "cycle-";
    /// Reverse delegation index, masternode then delegator
    pub const CACHE: &str = "cache-";
    /// Delegator to masternode
    pub const VOTE: &str = "vote-";
    /// Masternode id to bonded account
    pub const MASTERNODE: &str = "masternode-";
    /// Blocks minted per cycle and witness
    pub const ROTATION: &str = "mintCnt-";
    /// Delegator count per masternode
    pub const VOTE_TALLY: &str = "voteCnt-";

    /// Every namespace, in checkpoint order
    pub const ALL: [&str; 6] = [CYCLE, CACHE, MASTERNODE, VOTE, ROTATION, VOTE_TALLY];
}
