//! Masternode registration record

use devote_core::{Address, MasternodeId};
use serde::{Deserialize, Serialize};

/// A bonded masternode: its identifier and the account that bonds it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Masternode {
    /// Identifier the masternode registers and is voted for under
    pub id: MasternodeId,

    /// Bonded account address
    pub account: Address,
}

impl Masternode {
    /// Bind `id` to `account`
    pub fn new(id: MasternodeId, account: Address) -> Self {
        Self { id, account }
    }
}
