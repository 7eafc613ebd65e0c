//! The Devote consensus state manager
//!
//! [`DevoteProtocol`] owns the six authenticated tables and is the only way
//! they are mutated or committed:
//!
//! | table      | key                      | value                   |
//! |------------|--------------------------|-------------------------|
//! | masternode | masternode id            | bonded account          |
//! | cache      | masternode ‖ delegator   | delegator               |
//! | vote       | delegator                | masternode id           |
//! | cycle      | `"witness"`              | encoded witness list    |
//! | rotation   | BE cycle ‖ witness       | BE mint count           |
//! | vote tally | masternode id            | BE delegator count      |
//!
//! Cache entries exist exactly when the matching vote does, and the tally of
//! a masternode equals the number of its cache entries.

use crate::checkpoint::Checkpoint;
use crate::constants::WITNESS_KEY;
use crate::keys::{cache_key, decode_count, encode_count};
use crate::{namespaces, ConsensusError, Masternode, Result};
use devote_core::{
    Address, AuthenticatedMap, Database, Hash, MasternodeId, MerkleMap, Table, TrieError,
};
use std::sync::Arc;
use tracing::{debug, info};

/// The six tables, kept together so they are always opened, copied and
/// committed as one unit
#[derive(Debug, Clone)]
pub(crate) struct StateMaps {
    pub(crate) cycle: MerkleMap,
    pub(crate) cache: MerkleMap,
    pub(crate) masternode: MerkleMap,
    pub(crate) vote: MerkleMap,
    pub(crate) rotation: MerkleMap,
    pub(crate) vote_tally: MerkleMap,
}

impl StateMaps {
    fn open(db: &Arc<dyn Database>, checkpoint: &Checkpoint) -> Result<Self> {
        let open = |root: Hash, namespace: &str| {
            MerkleMap::open(root, Table::new(db.clone(), namespace))
        };

        Ok(Self {
            cycle: open(checkpoint.cycle_root, namespaces::CYCLE)?,
            cache: open(checkpoint.cache_root, namespaces::CACHE)?,
            masternode: open(checkpoint.masternode_root, namespaces::MASTERNODE)?,
            vote: open(checkpoint.vote_root, namespaces::VOTE)?,
            rotation: open(checkpoint.rotation_root, namespaces::ROTATION)?,
            vote_tally: open(checkpoint.vote_tally_root, namespaces::VOTE_TALLY)?,
        })
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            cycle_root: self.cycle.root(),
            cache_root: self.cache.root(),
            masternode_root: self.masternode.root(),
            vote_root: self.vote.root(),
            rotation_root: self.rotation.root(),
            vote_tally_root: self.vote_tally.root(),
        }
    }

    fn commit(&mut self) -> Result<Checkpoint> {
        Ok(Checkpoint {
            cycle_root: self.cycle.commit()?,
            cache_root: self.cache.commit()?,
            masternode_root: self.masternode.commit()?,
            vote_root: self.vote.commit()?,
            rotation_root: self.rotation.commit()?,
            vote_tally_root: self.vote_tally.commit()?,
        })
    }
}

/// A saved copy of all six tables, restorable with
/// [`DevoteProtocol::revert_to_snapshot`]
///
/// The copy shares only committed, immutable state with the manager, so
/// changes made on either side after the snapshot never leak into the other.
#[derive(Debug, Clone)]
pub struct DevoteSnapshot {
    maps: StateMaps,
}

impl DevoteSnapshot {
    /// Checkpoint of the state captured by this snapshot
    pub fn checkpoint(&self) -> Checkpoint {
        self.maps.checkpoint()
    }
}

/// Consensus state manager for one block's processing
#[derive(Debug)]
pub struct DevoteProtocol {
    pub(crate) maps: StateMaps,
    db: Arc<dyn Database>,
}

impl DevoteProtocol {
    /// Empty state, used for genesis
    pub fn new(db: Arc<dyn Database>) -> Result<Self> {
        Self::from_checkpoint(db, &Checkpoint::GENESIS)
    }

    /// Reopen the state committed as `checkpoint`
    ///
    /// Fails with a storage error when any of the six roots is not present
    /// in `db`.
    pub fn from_checkpoint(db: Arc<dyn Database>, checkpoint: &Checkpoint) -> Result<Self> {
        let maps = StateMaps::open(&db, checkpoint)?;
        debug!("Opened devote state at {}", checkpoint.root());
        Ok(Self { maps, db })
    }

    /// Reopen every table at `checkpoint`, discarding uncommitted changes
    pub fn reload(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.maps = StateMaps::open(&self.db, checkpoint)?;
        Ok(())
    }

    /// The shared database the tables commit to
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    // ---- registration ----

    /// Register a masternode, rebinding its id if it was already registered
    pub fn register(&mut self, masternode: &Masternode) -> Result<()> {
        self.maps
            .masternode
            .put(masternode.id.as_bytes(), masternode.account.as_bytes())?;
        debug!("Registered masternode {} for {}", masternode.id, masternode.account);
        Ok(())
    }

    /// Remove a masternode together with every vote cast for it
    ///
    /// Removing an id that is not registered is not an error.
    pub fn unregister(&mut self, id: &MasternodeId) -> Result<()> {
        ignore_missing(self.maps.masternode.delete(id.as_bytes()))?;

        let delegators: Vec<Vec<u8>> = self
            .maps
            .cache
            .iter_prefix(id.as_bytes())
            .map(|(_, delegator)| delegator.to_vec())
            .collect();

        for delegator in &delegators {
            ignore_missing(self.maps.cache.delete(&cache_key(id, delegator)))?;

            let vote = self.maps.vote.get(delegator)?;
            if vote.as_deref() == Some(id.as_bytes()) {
                ignore_missing(self.maps.vote.delete(delegator))?;
            }
        }

        ignore_missing(self.maps.vote_tally.delete(id.as_bytes()))?;

        debug!(
            "Unregistered masternode {} and dropped {} delegations",
            id,
            delegators.len()
        );
        Ok(())
    }

    /// Unregister every masternode bonded by `account`
    ///
    /// Returns the ids that were removed.
    pub fn unregister_account(&mut self, account: &Address) -> Result<Vec<MasternodeId>> {
        let ids = self
            .maps
            .masternode
            .iter_prefix(&[])
            .filter(|(_, bonded)| *bonded == account.as_bytes())
            .map(|(id, _)| MasternodeId::try_from(id))
            .collect::<std::result::Result<Vec<_>, TrieError>>()?;

        for id in &ids {
            self.unregister(id)?;
        }
        Ok(ids)
    }

    // ---- delegation ----

    /// Point `delegator`'s vote at `masternode`, replacing any previous vote
    pub fn delegate(&mut self, delegator: &Address, masternode: &MasternodeId) -> Result<()> {
        if !self.is_masternode(masternode)? {
            return Err(ConsensusError::InvalidTarget(*masternode));
        }

        let previous = self.vote_of(delegator)?;
        if let Some(old) = previous.filter(|old| old != masternode) {
            ignore_missing(self.maps.cache.delete(&cache_key(&old, delegator.as_bytes())))?;
            self.decrement_tally(&old)?;
        }

        self.maps.cache.put(
            &cache_key(masternode, delegator.as_bytes()),
            delegator.as_bytes(),
        )?;
        self.maps
            .vote
            .put(delegator.as_bytes(), masternode.as_bytes())?;

        if previous != Some(*masternode) {
            self.increment_tally(masternode)?;
        }

        debug!("Delegator {} now votes for {}", delegator, masternode);
        Ok(())
    }

    /// Withdraw `delegator`'s vote for `masternode`
    pub fn undelegate(&mut self, delegator: &Address, masternode: &MasternodeId) -> Result<()> {
        if !self.is_masternode(masternode)? {
            return Err(ConsensusError::InvalidTarget(*masternode));
        }

        let current = self.vote_of(delegator)?;
        if current != Some(*masternode) {
            return Err(ConsensusError::Mismatch {
                delegator: *delegator,
                current,
                requested: *masternode,
            });
        }

        self.maps
            .cache
            .delete(&cache_key(masternode, delegator.as_bytes()))?;
        self.maps.vote.delete(delegator.as_bytes())?;
        self.decrement_tally(masternode)?;

        debug!("Delegator {} withdrew its vote for {}", delegator, masternode);
        Ok(())
    }

    fn increment_tally(&mut self, masternode: &MasternodeId) -> Result<()> {
        let count = self.vote_tally(masternode)?.saturating_add(1);
        self.maps
            .vote_tally
            .put(masternode.as_bytes(), &encode_count(count))?;
        Ok(())
    }

    fn decrement_tally(&mut self, masternode: &MasternodeId) -> Result<()> {
        match self.vote_tally(masternode)? {
            0 => Ok(()),
            1 => Ok(ignore_missing(self.maps.vote_tally.delete(masternode.as_bytes()))?),
            count => Ok(self
                .maps
                .vote_tally
                .put(masternode.as_bytes(), &encode_count(count - 1))?),
        }
    }

    // ---- witnesses ----

    /// Store the block-producer schedule of the active cycle
    pub fn set_witnesses(&mut self, witnesses: &[Address]) -> Result<()> {
        let encoded = bincode::serialize(witnesses)?;
        self.maps.cycle.put(WITNESS_KEY, &encoded)?;
        debug!("Set {} witnesses", witnesses.len());
        Ok(())
    }

    /// The block-producer schedule; empty until one has been set
    pub fn witnesses(&self) -> Result<Vec<Address>> {
        match self.maps.cycle.get(WITNESS_KEY)? {
            Some(encoded) => Ok(bincode::deserialize(&encoded)?),
            None => Ok(Vec::new()),
        }
    }

    // ---- queries ----

    /// Whether `id` is a registered masternode
    pub fn is_masternode(&self, id: &MasternodeId) -> Result<bool> {
        Ok(self.maps.masternode.get(id.as_bytes())?.is_some())
    }

    /// Account bonded by a registered masternode
    pub fn masternode_account(&self, id: &MasternodeId) -> Result<Option<Address>> {
        self.maps
            .masternode
            .get(id.as_bytes())?
            .map(|bytes| Address::try_from(bytes.as_slice()))
            .transpose()
            .map_err(ConsensusError::from)
    }

    /// Every registered masternode, ordered by id
    pub fn masternodes(&self) -> Result<Vec<Masternode>> {
        self.maps
            .masternode
            .iter_prefix(&[])
            .map(|(id, account)| -> Result<Masternode> {
                Ok(Masternode {
                    id: MasternodeId::try_from(id)?,
                    account: Address::try_from(account)?,
                })
            })
            .collect()
    }

    /// The masternode `delegator` currently votes for
    pub fn vote_of(&self, delegator: &Address) -> Result<Option<MasternodeId>> {
        self.maps
            .vote
            .get(delegator.as_bytes())?
            .map(|bytes| MasternodeId::try_from(bytes.as_slice()))
            .transpose()
            .map_err(ConsensusError::from)
    }

    /// Every delegator voting for `masternode`, ordered by address
    pub fn delegators(&self, masternode: &MasternodeId) -> Result<Vec<Address>> {
        self.maps
            .cache
            .iter_prefix(masternode.as_bytes())
            .map(|(_, delegator)| Address::try_from(delegator))
            .collect::<std::result::Result<Vec<_>, TrieError>>()
            .map_err(ConsensusError::from)
    }

    /// Number of delegators voting for `masternode`
    pub fn vote_tally(&self, masternode: &MasternodeId) -> Result<u64> {
        match self.maps.vote_tally.get(masternode.as_bytes())? {
            Some(bytes) => decode_count(&bytes),
            None => Ok(0),
        }
    }

    // ---- roots, commit, snapshots ----

    /// Roots of the current state, including uncommitted changes
    pub fn checkpoint(&self) -> Checkpoint {
        self.maps.checkpoint()
    }

    /// Combined root of the current state
    pub fn root(&self) -> Hash {
        self.checkpoint().root()
    }

    /// Check the current state against the root declared in a block header
    pub fn verify_root(&self, expected: &Hash) -> Result<()> {
        let actual = self.root();
        if actual != *expected {
            return Err(ConsensusError::RootMismatch {
                expected: *expected,
                actual,
            });
        }
        Ok(())
    }

    /// Persist all six tables and return the new checkpoint
    ///
    /// Each table commit is atomic on its own. When one fails the error is
    /// returned and the block must be rejected; tables committed before it
    /// only added content-addressed entries, which no checkpoint refers to.
    pub fn commit(&mut self) -> Result<Checkpoint> {
        let checkpoint = self.maps.commit()?;
        info!("Committed devote state {}", checkpoint.root());
        Ok(checkpoint)
    }

    /// Save the current state for a later [`DevoteProtocol::revert_to_snapshot`]
    pub fn snapshot(&self) -> DevoteSnapshot {
        DevoteSnapshot {
            maps: self.maps.clone(),
        }
    }

    /// Discard every change made since `snapshot` was taken
    pub fn revert_to_snapshot(&mut self, snapshot: DevoteSnapshot) {
        debug!("Reverting devote state to {}", snapshot.checkpoint().root());
        self.maps = snapshot.maps;
    }

    // ---- read-only table access ----

    /// Registered masternodes, keyed by id
    pub fn masternode_map(&self) -> &MerkleMap {
        &self.maps.masternode
    }

    /// Reverse delegation index, masternode then delegator
    pub fn cache_map(&self) -> &MerkleMap {
        &self.maps.cache
    }

    /// Delegations, keyed by delegator
    pub fn vote_map(&self) -> &MerkleMap {
        &self.maps.vote
    }

    /// Witness schedule of the active cycle
    pub fn cycle_map(&self) -> &MerkleMap {
        &self.maps.cycle
    }

    /// Blocks minted per cycle and witness
    pub fn rotation_map(&self) -> &MerkleMap {
        &self.maps.rotation
    }

    /// Delegator count per masternode
    pub fn vote_tally_map(&self) -> &MerkleMap {
        &self.maps.vote_tally
    }
}

/// Treat an absent entry as already removed
fn ignore_missing(result: devote_core::Result<()>) -> devote_core::Result<()> {
    match result {
        Err(TrieError::NotFound(_)) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devote_core::MemoryDatabase;

    fn state() -> DevoteProtocol {
        DevoteProtocol::new(MemoryDatabase::shared()).unwrap()
    }

    fn node(n: u8) -> Masternode {
        Masternode::new(MasternodeId([n; 8]), Address([0xa0 | n; 20]))
    }

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    #[test]
    fn test_genesis_root_is_all_zero_checkpoint() {
        let state = state();
        assert_eq!(state.checkpoint(), Checkpoint::GENESIS);
        assert_eq!(state.root(), Checkpoint::GENESIS.root());
    }

    #[test]
    fn test_register_rebinds_account() {
        let mut state = state();
        let first = node(1);
        state.register(&first).unwrap();
        state
            .register(&Masternode::new(first.id, addr(9)))
            .unwrap();

        assert_eq!(state.masternode_account(&first.id).unwrap(), Some(addr(9)));
        assert_eq!(state.masternodes().unwrap().len(), 1);
    }

    #[test]
    fn test_redelegation_moves_tally() {
        let mut state = state();
        let (a, b) = (node(1), node(2));
        state.register(&a).unwrap();
        state.register(&b).unwrap();

        state.delegate(&addr(7), &a.id).unwrap();
        state.delegate(&addr(7), &a.id).unwrap();
        assert_eq!(state.vote_tally(&a.id).unwrap(), 1);

        state.delegate(&addr(7), &b.id).unwrap();
        assert_eq!(state.vote_tally(&a.id).unwrap(), 0);
        assert_eq!(state.vote_tally(&b.id).unwrap(), 1);
        assert!(state.delegators(&a.id).unwrap().is_empty());
        assert_eq!(state.delegators(&b.id).unwrap(), vec![addr(7)]);
    }

    #[test]
    fn test_undelegate_without_vote_is_mismatch() {
        let mut state = state();
        let a = node(1);
        state.register(&a).unwrap();

        let err = state.undelegate(&addr(7), &a.id).unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::Mismatch { current: None, .. }
        ));
    }

    #[test]
    fn test_witnesses_default_to_empty_and_round_trip() {
        let mut state = state();
        assert!(state.witnesses().unwrap().is_empty());

        let schedule = vec![addr(3), addr(1), addr(2)];
        state.set_witnesses(&schedule).unwrap();
        assert_eq!(state.witnesses().unwrap(), schedule);
    }

    #[test]
    fn test_unregister_account_removes_every_bonded_node() {
        let mut state = state();
        let account = addr(5);
        state.register(&Masternode::new(MasternodeId([1; 8]), account)).unwrap();
        state.register(&Masternode::new(MasternodeId([2; 8]), account)).unwrap();
        state.register(&node(3)).unwrap();

        let removed = state.unregister_account(&account).unwrap();
        assert_eq!(removed, vec![MasternodeId([1; 8]), MasternodeId([2; 8])]);
        assert_eq!(state.masternodes().unwrap(), vec![node(3)]);
    }

    #[test]
    fn test_verify_root() {
        let mut state = state();
        let genesis = state.root();
        state.register(&node(1)).unwrap();

        assert!(state.verify_root(&state.root()).is_ok());
        assert!(matches!(
            state.verify_root(&genesis),
            Err(ConsensusError::RootMismatch { .. })
        ));
    }
}
