//! Per-cycle mint accounting for witnesses
//!
//! Every block bumps its witness's mint count for the block's cycle. Counts
//! start again at 1 whenever the block opens a new cycle; counts of earlier
//! cycles are kept untouched, so the rotation table holds one family of keys
//! per cycle. Witnesses that fall behind their slot show up as low counts.

use crate::constants::CYCLE_INTERVAL;
use crate::keys::{decode_count, encode_count, rotation_key};
use crate::protocol::DevoteProtocol;
use crate::Result;
use devote_core::{Address, AuthenticatedMap};
use tracing::debug;

/// Cycle a block timestamp falls into
pub fn cycle_of(timestamp: u64) -> u64 {
    timestamp / CYCLE_INTERVAL
}

impl DevoteProtocol {
    /// Record that `witness` minted the block at `current_timestamp`
    ///
    /// Returns the witness's mint count for the block's cycle after the
    /// update.
    pub fn rolling(
        &mut self,
        parent_timestamp: u64,
        current_timestamp: u64,
        witness: &Address,
    ) -> Result<u64> {
        let parent_cycle = cycle_of(parent_timestamp);
        let new_cycle = cycle_of(current_timestamp);

        let mut count = 1;
        if parent_cycle == new_cycle
            && self.maps.rotation.has_prefix(&parent_cycle.to_be_bytes())
        {
            count = self.mint_count(parent_cycle, witness)?.saturating_add(1);
        }

        self.maps
            .rotation
            .put(&rotation_key(new_cycle, witness), &encode_count(count))?;

        debug!(
            "Witness {} minted {} blocks in cycle {}",
            witness, count, new_cycle
        );
        Ok(count)
    }

    /// Blocks minted by `witness` during `cycle`
    pub fn mint_count(&self, cycle: u64, witness: &Address) -> Result<u64> {
        match self.maps.rotation.get(&rotation_key(cycle, witness))? {
            Some(bytes) => decode_count(&bytes),
            None => Ok(0),
        }
    }

    /// Mint counts of every witness that minted during `cycle`
    pub fn cycle_mint_counts(&self, cycle: u64) -> Result<Vec<(Address, u64)>> {
        let prefix = cycle.to_be_bytes();
        self.maps
            .rotation
            .iter_prefix(&prefix)
            .map(|(key, value)| -> Result<(Address, u64)> {
                let witness = Address::try_from(&key[prefix.len()..])?;
                Ok((witness, decode_count(value)?))
            })
            .collect()
    }
}
