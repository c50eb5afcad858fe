use std::sync::Arc;

use serde::Serialize;

use crate::registration::domain::{AttributeId, Block, BlockId, ParticipantId};
use crate::registration::store::{BlockStore, OccupancyStore, StoreError};

/// Answers how full a block is and whether one more participant fits.
///
/// Counting is per exact block: occupants of descendants never count against an
/// ancestor's capacity. Answers are advisory; the store's enrollment commit repeats the
/// check atomically.
#[derive(Debug)]
pub struct CapacityOracle<S> {
    store: Arc<S>,
}

impl<S> Clone for CapacityOracle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

/// Admission answer for one block, as exposed to the dispatcher and the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub attribute_id: AttributeId,
    pub block_id: BlockId,
    pub occupied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    pub admissible: bool,
}

impl<S> CapacityOracle<S>
where
    S: BlockStore + OccupancyStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn occupancy_count(&self, block_id: BlockId) -> Result<usize, StoreError> {
        let block = self.load(block_id)?;
        self.count(&block, None)
    }

    pub fn can_admit(&self, block_id: BlockId) -> Result<bool, StoreError> {
        self.can_admit_for(block_id, None)
    }

    /// Like [`CapacityOracle::can_admit`], ignoring the seat `participant` already holds.
    pub fn can_admit_for(
        &self,
        block_id: BlockId,
        participant: Option<ParticipantId>,
    ) -> Result<bool, StoreError> {
        let block = self.load(block_id)?;
        let occupied = self.count(&block, participant)?;
        Ok(admits(&block, occupied))
    }

    /// Admission check scoped to an attribute's tree.
    pub fn admission(
        &self,
        attribute_id: AttributeId,
        block_id: BlockId,
    ) -> Result<Admission, StoreError> {
        let block = self.load(block_id)?;
        if block.attribute_id != attribute_id {
            return Err(StoreError::not_found("block", block_id));
        }

        let occupied = self.count(&block, None)?;
        let remaining = block
            .limit()
            .map(|limit| limit.saturating_sub(u32::try_from(occupied).unwrap_or(u32::MAX)));

        Ok(Admission {
            attribute_id,
            block_id,
            occupied,
            capacity: block.limit(),
            remaining,
            admissible: admits(&block, occupied),
        })
    }

    fn load(&self, block_id: BlockId) -> Result<Block, StoreError> {
        self.store
            .block(block_id)?
            .ok_or_else(|| StoreError::not_found("block", block_id))
    }

    fn count(&self, block: &Block, excluding: Option<ParticipantId>) -> Result<usize, StoreError> {
        self.store
            .count_occupants(block.attribute_id, &block.id.as_value(), excluding)
    }
}

fn admits(block: &Block, occupied: usize) -> bool {
    match block.limit() {
        Some(limit) => occupied < limit as usize,
        None => true,
    }
}
