use std::sync::Arc;

use serde::Serialize;
use tracing::error;

use crate::registration::domain::{AttributeId, Block, BlockId, Participant, ParticipantId};
use crate::registration::store::{BlockStore, CatalogStore, OccupancyStore, StoreError};

/// Default bound on tree depth before a traversal is declared corrupt.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Materialized block tree of one attribute, with occupants on every node.
#[derive(Debug, Clone, Serialize)]
pub struct BlockTree {
    pub attribute_id: AttributeId,
    pub root: BlockNode,
}

impl BlockTree {
    /// Depth-first lookup of a node by id.
    pub fn find(&self, block_id: BlockId) -> Option<&BlockNode> {
        self.root.find(block_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockNode {
    #[serde(flatten)]
    pub block: Block,
    pub occupant_count: usize,
    pub occupants: Vec<Occupant>,
    pub children: Vec<BlockNode>,
}

impl BlockNode {
    pub fn find(&self, block_id: BlockId) -> Option<&BlockNode> {
        if self.block.id == block_id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(block_id))
    }

    pub fn child_names(&self) -> Vec<&str> {
        self.children
            .iter()
            .map(|child| child.block.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occupant {
    pub participant_id: ParticipantId,
    pub email: String,
    pub label: String,
}

impl Occupant {
    fn from_participant(participant: Participant, labels: &[AttributeId]) -> Self {
        let label = labels
            .iter()
            .filter_map(|attribute_id| participant.value(*attribute_id))
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            participant_id: participant.id,
            email: participant.email,
            label,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("corrupted block tree at block {block_id}: {reason}")]
    Structural { block_id: BlockId, reason: String },
}

/// Read-side expansion of a block tree. Takes no locks: occupant counts may be stale
/// relative to in-flight enrollments.
#[derive(Debug)]
pub struct TreeAggregator<S> {
    store: Arc<S>,
    max_depth: usize,
}

impl<S> TreeAggregator<S>
where
    S: BlockStore + OccupancyStore + CatalogStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_max_depth(store, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(store: Arc<S>, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    pub fn load_tree(&self, attribute_id: AttributeId) -> Result<BlockTree, TreeError> {
        let attribute = self
            .store
            .attribute(attribute_id)?
            .ok_or_else(|| StoreError::not_found("attribute", attribute_id))?;
        let event = self
            .store
            .event(attribute.event_id)?
            .ok_or_else(|| StoreError::not_found("event", attribute.event_id))?;

        let root = self.store.root(attribute_id)?;
        if let Some(parent_id) = root.parent_id {
            return Err(self.corrupt(root.id, format!("root points at parent {parent_id}")));
        }

        let root = self.expand(root, &event.label_attributes, 0)?;
        Ok(BlockTree { attribute_id, root })
    }

    fn expand(
        &self,
        block: Block,
        labels: &[AttributeId],
        depth: usize,
    ) -> Result<BlockNode, TreeError> {
        if depth > self.max_depth {
            return Err(self.corrupt(
                block.id,
                format!("depth limit of {} exceeded", self.max_depth),
            ));
        }

        let mut children = Vec::new();
        for child in self.store.children(block.id)? {
            if child.parent_id != Some(block.id) {
                return Err(self.corrupt(
                    child.id,
                    format!("listed under {} but parent is {:?}", block.id, child.parent_id),
                ));
            }
            if child.attribute_id != block.attribute_id {
                return Err(self.corrupt(
                    child.id,
                    format!(
                        "owned by attribute {} inside tree of {}",
                        child.attribute_id, block.attribute_id
                    ),
                ));
            }
            children.push(self.expand(child, labels, depth + 1)?);
        }

        let occupants: Vec<Occupant> = self
            .store
            .occupants(block.attribute_id, &block.id.as_value())?
            .into_iter()
            .map(|participant| Occupant::from_participant(participant, labels))
            .collect();

        children.sort_by(|a, b| {
            a.block
                .created_at
                .cmp(&b.block.created_at)
                .then(a.block.id.cmp(&b.block.id))
        });

        Ok(BlockNode {
            block,
            occupant_count: occupants.len(),
            occupants,
            children,
        })
    }

    fn corrupt(&self, block_id: BlockId, reason: String) -> TreeError {
        error!(%block_id, %reason, "block tree failed structural check");
        TreeError::Structural { block_id, reason }
    }
}
