use std::sync::Arc;

use tracing::info;

use crate::registration::domain::{
    Attribute, AttributeDraft, AttributeId, AttributeType, Block, BlockDraft, BlockId, BlockPatch,
    Event, EventId, Form, FormDraft, NotificationTrigger, TriggerCondition,
};
use crate::registration::store::{BlockStore, CatalogStore, StoreError, TreeChange};

/// Error raised by administrative catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("attribute {0} is not block-typed")]
    NotBlockTyped(AttributeId),
    #[error("block {0} is the root of its tree and cannot be removed on its own")]
    RootRemoval(BlockId),
    #[error("attribute {attribute_id} does not belong to event {event_id}")]
    ForeignAttribute {
        attribute_id: AttributeId,
        event_id: EventId,
    },
}

/// Administrative operations over events, attributes, forms and block trees.
///
/// Owns the root-block lifecycle: declaring a block attribute creates its root, changing
/// the type away from block discards the tree, and changing it back starts a fresh one.
#[derive(Debug)]
pub struct AttributeCatalog<S> {
    store: Arc<S>,
}

impl<S> AttributeCatalog<S>
where
    S: BlockStore + CatalogStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn create_event(&self, name: &str) -> Result<Event, CatalogError> {
        Ok(self.store.insert_event(name)?)
    }

    /// Configure which attributes label an occupant in the tree view, in display order.
    pub fn set_label_attributes(
        &self,
        event_id: EventId,
        attributes: Vec<AttributeId>,
    ) -> Result<Event, CatalogError> {
        let mut event = self.event(event_id)?;
        for attribute_id in &attributes {
            self.owned_attribute(event_id, *attribute_id)?;
        }
        event.label_attributes = attributes;
        self.store.update_event(event.clone())?;
        Ok(event)
    }

    pub fn add_trigger(
        &self,
        event_id: EventId,
        trigger: NotificationTrigger,
    ) -> Result<Event, CatalogError> {
        let mut event = self.event(event_id)?;
        match &trigger.condition {
            TriggerCondition::FormSubmitted { form_id } => {
                self.store
                    .form(*form_id)?
                    .filter(|form| form.event_id == event_id)
                    .ok_or_else(|| StoreError::not_found("form", form_id))?;
            }
            TriggerCondition::BlockAdmitted { attribute_id, .. } => {
                let attribute = self.owned_attribute(event_id, *attribute_id)?;
                if !attribute.attribute_type.is_block() {
                    return Err(CatalogError::NotBlockTyped(attribute.id));
                }
            }
        }
        event.triggers.push(trigger);
        self.store.update_event(event.clone())?;
        Ok(event)
    }

    pub fn declare_attribute(
        &self,
        event_id: EventId,
        draft: AttributeDraft,
    ) -> Result<Attribute, CatalogError> {
        let attribute = self.store.insert_attribute(event_id, draft)?;
        if attribute.attribute_type.is_block() {
            self.plant_root(&attribute)?;
        }
        Ok(attribute)
    }

    /// Change an attribute's declared type and options, keeping the block-root invariant.
    pub fn change_attribute_type(
        &self,
        attribute_id: AttributeId,
        attribute_type: AttributeType,
        options: Vec<String>,
    ) -> Result<Attribute, CatalogError> {
        let mut attribute = self.attribute(attribute_id)?;
        attribute.attribute_type = attribute_type;
        attribute.options = options;

        match self.store.retype_attribute(attribute.clone())? {
            TreeChange::Discarded { removed } => {
                info!(%attribute_id, removed, "block tree discarded after type change");
            }
            TreeChange::Planted(root) => {
                info!(%attribute_id, root_id = %root.id, "block root created");
            }
            TreeChange::Unchanged => {}
        }
        Ok(attribute)
    }

    pub fn delete_attribute(&self, attribute_id: AttributeId) -> Result<(), CatalogError> {
        self.store.delete_attribute(attribute_id)?;
        info!(%attribute_id, "attribute deleted");
        Ok(())
    }

    pub fn create_form(&self, event_id: EventId, draft: FormDraft) -> Result<Form, CatalogError> {
        for field in &draft.fields {
            self.owned_attribute(event_id, field.attribute_id)?;
        }
        Ok(self.store.insert_form(event_id, draft)?)
    }

    /// Add a block under `parent`, or directly under the attribute's root when `None`.
    pub fn add_block(
        &self,
        attribute_id: AttributeId,
        parent: Option<BlockId>,
        draft: BlockDraft,
    ) -> Result<Block, CatalogError> {
        let attribute = self.attribute(attribute_id)?;
        if !attribute.attribute_type.is_block() {
            return Err(CatalogError::NotBlockTyped(attribute_id));
        }
        let parent = match parent {
            Some(parent) => parent,
            None => self.store.root(attribute_id)?.id,
        };
        let draft = BlockDraft {
            attribute_id,
            ..draft
        };
        Ok(self.store.create_block(Some(parent), draft)?)
    }

    /// Edit a block in place; a zero capacity resets it to unlimited.
    pub fn update_block(&self, block_id: BlockId, patch: BlockPatch) -> Result<Block, CatalogError> {
        Ok(self.store.update_block(block_id, patch)?)
    }

    /// Remove a non-root block with its descendants and their occupancy records.
    pub fn remove_block(&self, block_id: BlockId) -> Result<usize, CatalogError> {
        let block = self
            .store
            .block(block_id)?
            .ok_or_else(|| StoreError::not_found("block", block_id))?;
        if block.is_root() {
            return Err(CatalogError::RootRemoval(block_id));
        }
        let removed = self.store.delete_subtree(block_id)?;
        info!(%block_id, removed, "block subtree removed");
        Ok(removed)
    }

    fn plant_root(&self, attribute: &Attribute) -> Result<Block, CatalogError> {
        let root = self
            .store
            .create_block(None, BlockDraft::new(attribute.id, attribute.name.clone()))?;
        info!(attribute_id = %attribute.id, root_id = %root.id, "block root created");
        Ok(root)
    }

    fn event(&self, event_id: EventId) -> Result<Event, CatalogError> {
        Ok(self
            .store
            .event(event_id)?
            .ok_or_else(|| StoreError::not_found("event", event_id))?)
    }

    fn attribute(&self, attribute_id: AttributeId) -> Result<Attribute, CatalogError> {
        Ok(self
            .store
            .attribute(attribute_id)?
            .ok_or_else(|| StoreError::not_found("attribute", attribute_id))?)
    }

    fn owned_attribute(
        &self,
        event_id: EventId,
        attribute_id: AttributeId,
    ) -> Result<Attribute, CatalogError> {
        let attribute = self.attribute(attribute_id)?;
        if attribute.event_id != event_id {
            return Err(CatalogError::ForeignAttribute {
                attribute_id,
                event_id,
            });
        }
        Ok(attribute)
    }
}
