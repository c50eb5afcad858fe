//! In-process registry backing the store traits.
//!
//! Every table lives behind one mutex, so each trait call behaves like a serializable
//! transaction. `commit_enrollment` counts and writes while holding the lock, which closes
//! the window between an admission check and the occupancy insert.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::domain::{
    Attribute, AttributeDraft, AttributeId, Block, BlockDraft, BlockId, BlockPatch, Event,
    EventId, Form, FormDraft, FormId, NotificationRecord, Participant, ParticipantId,
    ParticipantToken,
};
use super::store::{
    BlockStore, CatalogStore, EnrollmentCommit, EnrollmentTarget, OccupancyStore,
    ParticipantStore, StoreError, TreeChange,
};

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    sequence: u64,
    events: BTreeMap<EventId, Event>,
    attributes: BTreeMap<AttributeId, Attribute>,
    forms: BTreeMap<FormId, Form>,
    blocks: BTreeMap<BlockId, Block>,
    participants: BTreeMap<ParticipantId, Participant>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, RegistryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("registry lock poisoned".to_string()))
    }
}

impl RegistryState {
    fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn count_occupants(
        &self,
        attribute_id: AttributeId,
        value: &str,
        excluding: Option<ParticipantId>,
    ) -> usize {
        self.participants
            .values()
            .filter(|participant| Some(participant.id) != excluding)
            .filter(|participant| participant.value(attribute_id) == Some(value))
            .count()
    }

    fn email_taken(&self, event_id: EventId, email: &str) -> bool {
        self.participants
            .values()
            .any(|participant| participant.event_id == event_id && participant.email == email)
    }

    /// Collects `id` and its descendants. The visited set keeps a corrupted parent
    /// chain from looping.
    fn subtree_ids(&self, id: BlockId) -> BTreeSet<BlockId> {
        let mut collected = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !collected.insert(current) {
                continue;
            }
            stack.extend(
                self.blocks
                    .values()
                    .filter(|block| block.parent_id == Some(current))
                    .map(|block| block.id),
            );
        }
        collected
    }

    fn ensure_slug_free(&self, attribute: &Attribute) -> Result<(), StoreError> {
        let slug_taken = self.attributes.values().any(|other| {
            other.id != attribute.id
                && other.event_id == attribute.event_id
                && other.slug == attribute.slug
        });
        if slug_taken {
            return Err(StoreError::DuplicateSlug {
                event_id: attribute.event_id,
                slug: attribute.slug.clone(),
            });
        }
        Ok(())
    }

    fn release_block_values(&mut self, attribute_id: AttributeId, removed: &BTreeSet<BlockId>) {
        for participant in self.participants.values_mut() {
            let holds_removed = participant
                .value(attribute_id)
                .and_then(BlockId::parse)
                .is_some_and(|block_id| removed.contains(&block_id));
            if holds_removed {
                participant.values.remove(&attribute_id);
            }
        }
    }
}

impl BlockStore for MemoryRegistry {
    fn block(&self, id: BlockId) -> Result<Option<Block>, StoreError> {
        Ok(self.state()?.blocks.get(&id).cloned())
    }

    fn root(&self, attribute_id: AttributeId) -> Result<Block, StoreError> {
        self.state()?
            .blocks
            .values()
            .find(|block| block.attribute_id == attribute_id && block.is_root())
            .cloned()
            .ok_or_else(|| StoreError::not_found("root block of attribute", attribute_id))
    }

    fn children(&self, parent_id: BlockId) -> Result<Vec<Block>, StoreError> {
        let state = self.state()?;
        if !state.blocks.contains_key(&parent_id) {
            return Err(StoreError::not_found("block", parent_id));
        }
        let mut children: Vec<Block> = state
            .blocks
            .values()
            .filter(|block| block.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(children)
    }

    fn create_block(
        &self,
        parent_id: Option<BlockId>,
        draft: BlockDraft,
    ) -> Result<Block, StoreError> {
        let mut state = self.state()?;
        if !state.attributes.contains_key(&draft.attribute_id) {
            return Err(StoreError::not_found("attribute", draft.attribute_id));
        }

        match parent_id {
            Some(parent_id) => {
                let parent = state
                    .blocks
                    .get(&parent_id)
                    .ok_or_else(|| StoreError::not_found("block", parent_id))?;
                if parent.attribute_id != draft.attribute_id {
                    return Err(StoreError::AttributeMismatch {
                        block_id: parent_id,
                        expected: parent.attribute_id,
                        found: draft.attribute_id,
                    });
                }
            }
            None => {
                let has_root = state
                    .blocks
                    .values()
                    .any(|block| block.attribute_id == draft.attribute_id && block.is_root());
                if has_root {
                    return Err(StoreError::RootExists(draft.attribute_id));
                }
            }
        }

        let block = Block {
            id: BlockId(state.next_id()),
            attribute_id: draft.attribute_id,
            parent_id,
            name: draft.name,
            description: draft.description,
            capacity: draft.capacity,
            order: draft.order,
            created_at: draft.created_at.unwrap_or_else(Utc::now),
        };
        state.blocks.insert(block.id, block.clone());
        Ok(block)
    }

    fn update_block(&self, id: BlockId, patch: BlockPatch) -> Result<Block, StoreError> {
        let mut state = self.state()?;
        let block = state
            .blocks
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("block", id))?;
        if let Some(name) = patch.name {
            block.name = name;
        }
        if let Some(description) = patch.description {
            block.description = Some(description);
        }
        if let Some(capacity) = patch.capacity {
            block.capacity = (capacity > 0).then_some(capacity);
        }
        if let Some(order) = patch.order {
            block.order = Some(order);
        }
        Ok(block.clone())
    }

    fn delete_subtree(&self, id: BlockId) -> Result<usize, StoreError> {
        let mut state = self.state()?;
        let attribute_id = state
            .blocks
            .get(&id)
            .map(|block| block.attribute_id)
            .ok_or_else(|| StoreError::not_found("block", id))?;

        let removed = state.subtree_ids(id);
        for block_id in &removed {
            state.blocks.remove(block_id);
        }
        state.release_block_values(attribute_id, &removed);
        Ok(removed.len())
    }
}

impl OccupancyStore for MemoryRegistry {
    fn count_occupants(
        &self,
        attribute_id: AttributeId,
        value: &str,
        excluding: Option<ParticipantId>,
    ) -> Result<usize, StoreError> {
        Ok(self.state()?.count_occupants(attribute_id, value, excluding))
    }

    fn occupants(
        &self,
        attribute_id: AttributeId,
        value: &str,
    ) -> Result<Vec<Participant>, StoreError> {
        Ok(self
            .state()?
            .participants
            .values()
            .filter(|participant| participant.value(attribute_id) == Some(value))
            .cloned()
            .collect())
    }
}

impl CatalogStore for MemoryRegistry {
    fn event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.state()?.events.get(&id).cloned())
    }

    fn insert_event(&self, name: &str) -> Result<Event, StoreError> {
        let mut state = self.state()?;
        let event = Event {
            id: EventId(state.next_id()),
            name: name.to_string(),
            label_attributes: Vec::new(),
            triggers: Vec::new(),
        };
        state.events.insert(event.id, event.clone());
        Ok(event)
    }

    fn update_event(&self, event: Event) -> Result<(), StoreError> {
        let mut state = self.state()?;
        match state.events.get_mut(&event.id) {
            Some(stored) => {
                *stored = event;
                Ok(())
            }
            None => Err(StoreError::not_found("event", event.id)),
        }
    }

    fn attribute(&self, id: AttributeId) -> Result<Option<Attribute>, StoreError> {
        Ok(self.state()?.attributes.get(&id).cloned())
    }

    fn attributes(&self, event_id: EventId) -> Result<Vec<Attribute>, StoreError> {
        let mut attributes: Vec<Attribute> = self
            .state()?
            .attributes
            .values()
            .filter(|attribute| attribute.event_id == event_id)
            .cloned()
            .collect();
        attributes.sort_by_key(|attribute| (attribute.order.unwrap_or(i32::MAX), attribute.id));
        Ok(attributes)
    }

    fn insert_attribute(
        &self,
        event_id: EventId,
        draft: AttributeDraft,
    ) -> Result<Attribute, StoreError> {
        let mut state = self.state()?;
        if !state.events.contains_key(&event_id) {
            return Err(StoreError::not_found("event", event_id));
        }
        let slug_taken = state
            .attributes
            .values()
            .any(|attribute| attribute.event_id == event_id && attribute.slug == draft.slug);
        if slug_taken {
            return Err(StoreError::DuplicateSlug {
                event_id,
                slug: draft.slug,
            });
        }

        let attribute = Attribute {
            id: AttributeId(state.next_id()),
            event_id,
            name: draft.name,
            slug: draft.slug,
            attribute_type: draft.attribute_type,
            options: draft.options,
            order: draft.order,
            visible: draft.visible,
        };
        state.attributes.insert(attribute.id, attribute.clone());
        Ok(attribute)
    }

    fn retype_attribute(&self, attribute: Attribute) -> Result<TreeChange, StoreError> {
        let mut state = self.state()?;
        let was_block = state
            .attributes
            .get(&attribute.id)
            .map(|stored| stored.attribute_type.is_block())
            .ok_or_else(|| StoreError::not_found("attribute", attribute.id))?;
        state.ensure_slug_free(&attribute)?;

        let change = match (was_block, attribute.attribute_type.is_block()) {
            (true, false) => {
                let removed: BTreeSet<BlockId> = state
                    .blocks
                    .values()
                    .filter(|block| block.attribute_id == attribute.id)
                    .map(|block| block.id)
                    .collect();
                state.blocks.retain(|_, block| block.attribute_id != attribute.id);
                state.release_block_values(attribute.id, &removed);
                TreeChange::Discarded {
                    removed: removed.len(),
                }
            }
            (false, true) => {
                let root = Block {
                    id: BlockId(state.next_id()),
                    attribute_id: attribute.id,
                    parent_id: None,
                    name: attribute.name.clone(),
                    description: None,
                    capacity: None,
                    order: None,
                    created_at: Utc::now(),
                };
                state.blocks.insert(root.id, root.clone());
                TreeChange::Planted(root)
            }
            (true, true) | (false, false) => TreeChange::Unchanged,
        };
        state.attributes.insert(attribute.id, attribute);
        Ok(change)
    }

    fn delete_attribute(&self, id: AttributeId) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let attribute = state
            .attributes
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("attribute", id))?;

        state.blocks.retain(|_, block| block.attribute_id != id);
        for participant in state.participants.values_mut() {
            participant.values.remove(&id);
        }
        for form in state.forms.values_mut() {
            form.fields.retain(|field| field.attribute_id != id);
        }
        if let Some(event) = state.events.get_mut(&attribute.event_id) {
            event.label_attributes.retain(|label| *label != id);
        }
        Ok(())
    }

    fn form(&self, id: FormId) -> Result<Option<Form>, StoreError> {
        Ok(self.state()?.forms.get(&id).cloned())
    }

    fn insert_form(&self, event_id: EventId, draft: FormDraft) -> Result<Form, StoreError> {
        let mut state = self.state()?;
        if !state.events.contains_key(&event_id) {
            return Err(StoreError::not_found("event", event_id));
        }
        let first_exists = state
            .forms
            .values()
            .any(|form| form.event_id == event_id && form.is_first);
        if draft.is_first && first_exists {
            return Err(StoreError::FirstFormExists(event_id));
        }

        let form = Form {
            id: FormId(state.next_id()),
            event_id,
            name: draft.name,
            is_first: draft.is_first,
            fields: draft.fields,
        };
        state.forms.insert(form.id, form.clone());
        Ok(form)
    }
}

impl ParticipantStore for MemoryRegistry {
    fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        Ok(self.state()?.participants.get(&id).cloned())
    }

    fn participant_by_token(
        &self,
        event_id: EventId,
        token: &ParticipantToken,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .state()?
            .participants
            .values()
            .find(|participant| participant.event_id == event_id && &participant.token == token)
            .cloned())
    }

    fn participant_by_email(
        &self,
        event_id: EventId,
        email: &str,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .state()?
            .participants
            .values()
            .find(|participant| participant.event_id == event_id && participant.email == email)
            .cloned())
    }

    fn commit_enrollment(&self, commit: EnrollmentCommit) -> Result<Participant, StoreError> {
        let mut state = self.state()?;

        let existing = match &commit.target {
            EnrollmentTarget::Create { event_id, email, .. } => {
                if !state.events.contains_key(event_id) {
                    return Err(StoreError::not_found("event", event_id));
                }
                if state.email_taken(*event_id, email) {
                    return Err(StoreError::DuplicateEmail {
                        email: email.clone(),
                    });
                }
                None
            }
            EnrollmentTarget::Update { participant_id } => Some(
                state
                    .participants
                    .get(participant_id)
                    .cloned()
                    .ok_or_else(|| StoreError::not_found("participant", participant_id))?,
            ),
        };
        let holder = existing.as_ref().map(|participant| participant.id);

        for value in &commit.values {
            let Some(block_id) = value.admission() else {
                continue;
            };
            let block = state
                .blocks
                .get(&block_id)
                .ok_or_else(|| StoreError::not_found("block", block_id))?;
            if block.attribute_id != value.attribute_id {
                return Err(StoreError::AttributeMismatch {
                    block_id,
                    expected: block.attribute_id,
                    found: value.attribute_id,
                });
            }
            if let Some(limit) = block.limit() {
                let held = state.count_occupants(value.attribute_id, &value.value, holder);
                if held >= limit as usize {
                    return Err(StoreError::CapacityExceeded {
                        attribute_id: value.attribute_id,
                        block_id,
                    });
                }
            }
        }

        let mut participant = match (commit.target, existing) {
            (EnrollmentTarget::Update { .. }, Some(participant)) => participant,
            (EnrollmentTarget::Create { event_id, email, token }, _) => Participant {
                id: ParticipantId(state.next_id()),
                event_id,
                email,
                token,
                created_at: Utc::now(),
                values: BTreeMap::new(),
                notifications: Vec::new(),
            },
            (EnrollmentTarget::Update { participant_id }, None) => {
                return Err(StoreError::not_found("participant", participant_id));
            }
        };
        for value in commit.values {
            participant.values.insert(value.attribute_id, value.value);
        }
        state.participants.insert(participant.id, participant.clone());
        Ok(participant)
    }

    fn record_notification(
        &self,
        id: ParticipantId,
        record: NotificationRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let participant = state
            .participants
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("participant", id))?;
        participant.notifications.push(record);
        Ok(())
    }

    fn delete_participant(&self, id: ParticipantId) -> Result<(), StoreError> {
        self.state()?
            .participants
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("participant", id))
    }
}
