//! Storage seams for the registration engine.
//!
//! The traits mirror the tables of a relational store: blocks with parent pointers,
//! occupancy records, catalog rows (events, attributes, forms) and participants.
//! `ParticipantStore::commit_enrollment` is the only write path for occupancy records and
//! must run its capacity checks and writes as one atomic unit.

use super::domain::{
    Attribute, AttributeDraft, AttributeId, Block, BlockDraft, BlockId, BlockPatch, Event,
    EventId, Form, FormDraft, FormId, NotificationRecord, Participant, ParticipantId,
    ParticipantToken, ResolvedValue,
};

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("participant with email {email} already registered")]
    DuplicateEmail { email: String },
    #[error("block {block_id} has no remaining capacity")]
    CapacityExceeded {
        attribute_id: AttributeId,
        block_id: BlockId,
    },
    #[error("block {block_id} belongs to attribute {expected}, not {found}")]
    AttributeMismatch {
        block_id: BlockId,
        expected: AttributeId,
        found: AttributeId,
    },
    #[error("attribute {0} already owns a root block")]
    RootExists(AttributeId),
    #[error("slug '{slug}' already used in event {event_id}")]
    DuplicateSlug { event_id: EventId, slug: String },
    #[error("event {0} already has a first form")]
    FirstFormExists(EventId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Node lifecycle for block trees.
pub trait BlockStore: Send + Sync {
    fn block(&self, id: BlockId) -> Result<Option<Block>, StoreError>;
    fn root(&self, attribute_id: AttributeId) -> Result<Block, StoreError>;
    /// Children ordered by creation time ascending, ties broken by id.
    fn children(&self, parent_id: BlockId) -> Result<Vec<Block>, StoreError>;
    fn create_block(
        &self,
        parent_id: Option<BlockId>,
        draft: BlockDraft,
    ) -> Result<Block, StoreError>;
    fn update_block(&self, id: BlockId, patch: BlockPatch) -> Result<Block, StoreError>;
    /// Removes the block, its descendants and every occupancy record pointing at them.
    /// Returns the number of blocks removed.
    fn delete_subtree(&self, id: BlockId) -> Result<usize, StoreError>;
}

/// Read access to occupancy records.
pub trait OccupancyStore: Send + Sync {
    fn count_occupants(
        &self,
        attribute_id: AttributeId,
        value: &str,
        excluding: Option<ParticipantId>,
    ) -> Result<usize, StoreError>;
    /// Participants holding `value` for the attribute, in registration order.
    fn occupants(&self, attribute_id: AttributeId, value: &str)
        -> Result<Vec<Participant>, StoreError>;
}

/// Events, attributes and forms.
pub trait CatalogStore: Send + Sync {
    fn event(&self, id: EventId) -> Result<Option<Event>, StoreError>;
    fn insert_event(&self, name: &str) -> Result<Event, StoreError>;
    fn update_event(&self, event: Event) -> Result<(), StoreError>;
    fn attribute(&self, id: AttributeId) -> Result<Option<Attribute>, StoreError>;
    fn attributes(&self, event_id: EventId) -> Result<Vec<Attribute>, StoreError>;
    fn insert_attribute(
        &self,
        event_id: EventId,
        draft: AttributeDraft,
    ) -> Result<Attribute, StoreError>;
    /// Writes the attribute's new type together with its tree: leaving the block type
    /// removes every block and the values pointing at them, entering it plants a root
    /// named after the attribute. Nothing is written when any check fails.
    fn retype_attribute(&self, attribute: Attribute) -> Result<TreeChange, StoreError>;
    /// Cascades to the attribute's blocks, occupancy records and form entries.
    fn delete_attribute(&self, id: AttributeId) -> Result<(), StoreError>;
    fn form(&self, id: FormId) -> Result<Option<Form>, StoreError>;
    fn insert_form(&self, event_id: EventId, draft: FormDraft) -> Result<Form, StoreError>;
}

/// Effect of a type change on the attribute's block tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
    Unchanged,
    Discarded { removed: usize },
    Planted(Block),
}

/// Where an enrollment commit lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentTarget {
    Create {
        event_id: EventId,
        email: String,
        token: ParticipantToken,
    },
    Update {
        participant_id: ParticipantId,
    },
}

/// One participant write with every occupancy record it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentCommit {
    pub target: EnrollmentTarget,
    pub values: Vec<ResolvedValue>,
}

pub trait ParticipantStore: Send + Sync {
    fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError>;
    fn participant_by_token(
        &self,
        event_id: EventId,
        token: &ParticipantToken,
    ) -> Result<Option<Participant>, StoreError>;
    fn participant_by_email(
        &self,
        event_id: EventId,
        email: &str,
    ) -> Result<Option<Participant>, StoreError>;
    /// Atomically re-checks email uniqueness and the capacity of every admitted block,
    /// then creates or updates the participant and overwrites its occupancy records.
    /// Nothing is written when any check fails.
    fn commit_enrollment(&self, commit: EnrollmentCommit) -> Result<Participant, StoreError>;
    fn record_notification(
        &self,
        id: ParticipantId,
        record: NotificationRecord,
    ) -> Result<(), StoreError>;
    fn delete_participant(&self, id: ParticipantId) -> Result<(), StoreError>;
}

/// Everything the engine needs from persistence.
pub trait RegistryStore: BlockStore + OccupancyStore + CatalogStore + ParticipantStore {}

impl<T> RegistryStore for T where T: BlockStore + OccupancyStore + CatalogStore + ParticipantStore {}
