//! Event registration engine: block trees with per-node capacity, per-type dispatch of
//! form submissions, and transactional participant enrollment.

pub mod attributes;
pub mod blocks;
mod desk;
pub mod domain;
pub mod enrollment;
pub mod error;
pub mod memory;
pub mod store;

#[cfg(test)]
mod tests;

pub use attributes::{AttributeCatalog, AttributeDispatcher, CatalogError, FormSchema};
pub use blocks::{Admission, BlockTree, CapacityOracle, TreeAggregator, TreeError};
pub use desk::RegistrationDesk;
pub use domain::{
    Attribute, AttributeDraft, AttributeId, AttributeType, Block, BlockDraft, BlockId,
    BlockPatch, Event, EventId, Form, FormDraft, FormField, FormId, NotificationTrigger,
    Participant, ParticipantId, ParticipantToken, RawValue, Submission, TriggerCondition,
    TriggerKind, Upload,
};
pub use enrollment::{
    registration_router, EnrollmentCoordinator, FileStorage, Notification, Notifier,
    NotifyError, StorageError, StorageKey,
};
pub use error::{EnrollmentError, MissingField};
pub use memory::MemoryRegistry;
pub use store::{RegistryStore, StoreError};
