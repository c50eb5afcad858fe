//! Participant enrollment: coordinator, collaborator seams and HTTP routes.

pub mod collaborators;
pub mod router;
pub mod service;

pub use collaborators::{
    FileStorage, Notification, Notifier, NotifyError, StorageError, StorageKey,
};
pub use router::{registration_router, ParticipantView, SubmissionRequest};
pub use service::EnrollmentCoordinator;
