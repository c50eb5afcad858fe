use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::registration::domain::{EventId, ParticipantId, TriggerKind, Upload};

/// Key returned by the file storage collaborator; stored as the occupancy value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(pub String);

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait describing where file-typed attribute uploads end up.
pub trait FileStorage: Send + Sync {
    fn store(&self, upload: &Upload) -> Result<StorageKey, StorageError>;
    fn resolve_path(&self, key: &StorageKey) -> Option<PathBuf>;
    /// Removes an artifact written for a submission that was later rejected.
    fn discard(&self, key: &StorageKey) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outbound notification hook (e.g., an e-mail adapter).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Payload handed to the notifier after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event_id: EventId,
    pub participant_id: ParticipantId,
    pub email: String,
    pub template: String,
    pub trigger: TriggerKind,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
