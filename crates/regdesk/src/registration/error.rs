use serde::Serialize;

use super::blocks::TreeError;
use super::domain::{AttributeId, BlockId};
use super::enrollment::collaborators::StorageError;
use super::store::StoreError;

/// Required attribute that a submission left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingField {
    pub attribute_id: AttributeId,
    pub name: String,
    pub slug: String,
}

/// Outcome of a rejected submission or lookup.
///
/// `NotFound`, `MissingRequiredFields`, `BlockFull`, `DuplicateEmail` and `InvalidValue`
/// are the submitter's to fix; the rest point at infrastructure or corrupted data.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("missing required fields: {}", join_missing(.0))]
    MissingRequiredFields(Vec<MissingField>),
    #[error("block {block_id} of attribute {attribute_id} is full")]
    BlockFull {
        attribute_id: AttributeId,
        block_id: BlockId,
    },
    #[error("a participant with email {email} is already registered")]
    DuplicateEmail { email: String },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("file storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("corrupted block tree at block {block_id}: {reason}")]
    Structural { block_id: BlockId, reason: String },
    #[error("registry unavailable: {0}")]
    Repository(String),
}

impl EnrollmentError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EnrollmentError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EnrollmentError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EnrollmentError::NotFound { .. }
                | EnrollmentError::MissingRequiredFields(_)
                | EnrollmentError::BlockFull { .. }
                | EnrollmentError::DuplicateEmail { .. }
                | EnrollmentError::InvalidValue { .. }
        )
    }

    /// Stable machine-readable code for API payloads.
    pub const fn code(&self) -> &'static str {
        match self {
            EnrollmentError::NotFound { .. } => "not_found",
            EnrollmentError::MissingRequiredFields(_) => "missing_required_fields",
            EnrollmentError::BlockFull { .. } => "block_full",
            EnrollmentError::DuplicateEmail { .. } => "duplicate_email",
            EnrollmentError::InvalidValue { .. } => "invalid_value",
            EnrollmentError::Storage(_) => "storage_failure",
            EnrollmentError::Structural { .. } => "structural_error",
            EnrollmentError::Repository(_) => "repository_unavailable",
        }
    }
}

fn join_missing(fields: &[MissingField]) -> String {
    fields
        .iter()
        .map(|field| field.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<StoreError> for EnrollmentError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { entity, id } => EnrollmentError::NotFound { entity, id },
            StoreError::DuplicateEmail { email } => EnrollmentError::DuplicateEmail { email },
            StoreError::CapacityExceeded {
                attribute_id,
                block_id,
            } => EnrollmentError::BlockFull {
                attribute_id,
                block_id,
            },
            StoreError::AttributeMismatch { block_id, .. } => {
                EnrollmentError::not_found("block", block_id)
            }
            other @ (StoreError::RootExists(_)
            | StoreError::DuplicateSlug { .. }
            | StoreError::FirstFormExists(_)
            | StoreError::Unavailable(_)) => EnrollmentError::Repository(other.to_string()),
        }
    }
}

impl From<TreeError> for EnrollmentError {
    fn from(value: TreeError) -> Self {
        match value {
            TreeError::Store(err) => err.into(),
            TreeError::Structural { block_id, reason } => {
                EnrollmentError::Structural { block_id, reason }
            }
        }
    }
}
