use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use axum::response::Response;
use serde_json::Value;

use crate::registration::attributes::AttributeCatalog;
use crate::registration::desk::RegistrationDesk;
use crate::registration::domain::{
    Attribute, AttributeDraft, AttributeId, AttributeType, Block, BlockDraft, BlockId,
    BlockPatch, Event, EventId, Form, FormDraft, FormField, FormId, NotificationRecord,
    NotificationTrigger, Participant, ParticipantId, ParticipantToken, RawValue, Submission,
    TriggerCondition, Upload,
};
use crate::registration::enrollment::collaborators::{
    FileStorage, Notification, Notifier, NotifyError, StorageError, StorageKey,
};
use crate::registration::enrollment::EnrollmentCoordinator;
use crate::registration::memory::MemoryRegistry;
use crate::registration::store::{
    BlockStore, CatalogStore, EnrollmentCommit, OccupancyStore, ParticipantStore, StoreError,
    TreeChange,
};

/// File name the fake storage refuses, to exercise upload failures.
pub(super) const REJECTED_FILE: &str = "reject.bin";

/// Event with a workshop block tree:
///
/// ```text
/// Workshops (root)
/// ├── Morning (capacity 2)
/// │   └── Rust lab (capacity 1)
/// └── Afternoon (unlimited)
/// ```
pub(super) struct Fixture {
    pub store: Arc<MemoryRegistry>,
    pub files: Arc<MemoryFiles>,
    pub notifier: Arc<RecordingNotifier>,
    pub event: Event,
    pub first_name: Attribute,
    pub last_name: Attribute,
    pub city: Attribute,
    pub topics: Attribute,
    pub cv: Attribute,
    pub workshop: Attribute,
    pub root: Block,
    pub morning: Block,
    pub rust_lab: Block,
    pub afternoon: Block,
    pub signup: Form,
    pub follow_up: Form,
}

impl Fixture {
    pub(super) fn catalog(&self) -> AttributeCatalog<MemoryRegistry> {
        AttributeCatalog::new(Arc::clone(&self.store))
    }

    pub(super) fn coordinator(
        &self,
    ) -> EnrollmentCoordinator<MemoryRegistry, MemoryFiles, RecordingNotifier> {
        EnrollmentCoordinator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.files),
            Arc::clone(&self.notifier),
        )
    }

    pub(super) fn desk(&self) -> Arc<RegistrationDesk<MemoryRegistry, MemoryFiles, RecordingNotifier>> {
        Arc::new(RegistrationDesk::new(
            Arc::clone(&self.store),
            Arc::clone(&self.files),
            Arc::clone(&self.notifier),
            crate::registration::blocks::DEFAULT_MAX_DEPTH,
        ))
    }
}

pub(super) fn fixture() -> Fixture {
    let store = Arc::new(MemoryRegistry::new());
    let catalog = AttributeCatalog::new(Arc::clone(&store));

    let event = catalog.create_event("RustConf Workshops").expect("event");
    let declare = |name: &str, slug: &str, attribute_type: AttributeType| {
        catalog
            .declare_attribute(event.id, AttributeDraft::new(name, slug, attribute_type))
            .expect("attribute")
    };
    let first_name = declare("First name", "first_name", AttributeType::Text);
    let last_name = declare("Last name", "last_name", AttributeType::Text);
    let city = catalog
        .declare_attribute(
            event.id,
            AttributeDraft::new("City", "city", AttributeType::SingleSelect)
                .with_options(["Berlin", "Lisbon"]),
        )
        .expect("city");
    let topics = catalog
        .declare_attribute(
            event.id,
            AttributeDraft::new("Topics", "topics", AttributeType::MultiSelect)
                .with_options(["async", "embedded", "wasm"]),
        )
        .expect("topics");
    let cv = declare("CV", "cv", AttributeType::File);
    let workshop = declare("Workshop", "workshop", AttributeType::Block);

    let root = store.root(workshop.id).expect("block attribute owns a root");
    let morning = catalog
        .add_block(workshop.id, None, BlockDraft::new(workshop.id, "Morning").capacity(2))
        .expect("morning");
    let rust_lab = catalog
        .add_block(
            workshop.id,
            Some(morning.id),
            BlockDraft::new(workshop.id, "Rust lab").capacity(1),
        )
        .expect("rust lab");
    let afternoon = catalog
        .add_block(workshop.id, None, BlockDraft::new(workshop.id, "Afternoon"))
        .expect("afternoon");

    let signup = catalog
        .create_form(
            event.id,
            FormDraft {
                name: "Sign up".to_string(),
                is_first: true,
                fields: vec![
                    FormField::required(first_name.id),
                    FormField::optional(last_name.id),
                    FormField::optional(city.id),
                    FormField::optional(topics.id),
                    FormField::optional(cv.id),
                    FormField::required(workshop.id),
                ],
            },
        )
        .expect("sign-up form");
    let follow_up = catalog
        .create_form(
            event.id,
            FormDraft {
                name: "Change workshop".to_string(),
                is_first: false,
                fields: vec![
                    FormField::optional(first_name.id).locked(),
                    FormField::optional(cv.id),
                    FormField::optional(workshop.id),
                ],
            },
        )
        .expect("follow-up form");

    catalog
        .add_trigger(
            event.id,
            NotificationTrigger {
                template: "welcome".to_string(),
                condition: TriggerCondition::FormSubmitted { form_id: signup.id },
            },
        )
        .expect("welcome trigger");
    let event = catalog
        .add_trigger(
            event.id,
            NotificationTrigger {
                template: "seat-confirmed".to_string(),
                condition: TriggerCondition::BlockAdmitted {
                    attribute_id: workshop.id,
                    block_id: None,
                },
            },
        )
        .expect("seat trigger");

    Fixture {
        store,
        files: Arc::new(MemoryFiles::default()),
        notifier: Arc::new(RecordingNotifier::default()),
        event,
        first_name,
        last_name,
        city,
        topics,
        cv,
        workshop,
        root,
        morning,
        rust_lab,
        afternoon,
        signup,
        follow_up,
    }
}

/// Sign-up payload choosing `block` for the workshop attribute.
pub(super) fn signup_submission(first_name: &str, block: &Block) -> Submission {
    Submission::new()
        .with("first_name", RawValue::text(first_name))
        .with("workshop", RawValue::text(block.id.as_value()))
}

pub(super) fn upload(file_name: &str) -> RawValue {
    RawValue::Upload(Upload {
        file_name: file_name.to_string(),
        content_type: Some("application/pdf".to_string()),
        data: b"%PDF-1.7".to_vec(),
    })
}

#[derive(Default)]
pub(super) struct MemoryFiles {
    stored: Mutex<Vec<StorageKey>>,
    discarded: Mutex<Vec<StorageKey>>,
    store_threads: Mutex<Vec<ThreadId>>,
}

impl MemoryFiles {
    /// Threads that ran `store`, one entry per call.
    pub(super) fn store_threads(&self) -> Vec<ThreadId> {
        self.store_threads.lock().expect("files mutex poisoned").clone()
    }

    pub(super) fn stored(&self) -> Vec<StorageKey> {
        self.stored.lock().expect("files mutex poisoned").clone()
    }

    pub(super) fn discarded(&self) -> Vec<StorageKey> {
        self.discarded.lock().expect("files mutex poisoned").clone()
    }
}

impl FileStorage for MemoryFiles {
    fn store(&self, upload: &Upload) -> Result<StorageKey, StorageError> {
        self.store_threads
            .lock()
            .expect("files mutex poisoned")
            .push(thread::current().id());
        if upload.file_name == REJECTED_FILE {
            return Err(StorageError::Rejected(format!("{} is not allowed", upload.file_name)));
        }
        let mut stored = self.stored.lock().expect("files mutex poisoned");
        let key = StorageKey(format!("upload-{}", stored.len() + 1));
        stored.push(key.clone());
        Ok(key)
    }

    fn resolve_path(&self, key: &StorageKey) -> Option<PathBuf> {
        Some(PathBuf::from("/srv/uploads").join(&key.0))
    }

    fn discard(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.discarded
            .lock()
            .expect("files mutex poisoned")
            .push(key.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn templates(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|notification| notification.template)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp relay offline".to_string()))
    }
}

/// Store whose backend is down; every call fails.
pub(super) struct UnavailableRegistry;

fn offline<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("database offline".to_string()))
}

impl BlockStore for UnavailableRegistry {
    fn block(&self, _id: BlockId) -> Result<Option<Block>, StoreError> {
        offline()
    }

    fn root(&self, _attribute_id: AttributeId) -> Result<Block, StoreError> {
        offline()
    }

    fn children(&self, _parent_id: BlockId) -> Result<Vec<Block>, StoreError> {
        offline()
    }

    fn create_block(
        &self,
        _parent_id: Option<BlockId>,
        _draft: BlockDraft,
    ) -> Result<Block, StoreError> {
        offline()
    }

    fn update_block(&self, _id: BlockId, _patch: BlockPatch) -> Result<Block, StoreError> {
        offline()
    }

    fn delete_subtree(&self, _id: BlockId) -> Result<usize, StoreError> {
        offline()
    }
}

impl OccupancyStore for UnavailableRegistry {
    fn count_occupants(
        &self,
        _attribute_id: AttributeId,
        _value: &str,
        _excluding: Option<ParticipantId>,
    ) -> Result<usize, StoreError> {
        offline()
    }

    fn occupants(
        &self,
        _attribute_id: AttributeId,
        _value: &str,
    ) -> Result<Vec<Participant>, StoreError> {
        offline()
    }
}

impl CatalogStore for UnavailableRegistry {
    fn event(&self, _id: EventId) -> Result<Option<Event>, StoreError> {
        offline()
    }

    fn insert_event(&self, _name: &str) -> Result<Event, StoreError> {
        offline()
    }

    fn update_event(&self, _event: Event) -> Result<(), StoreError> {
        offline()
    }

    fn attribute(&self, _id: AttributeId) -> Result<Option<Attribute>, StoreError> {
        offline()
    }

    fn attributes(&self, _event_id: EventId) -> Result<Vec<Attribute>, StoreError> {
        offline()
    }

    fn insert_attribute(
        &self,
        _event_id: EventId,
        _draft: AttributeDraft,
    ) -> Result<Attribute, StoreError> {
        offline()
    }

    fn retype_attribute(&self, _attribute: Attribute) -> Result<TreeChange, StoreError> {
        offline()
    }

    fn delete_attribute(&self, _id: AttributeId) -> Result<(), StoreError> {
        offline()
    }

    fn form(&self, _id: FormId) -> Result<Option<Form>, StoreError> {
        offline()
    }

    fn insert_form(&self, _event_id: EventId, _draft: FormDraft) -> Result<Form, StoreError> {
        offline()
    }
}

impl ParticipantStore for UnavailableRegistry {
    fn participant(&self, _id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        offline()
    }

    fn participant_by_token(
        &self,
        _event_id: EventId,
        _token: &ParticipantToken,
    ) -> Result<Option<Participant>, StoreError> {
        offline()
    }

    fn participant_by_email(
        &self,
        _event_id: EventId,
        _email: &str,
    ) -> Result<Option<Participant>, StoreError> {
        offline()
    }

    fn commit_enrollment(&self, _commit: EnrollmentCommit) -> Result<Participant, StoreError> {
        offline()
    }

    fn record_notification(
        &self,
        _id: ParticipantId,
        _record: NotificationRecord,
    ) -> Result<(), StoreError> {
        offline()
    }

    fn delete_participant(&self, _id: ParticipantId) -> Result<(), StoreError> {
        offline()
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
