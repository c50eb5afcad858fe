//! End-to-end enrollment scenarios driven through the public engine facade.

mod common {
    use std::sync::{Arc, Mutex};

    use regdesk::registration::domain::{
        Attribute, AttributeDraft, AttributeType, Block, BlockDraft, Event, Form, FormDraft,
        FormField, RawValue, ResolvedKind, ResolvedValue, Submission, Upload,
    };
    use regdesk::registration::store::{EnrollmentCommit, EnrollmentTarget, ParticipantStore};
    use regdesk::registration::{
        AttributeCatalog, FileStorage, MemoryRegistry, Notification, Notifier, NotifyError,
        ParticipantToken, RegistrationDesk, StorageError, StorageKey,
    };

    #[derive(Default)]
    pub(super) struct CountingFiles {
        stored: Mutex<Vec<StorageKey>>,
        discarded: Mutex<Vec<StorageKey>>,
    }

    impl CountingFiles {
        pub(super) fn live(&self) -> usize {
            let stored = self.stored.lock().expect("files mutex poisoned").len();
            let discarded = self.discarded.lock().expect("files mutex poisoned").len();
            stored - discarded
        }
    }

    impl FileStorage for CountingFiles {
        fn store(&self, upload: &Upload) -> Result<StorageKey, StorageError> {
            let mut stored = self.stored.lock().expect("files mutex poisoned");
            let key = StorageKey(format!("{}-{}", stored.len(), upload.file_name));
            stored.push(key.clone());
            Ok(key)
        }

        fn resolve_path(&self, _key: &StorageKey) -> Option<std::path::PathBuf> {
            None
        }

        fn discard(&self, key: &StorageKey) -> Result<(), StorageError> {
            self.discarded
                .lock()
                .expect("files mutex poisoned")
                .push(key.clone());
            Ok(())
        }
    }

    /// File store that lets a rival enrollment commit while an upload is being written,
    /// after the submission's own capacity check has already passed.
    pub(super) struct RivalFiles {
        store: Arc<MemoryRegistry>,
        rival: Mutex<Option<EnrollmentCommit>>,
        stored: Mutex<Vec<StorageKey>>,
        discarded: Mutex<Vec<StorageKey>>,
    }

    impl RivalFiles {
        pub(super) fn new(store: Arc<MemoryRegistry>) -> Self {
            Self {
                store,
                rival: Mutex::new(None),
                stored: Mutex::new(Vec::new()),
                discarded: Mutex::new(Vec::new()),
            }
        }

        /// Queue a rival who takes `block` under `email` during the next upload.
        pub(super) fn arm(&self, event: &Event, email: &str, block: &Block) {
            let commit = EnrollmentCommit {
                target: EnrollmentTarget::Create {
                    event_id: event.id,
                    email: email.to_string(),
                    token: ParticipantToken::generate(),
                },
                values: vec![ResolvedValue {
                    attribute_id: block.attribute_id,
                    value: block.id.as_value(),
                    kind: ResolvedKind::Block(block.id),
                }],
            };
            *self.rival.lock().expect("rival mutex poisoned") = Some(commit);
        }

        pub(super) fn stored(&self) -> Vec<StorageKey> {
            self.stored.lock().expect("files mutex poisoned").clone()
        }

        pub(super) fn discarded(&self) -> Vec<StorageKey> {
            self.discarded.lock().expect("files mutex poisoned").clone()
        }
    }

    impl FileStorage for RivalFiles {
        fn store(&self, upload: &Upload) -> Result<StorageKey, StorageError> {
            let rival = self.rival.lock().expect("rival mutex poisoned").take();
            if let Some(commit) = rival {
                self.store.commit_enrollment(commit).expect("rival enrolled");
            }
            let key = StorageKey(upload.file_name.clone());
            self.stored
                .lock()
                .expect("files mutex poisoned")
                .push(key.clone());
            Ok(key)
        }

        fn resolve_path(&self, _key: &StorageKey) -> Option<std::path::PathBuf> {
            None
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
    pub(super) struct SilentNotifier;

    impl Notifier for SilentNotifier {
        fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    pub(super) type Desk<F> = RegistrationDesk<MemoryRegistry, F, SilentNotifier>;

    pub(super) struct Retreat<F = CountingFiles> {
        pub desk: Arc<Desk<F>>,
        pub store: Arc<MemoryRegistry>,
        pub files: Arc<F>,
        pub event: Event,
        pub cabin: Attribute,
        pub dinner: Attribute,
        pub signup: Form,
        pub lakeside: Block,
        pub table: Block,
    }

    /// Retreat with a three-bed lakeside cabin and a single-seat dinner table.
    pub(super) fn retreat() -> Retreat {
        retreat_with(|_| CountingFiles::default())
    }

    pub(super) fn retreat_with<F, B>(build_files: B) -> Retreat<F>
    where
        F: FileStorage + 'static,
        B: FnOnce(Arc<MemoryRegistry>) -> F,
    {
        let store = Arc::new(MemoryRegistry::new());
        let files = Arc::new(build_files(Arc::clone(&store)));
        let catalog = AttributeCatalog::new(Arc::clone(&store));

        let event = catalog.create_event("Spring retreat").expect("event");
        let name = catalog
            .declare_attribute(event.id, AttributeDraft::new("Name", "name", AttributeType::Text))
            .expect("name");
        let badge = catalog
            .declare_attribute(event.id, AttributeDraft::new("Badge photo", "badge", AttributeType::File))
            .expect("badge");
        let cabin = catalog
            .declare_attribute(event.id, AttributeDraft::new("Cabin", "cabin", AttributeType::Block))
            .expect("cabin");
        let dinner = catalog
            .declare_attribute(event.id, AttributeDraft::new("Dinner", "dinner", AttributeType::Block))
            .expect("dinner");

        let lakeside = catalog
            .add_block(cabin.id, None, BlockDraft::new(cabin.id, "Lakeside").capacity(3))
            .expect("lakeside");
        let table = catalog
            .add_block(dinner.id, None, BlockDraft::new(dinner.id, "Captain's table").capacity(1))
            .expect("table");

        let signup = catalog
            .create_form(
                event.id,
                FormDraft {
                    name: "Register".to_string(),
                    is_first: true,
                    fields: vec![
                        FormField::required(name.id),
                        FormField::optional(badge.id),
                        FormField::required(cabin.id),
                        FormField::optional(dinner.id),
                    ],
                },
            )
            .expect("form");

        let desk = Arc::new(RegistrationDesk::new(
            Arc::clone(&store),
            Arc::clone(&files),
            Arc::new(SilentNotifier),
            64,
        ));

        Retreat {
            desk,
            store,
            files,
            event,
            cabin,
            dinner,
            signup,
            lakeside,
            table,
        }
    }

    pub(super) fn cabin_submission(name: &str, cabin: &Block) -> Submission {
        Submission::new()
            .with("name", RawValue::text(name))
            .with("cabin", RawValue::text(cabin.id.as_value()))
    }

    pub(super) fn badge(file_name: &str) -> RawValue {
        RawValue::Upload(Upload {
            file_name: file_name.to_string(),
            content_type: Some("image/png".to_string()),
            data: vec![0x89, 0x50, 0x4e, 0x47],
        })
    }
}

use std::sync::Arc;
use std::thread;

use common::*;
use regdesk::registration::domain::RawValue;
use regdesk::registration::store::ParticipantStore;
use regdesk::registration::{EnrollmentError, StorageKey};

#[test]
fn concurrent_submissions_never_overbook_a_block() {
    let retreat = retreat();
    let attempts = 24;

    let outcomes: Vec<Result<(), EnrollmentError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..attempts)
            .map(|index| {
                let desk = Arc::clone(&retreat.desk);
                let event_id = retreat.event.id;
                let form_id = retreat.signup.id;
                let lakeside = retreat.lakeside.clone();
                scope.spawn(move || {
                    desk.coordinator
                        .submit_first_form(
                            event_id,
                            form_id,
                            &format!("guest{index}@example.org"),
                            cabin_submission(&format!("Guest {index}"), &lakeside),
                        )
                        .map(|_| ())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("submission thread panicked"))
            .collect()
    });

    let admitted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let refused = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Err(EnrollmentError::BlockFull { .. })))
        .count();
    assert_eq!(admitted, 3);
    assert_eq!(refused, attempts - 3);

    let tree = retreat
        .desk
        .trees
        .load_tree(retreat.cabin.id)
        .expect("tree loads");
    let lakeside = tree.find(retreat.lakeside.id).expect("lakeside node");
    assert_eq!(lakeside.occupant_count, 3);
}

#[test]
fn rejected_submission_writes_nothing() {
    let retreat = retreat();
    let coordinator = &retreat.desk.coordinator;
    coordinator
        .submit_first_form(
            retreat.event.id,
            retreat.signup.id,
            "captain@example.org",
            cabin_submission("Captain", &retreat.lakeside)
                .with("dinner", RawValue::text(retreat.table.id.as_value())),
        )
        .expect("captain seated");

    let err = coordinator
        .submit_first_form(
            retreat.event.id,
            retreat.signup.id,
            "mate@example.org",
            cabin_submission("Mate", &retreat.lakeside)
                .with("badge", badge("mate.png"))
                .with("dinner", RawValue::text(retreat.table.id.as_value())),
        )
        .expect_err("table is taken");

    assert!(matches!(err, EnrollmentError::BlockFull { block_id, .. } if block_id == retreat.table.id));
    let admission = retreat
        .desk
        .oracle
        .admission(retreat.cabin.id, retreat.lakeside.id)
        .expect("admission");
    assert_eq!(admission.occupied, 1);
    assert_eq!(retreat.files.live(), 0);
}

#[test]
fn missing_required_block_is_reported_by_name() {
    let retreat = retreat();

    let err = retreat
        .desk
        .coordinator
        .submit_first_form(
            retreat.event.id,
            retreat.signup.id,
            "guest@example.org",
            regdesk::registration::Submission::new().with("name", RawValue::text("Guest")),
        )
        .expect_err("cabin missing");

    assert_eq!(err.to_string(), "missing required fields: Cabin");
}

#[test]
fn accepted_upload_is_kept() {
    let retreat = retreat();

    let participant = retreat
        .desk
        .coordinator
        .submit_first_form(
            retreat.event.id,
            retreat.signup.id,
            "guest@example.org",
            cabin_submission("Guest", &retreat.lakeside).with("badge", badge("guest.png")),
        )
        .expect("registered");

    assert_eq!(retreat.files.live(), 1);
    assert!(participant
        .values
        .values()
        .any(|value| value.ends_with("guest.png")));
    assert!(participant.value(retreat.dinner.id).is_none());
}

#[test]
fn seat_taken_during_upload_fails_at_commit_and_discards_the_upload() {
    let retreat = retreat_with(RivalFiles::new);
    retreat
        .files
        .arm(&retreat.event, "rival@example.org", &retreat.table);

    let err = retreat
        .desk
        .coordinator
        .submit_first_form(
            retreat.event.id,
            retreat.signup.id,
            "mate@example.org",
            cabin_submission("Mate", &retreat.lakeside)
                .with("badge", badge("mate.png"))
                .with("dinner", RawValue::text(retreat.table.id.as_value())),
        )
        .expect_err("rival took the table first");

    assert!(matches!(err, EnrollmentError::BlockFull { block_id, .. } if block_id == retreat.table.id));
    let table = retreat
        .desk
        .oracle
        .admission(retreat.dinner.id, retreat.table.id)
        .expect("admission");
    assert_eq!(table.occupied, 1);
    assert!(retreat
        .store
        .participant_by_email(retreat.event.id, "mate@example.org")
        .expect("lookup")
        .is_none());
    assert_eq!(retreat.files.stored(), vec![StorageKey("mate.png".to_string())]);
    assert_eq!(retreat.files.discarded(), retreat.files.stored());
}

#[test]
fn email_claimed_during_upload_fails_at_commit_and_discards_the_upload() {
    let retreat = retreat_with(RivalFiles::new);
    retreat
        .files
        .arm(&retreat.event, "mate@example.org", &retreat.lakeside);

    let err = retreat
        .desk
        .coordinator
        .submit_first_form(
            retreat.event.id,
            retreat.signup.id,
            "Mate@Example.org",
            cabin_submission("Mate", &retreat.lakeside).with("badge", badge("mate.png")),
        )
        .expect_err("rival registered the address first");

    assert!(matches!(err, EnrollmentError::DuplicateEmail { ref email } if email == "mate@example.org"));
    let lakeside = retreat
        .desk
        .oracle
        .admission(retreat.cabin.id, retreat.lakeside.id)
        .expect("admission");
    assert_eq!(lakeside.occupied, 1);
    assert_eq!(retreat.files.discarded(), vec![StorageKey("mate.png".to_string())]);
}
