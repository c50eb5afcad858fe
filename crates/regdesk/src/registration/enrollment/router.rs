use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::collaborators::{FileStorage, Notifier};
use crate::registration::attributes::CatalogError;
use crate::registration::desk::RegistrationDesk;
use crate::registration::domain::{
    AttributeDraft, AttributeId, AttributeType, BlockDraft, BlockId, BlockPatch, EventId,
    FormDraft, FormId, NotificationTrigger, Participant, ParticipantId, ParticipantToken,
    RawValue, Submission,
};
use crate::registration::error::EnrollmentError;
use crate::registration::store::{RegistryStore, StoreError};

type DeskState<S, F, N> = State<Arc<RegistrationDesk<S, F, N>>>;

/// Router builder exposing catalog administration, submission, tree and admission endpoints.
pub fn registration_router<S, F, N>(desk: Arc<RegistrationDesk<S, F, N>>) -> Router
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    Router::new()
        .route("/api/v1/events", post(create_event_handler::<S, F, N>))
        .route(
            "/api/v1/events/:event_id/attributes",
            post(declare_attribute_handler::<S, F, N>),
        )
        .route(
            "/api/v1/events/:event_id/forms",
            post(create_form_handler::<S, F, N>),
        )
        .route(
            "/api/v1/events/:event_id/labels",
            put(set_labels_handler::<S, F, N>),
        )
        .route(
            "/api/v1/events/:event_id/triggers",
            post(add_trigger_handler::<S, F, N>),
        )
        .route(
            "/api/v1/events/:event_id/forms/:form_id/submissions",
            post(submit_handler::<S, F, N>),
        )
        .route(
            "/api/v1/events/:event_id/participants/:token",
            get(participant_handler::<S, F, N>).delete(withdraw_handler::<S, F, N>),
        )
        .route(
            "/api/v1/attributes/:attribute_id",
            patch(change_type_handler::<S, F, N>).delete(delete_attribute_handler::<S, F, N>),
        )
        .route(
            "/api/v1/attributes/:attribute_id/tree",
            get(tree_handler::<S, F, N>),
        )
        .route(
            "/api/v1/attributes/:attribute_id/blocks",
            post(create_block_handler::<S, F, N>),
        )
        .route(
            "/api/v1/attributes/:attribute_id/blocks/:block_id/admission",
            get(admission_handler::<S, F, N>),
        )
        .route(
            "/api/v1/blocks/:block_id",
            patch(update_block_handler::<S, F, N>).delete(remove_block_handler::<S, F, N>),
        )
        .with_state(desk)
}

/// Submission body; a `token` routes to the follow-up path, otherwise `email` registers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub token: Option<ParticipantToken>,
    #[serde(default)]
    pub fields: BTreeMap<String, RawValue>,
}

/// Participant as returned to the submitter.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub participant_id: ParticipantId,
    pub token: ParticipantToken,
    pub email: String,
    pub values: BTreeMap<AttributeId, String>,
    pub notifications_sent: usize,
    pub created_at: DateTime<Utc>,
}

impl From<Participant> for ParticipantView {
    fn from(participant: Participant) -> Self {
        Self {
            participant_id: participant.id,
            token: participant.token,
            email: participant.email,
            values: participant.values,
            notifications_sent: participant.notifications.len(),
            created_at: participant.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockRequest {
    #[serde(default)]
    pub parent_id: Option<BlockId>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub order: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    pub name: String,
}

/// Attributes labelling occupants in the tree view, in display order.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelsRequest {
    pub attribute_ids: Vec<AttributeId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeTypeRequest {
    pub attribute_type: AttributeType,
    #[serde(default)]
    pub options: Vec<String>,
}

pub(crate) async fn submit_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path((event_id, form_id)): Path<(u64, u64)>,
    Json(request): Json<SubmissionRequest>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    let (event_id, form_id) = (EventId(event_id), FormId(form_id));
    let submission = Submission {
        fields: request.fields,
    };

    // Uploads hit the file store synchronously.
    let outcome = tokio::task::spawn_blocking(move || match (request.token, request.email) {
        (Some(token), _) => desk
            .coordinator
            .submit_subsequent_form(event_id, form_id, &token, submission)
            .map(|participant| (StatusCode::OK, participant)),
        (None, Some(email)) => desk
            .coordinator
            .submit_first_form(event_id, form_id, &email, submission)
            .map(|participant| (StatusCode::CREATED, participant)),
        (None, None) => Err(EnrollmentError::invalid(
            "email",
            "an email or participant token is required",
        )),
    })
    .await;

    match outcome {
        Ok(Ok((status, participant))) => {
            (status, Json(ParticipantView::from(participant))).into_response()
        }
        Ok(Err(err)) => enrollment_error_response(err),
        Err(err) => {
            error!(%event_id, %form_id, error = %err, "submission task failed");
            let payload = json!({
                "error": "internal",
                "message": "submission could not be processed",
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn participant_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path((event_id, token)): Path<(u64, String)>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk
        .coordinator
        .participant(EventId(event_id), &ParticipantToken(token))
    {
        Ok(participant) => (StatusCode::OK, Json(ParticipantView::from(participant))).into_response(),
        Err(err) => enrollment_error_response(err),
    }
}

pub(crate) async fn withdraw_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path((event_id, token)): Path<(u64, String)>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk
        .coordinator
        .withdraw(EventId(event_id), &ParticipantToken(token))
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => enrollment_error_response(err),
    }
}

pub(crate) async fn tree_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(attribute_id): Path<u64>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk.trees.load_tree(AttributeId(attribute_id)) {
        Ok(tree) => (StatusCode::OK, Json(tree)).into_response(),
        Err(err) => enrollment_error_response(err.into()),
    }
}

pub(crate) async fn admission_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path((attribute_id, block_id)): Path<(u64, u64)>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk
        .oracle
        .admission(AttributeId(attribute_id), BlockId(block_id))
    {
        Ok(admission) => (StatusCode::OK, Json(admission)).into_response(),
        Err(err) => enrollment_error_response(err.into()),
    }
}

pub(crate) async fn create_event_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Json(request): Json<EventRequest>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk.catalog.create_event(&request.name) {
        Ok(event) => (StatusCode::CREATED, Json(event)).into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) async fn declare_attribute_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(event_id): Path<u64>,
    Json(draft): Json<AttributeDraft>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk.catalog.declare_attribute(EventId(event_id), draft) {
        Ok(attribute) => (StatusCode::CREATED, Json(attribute)).into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) async fn create_form_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(event_id): Path<u64>,
    Json(draft): Json<FormDraft>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk.catalog.create_form(EventId(event_id), draft) {
        Ok(form) => (StatusCode::CREATED, Json(form)).into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) async fn set_labels_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(event_id): Path<u64>,
    Json(request): Json<LabelsRequest>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk
        .catalog
        .set_label_attributes(EventId(event_id), request.attribute_ids)
    {
        Ok(event) => (StatusCode::OK, Json(event)).into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) async fn add_trigger_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(event_id): Path<u64>,
    Json(trigger): Json<NotificationTrigger>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk.catalog.add_trigger(EventId(event_id), trigger) {
        Ok(event) => (StatusCode::CREATED, Json(event)).into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) async fn delete_attribute_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(attribute_id): Path<u64>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk.catalog.delete_attribute(AttributeId(attribute_id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) async fn create_block_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(attribute_id): Path<u64>,
    Json(request): Json<BlockRequest>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    let attribute_id = AttributeId(attribute_id);
    let draft = BlockDraft {
        description: request.description,
        capacity: request.capacity,
        order: request.order,
        ..BlockDraft::new(attribute_id, request.name)
    };

    match desk.catalog.add_block(attribute_id, request.parent_id, draft) {
        Ok(block) => (StatusCode::CREATED, Json(block)).into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) async fn update_block_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(block_id): Path<u64>,
    Json(patch): Json<BlockPatch>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk.catalog.update_block(BlockId(block_id), patch) {
        Ok(block) => (StatusCode::OK, Json(block)).into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) async fn remove_block_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(block_id): Path<u64>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk.catalog.remove_block(BlockId(block_id)) {
        Ok(removed) => (StatusCode::OK, Json(json!({ "removed": removed }))).into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) async fn change_type_handler<S, F, N>(
    State(desk): DeskState<S, F, N>,
    Path(attribute_id): Path<u64>,
    Json(request): Json<AttributeTypeRequest>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    match desk.catalog.change_attribute_type(
        AttributeId(attribute_id),
        request.attribute_type,
        request.options,
    ) {
        Ok(attribute) => (StatusCode::OK, Json(attribute)).into_response(),
        Err(err) => catalog_error_response(err),
    }
}

pub(crate) fn enrollment_error_response(err: EnrollmentError) -> Response {
    let status = match &err {
        EnrollmentError::NotFound { .. } => StatusCode::NOT_FOUND,
        EnrollmentError::MissingRequiredFields(_) | EnrollmentError::InvalidValue { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EnrollmentError::BlockFull { .. } | EnrollmentError::DuplicateEmail { .. } => {
            StatusCode::CONFLICT
        }
        EnrollmentError::Storage(_)
        | EnrollmentError::Structural { .. }
        | EnrollmentError::Repository(_) => {
            error!(code = err.code(), error = %err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let mut payload = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    match &err {
        EnrollmentError::MissingRequiredFields(missing) => payload["missing"] = json!(missing),
        EnrollmentError::BlockFull {
            attribute_id,
            block_id,
        } => {
            payload["attribute_id"] = json!(attribute_id);
            payload["block_id"] = json!(block_id);
        }
        _ => {}
    }
    (status, Json(payload)).into_response()
}

pub(crate) fn catalog_error_response(err: CatalogError) -> Response {
    let (status, code) = match &err {
        CatalogError::Store(StoreError::NotFound { .. }) => (StatusCode::NOT_FOUND, "not_found"),
        CatalogError::Store(StoreError::Unavailable(_)) => {
            error!(error = %err, "catalog request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "repository_unavailable")
        }
        CatalogError::Store(_) | CatalogError::RootRemoval(_) => (StatusCode::CONFLICT, "conflict"),
        CatalogError::NotBlockTyped(_) | CatalogError::ForeignAttribute { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request")
        }
    };
    let payload = json!({
        "error": code,
        "message": err.to_string(),
    });
    (status, Json(payload)).into_response()
}
