use crate::infra::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use regdesk::registration::{
    registration_router, FileStorage, Notifier, RegistrationDesk, RegistryStore, StorageKey,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub(crate) fn with_registration_routes<S, F, N>(desk: Arc<RegistrationDesk<S, F, N>>) -> Router
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    let files = Router::new()
        .route("/files/:key", get(download_endpoint::<S, F, N>))
        .with_state(Arc::clone(&desk));

    registration_router(desk)
        .merge(files)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Serves a stored upload by its storage key.
pub(crate) async fn download_endpoint<S, F, N>(
    State(desk): State<Arc<RegistrationDesk<S, F, N>>>,
    Path(key): Path<String>,
) -> Response
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not_found", "message": "no upload under that key" })),
        )
            .into_response()
    };

    let Some(path) = desk.files().resolve_path(&StorageKey(key)) else {
        return not_found();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (StatusCode::OK, [(header::CONTENT_TYPE, mime.to_string())], bytes).into_response()
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "stored upload unreadable");
            not_found()
        }
    }
}
