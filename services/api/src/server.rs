use crate::cli::ServeArgs;
use crate::infra::{AppState, LocalFileStorage, LoggingNotifier};
use crate::routes::with_registration_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use regdesk::config::AppConfig;
use regdesk::error::AppError;
use regdesk::registration::{MemoryRegistry, RegistrationDesk};
use regdesk::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let registration = &config.registration;
    let files = Arc::new(LocalFileStorage::open(
        &registration.upload_dir,
        registration.max_upload_bytes,
    )?);
    let desk = Arc::new(RegistrationDesk::new(
        Arc::new(MemoryRegistry::new()),
        files,
        Arc::new(LoggingNotifier::default()),
        registration.max_tree_depth,
    ));

    let app = with_registration_routes(desk)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        upload_dir = %registration.upload_dir.display(),
        "registration desk ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
