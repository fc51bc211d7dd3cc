use crate::cli::ServeArgs;
use crate::infra::{
    AppState, InMemoryApplicationRepository, InMemoryDocumentGenerator, InMemoryPaymentInitiator,
};
use crate::routes::with_application_routes;
use admissions::config::AppConfig;
use admissions::error::AppError;
use admissions::telemetry;
use admissions::workflows::admission::{AdmissionService, StageGraph};
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::{AtomicBool, Ordering};
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

    telemetry::init(&config.telemetry, config.environment)?;

    let graph = Arc::new(StageGraph::try_standard()?);
    info!(stages = graph.stages().count(), "admission stage graph validated");

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let admission_service = Arc::new(AdmissionService::new(
        graph,
        Arc::new(InMemoryApplicationRepository::default()),
        Arc::new(InMemoryPaymentInitiator::default()),
        Arc::new(InMemoryDocumentGenerator::default()),
        &config.workflow,
    ));

    let app = with_application_routes(admission_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        conflict_retries = config.workflow.conflict_retries,
        "admissions workflow service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
