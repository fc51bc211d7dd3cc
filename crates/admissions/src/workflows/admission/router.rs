use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::actions::{
    ActionError, AssessmentRequest, DocumentGenerator, PaymentInitiator, PaymentRequest,
};
use super::engine::TransitionError;
use super::record::{
    ApplicantDetails, ApplicationId, ApplicationNumber, ApplicationRecord, ApplicationStatusView,
};
use super::repository::{ApplicationRepository, RepositoryError};
use super::service::{AdmissionService, AdmissionServiceError};
use super::stage::{Stage, StageDefinition};

/// Header carrying the identity supplied by the upstream auth layer.
pub const ACTOR_HEADER: &str = "x-actor";

type SharedService<R, P, D> = Arc<AdmissionService<R, P, D>>;

/// Router builder exposing the admission workflow over HTTP.
pub fn admission_router<R, P, D>(service: SharedService<R, P, D>) -> Router
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    Router::new()
        .route("/api/v1/admissions/stages", get(stages_handler::<R, P, D>))
        .route(
            "/api/v1/admissions/applications",
            post(submit_handler::<R, P, D>).get(list_handler::<R, P, D>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id",
            get(record_handler::<R, P, D>),
        )
        .route(
            "/api/v1/admissions/numbers/:application_number",
            get(number_handler::<R, P, D>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/details",
            put(update_details_handler::<R, P, D>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/actions",
            get(actions_handler::<R, P, D>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/transitions",
            post(transition_handler::<R, P, D>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/actions/schedule-assessment",
            post(schedule_assessment_handler::<R, P, D>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/actions/initiate-payment",
            post(initiate_payment_handler::<R, P, D>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/actions/generate-offer-letter",
            post(generate_offer_letter_handler::<R, P, D>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransitionBody {
    pub(crate) to_stage: Stage,
    #[serde(default)]
    pub(crate) notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    pub(crate) stage: Stage,
}

#[derive(Debug, Serialize)]
struct ActionResponse<T> {
    #[serde(flatten)]
    application: ApplicationRecord,
    artifact: T,
}

pub(crate) async fn stages_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    let stages: Vec<&StageDefinition> = service.graph().stages().collect();
    (StatusCode::OK, Json(stages)).into_response()
}

pub(crate) async fn submit_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Json(details): Json<ApplicantDetails>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    match service.submit(details) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn list_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Query(query): Query<ListQuery>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    match service.list_in_stage(query.stage) {
        Ok(records) => {
            let views: Vec<ApplicationStatusView> =
                records.iter().map(ApplicationRecord::status_view).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn record_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    match service.get(&ApplicationId(application_id)) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn number_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Path(application_number): Path<String>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    match service.find_by_number(&ApplicationNumber(application_number)) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn update_details_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
    Json(details): Json<ApplicantDetails>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match service.update_details(&ApplicationId(application_id), details, &actor) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn actions_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    match service.available_actions(&ApplicationId(application_id)) {
        Ok(actions) => (StatusCode::OK, Json(actions)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn transition_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TransitionBody>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    let id = ApplicationId(application_id);
    match service.transition(&id, body.to_stage, body.notes, &actor) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn schedule_assessment_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AssessmentRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match service.schedule_assessment(&ApplicationId(application_id), request, &actor) {
        Ok(outcome) => action_response(outcome.record, outcome.artifact),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn initiate_payment_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PaymentRequest>,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match service.initiate_payment(&ApplicationId(application_id), request, &actor) {
        Ok(outcome) => action_response(outcome.record, outcome.artifact),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn generate_offer_letter_handler<R, P, D>(
    State(service): State<SharedService<R, P, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: ApplicationRepository + 'static,
    P: PaymentInitiator + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match service.generate_offer_letter(&ApplicationId(application_id), &actor) {
        Ok(outcome) => action_response(outcome.record, outcome.artifact),
        Err(err) => error_response(err),
    }
}

fn actor_from(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            let payload = json!({
                "error": format!("missing {ACTOR_HEADER} header"),
            });
            (StatusCode::BAD_REQUEST, Json(payload)).into_response()
        })
}

fn action_response<T: Serialize>(application: ApplicationRecord, artifact: T) -> Response {
    (
        StatusCode::OK,
        Json(ActionResponse {
            application,
            artifact,
        }),
    )
        .into_response()
}

pub(crate) fn error_response(err: AdmissionServiceError) -> Response {
    let status = match &err {
        AdmissionServiceError::InvalidDetails(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AdmissionServiceError::RecordLocked { .. } => StatusCode::CONFLICT,
        AdmissionServiceError::NumberNotFound(_) => StatusCode::NOT_FOUND,
        AdmissionServiceError::Transition(TransitionError::NotFound(_)) => StatusCode::NOT_FOUND,
        AdmissionServiceError::Transition(TransitionError::IllegalTransition { from, to }) => {
            let payload = json!({
                "error": err.to_string(),
                "from": from,
                "to": to,
            });
            return (StatusCode::CONFLICT, Json(payload)).into_response();
        }
        AdmissionServiceError::Transition(TransitionError::ConcurrentModification(_)) => {
            StatusCode::PRECONDITION_FAILED
        }
        AdmissionServiceError::Transition(TransitionError::Graph(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        AdmissionServiceError::Transition(TransitionError::Repository(err))
        | AdmissionServiceError::Repository(err) => repository_status(err),
        AdmissionServiceError::Action(ActionError::Unavailable { .. }) => StatusCode::CONFLICT,
        AdmissionServiceError::Action(ActionError::Validation { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AdmissionServiceError::Action(ActionError::ActionFailed { .. }) => StatusCode::BAD_GATEWAY,
        AdmissionServiceError::Action(ActionError::Transition(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let payload = json!({
        "error": err.to_string(),
    });
    (status, Json(payload)).into_response()
}

fn repository_status(err: &RepositoryError) -> StatusCode {
    match err {
        RepositoryError::Conflict => StatusCode::CONFLICT,
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::VersionMismatch { .. } => StatusCode::PRECONDITION_FAILED,
        RepositoryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
