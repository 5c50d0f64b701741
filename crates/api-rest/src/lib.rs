//! # API REST
//!
//! REST API for SSV.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - Mapping of core errors to status codes
//!
//! Uses `api-shared` for the wire types and `ssv-core` for everything else. The router is built
//! here and served by the `ssv-run` binary.

#![warn(rust_2018_idioms)]

use api_shared::{
    DeleteRes, DeletedStudyEntry, ErrorRes, HealthRes, HealthService, PublicationEntry,
    RejectedRes, StatusRes, StudyEntry, StudyStatusEntry, SubmitReq, SubmitRes,
    UpdatePublicationReq,
};
use axum::{
    extract::{rejection::JsonRejection, Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use ssv_core::{CallbackId, Submission, SubmissionError, SubmissionService};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Stamp used for every study in a deletion response.
const DELETED_STATUS: &str = "DELETED";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SubmissionService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(health, submit, status, update_publication, delete),
    components(schemas(
        HealthRes,
        SubmitReq,
        StudyEntry,
        SubmitRes,
        RejectedRes,
        StatusRes,
        StudyStatusEntry,
        UpdatePublicationReq,
        PublicationEntry,
        DeleteRes,
        DeletedStudyEntry,
        ErrorRes,
    ))
)]
struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/sum-stats", post(submit))
        .route(
            "/v1/sum-stats/:callback_id",
            get(status).put(update_publication).delete(delete),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, &'static str);

/// Maps a core error to a response, logging anything that is not the caller's fault.
fn api_error(context: &str, e: SubmissionError) -> ApiError {
    match e {
        SubmissionError::PayloadNotFound(_) => (StatusCode::NOT_FOUND, "Payload not found"),
        SubmissionError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
        SubmissionError::StudiesNotInPayload { .. } => {
            (StatusCode::BAD_REQUEST, "Study not part of payload")
        }
        e => {
            tracing::error!("{} error: {:?}", context, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// Path ids that are not canonical callback ids cannot name a payload.
fn parse_callback_id(raw: &str) -> Result<CallbackId, ApiError> {
    CallbackId::parse(raw).map_err(|_| (StatusCode::NOT_FOUND, "Payload not found"))
}

fn bad_body(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorRes {
            message: rejection.body_text(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint.
async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/v1/sum-stats",
    request_body = SubmitReq,
    responses(
        (status = 201, description = "Payload accepted", body = SubmitRes),
        (status = 400, description = "Payload rejected", body = RejectedRes),
        (status = 500, description = "Internal server error")
    )
)]
/// Submits a batch of studies for validation.
///
/// # Returns
/// * `201` with the callback id when every entry passed the batch checks.
/// * `400` with the callback id and every violation otherwise. The rejection is recorded and can
///   be polled like any other payload.
///
/// # Errors
/// Returns `500 Internal Server Error` if the payload could not be recorded or queued.
async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<SubmitReq>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return Ok(bad_body(rejection)),
    };

    match state.service.submit(&req).map_err(|e| api_error("Submit", e))? {
        Submission::Accepted(callback_id) => Ok((
            StatusCode::CREATED,
            Json(SubmitRes {
                callback_id: callback_id.to_string(),
            }),
        )
            .into_response()),
        Submission::Rejected {
            callback_id,
            errors,
        } => Ok((
            StatusCode::BAD_REQUEST,
            Json(RejectedRes {
                callback_id: callback_id.to_string(),
                errors,
            }),
        )
            .into_response()),
    }
}

#[utoipa::path(
    get,
    path = "/v1/sum-stats/{callback_id}",
    params(("callback_id" = String, Path, description = "Callback id returned on submission")),
    responses(
        (status = 200, description = "Payload status", body = StatusRes),
        (status = 404, description = "Unknown callback id"),
        (status = 500, description = "Internal server error")
    )
)]
/// Polls the status of a payload.
async fn status(
    State(state): State<AppState>,
    AxumPath(callback_id): AxumPath<String>,
) -> Result<Json<StatusRes>, ApiError> {
    let callback_id = parse_callback_id(&callback_id)?;
    let report = state
        .service
        .status(&callback_id)
        .map_err(|e| api_error("Status", e))?;
    Ok(Json(report.into()))
}

#[utoipa::path(
    put,
    path = "/v1/sum-stats/{callback_id}",
    params(("callback_id" = String, Path, description = "Callback id returned on submission")),
    request_body = UpdatePublicationReq,
    responses(
        (status = 200, description = "Updated payload status", body = StatusRes),
        (status = 400, description = "Empty update or study outside the payload"),
        (status = 404, description = "Unknown callback id"),
        (status = 500, description = "Internal server error")
    )
)]
/// Attaches publication details to studies of a payload.
///
/// # Errors
/// Returns `400 Bad Request` if the update is empty or names a study that is not part of the
/// payload. Nothing is written in that case.
async fn update_publication(
    State(state): State<AppState>,
    AxumPath(callback_id): AxumPath<String>,
    payload: Result<Json<UpdatePublicationReq>, JsonRejection>,
) -> Result<Response, ApiError> {
    let callback_id = parse_callback_id(&callback_id)?;
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return Ok(bad_body(rejection)),
    };

    let report = state
        .service
        .update_publication(&callback_id, &req)
        .map_err(|e| api_error("Update publication", e))?;
    Ok(Json(StatusRes::from(report)).into_response())
}

#[utoipa::path(
    delete,
    path = "/v1/sum-stats/{callback_id}",
    params(("callback_id" = String, Path, description = "Callback id returned on submission")),
    responses(
        (status = 200, description = "Payload deleted", body = DeleteRes),
        (status = 404, description = "Unknown callback id"),
        (status = 500, description = "Internal server error")
    )
)]
/// Deletes a payload and all of its studies.
async fn delete(
    State(state): State<AppState>,
    AxumPath(callback_id): AxumPath<String>,
) -> Result<Json<DeleteRes>, ApiError> {
    let callback_id = parse_callback_id(&callback_id)?;
    let report = state
        .service
        .delete(&callback_id)
        .map_err(|e| api_error("Delete", e))?;

    Ok(Json(DeleteRes {
        callback_id: report.callback_id.to_string(),
        status_list: report
            .deleted
            .into_iter()
            .map(|id| DeletedStudyEntry {
                id: id.to_string(),
                status: DELETED_STATUS.into(),
            })
            .collect(),
    }))
}
