//! # API REST
//!
//! Internal metadata API for TrueDiagnostics.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status codes)
//!
//! Every endpoint except `/health` reads the caller's vault credential from the
//! `X-TV-Access-Token` header and establishes a [`Session`] before doing anything else.

#![warn(rust_2018_idioms)]

use api_shared::{
    parse_access_token, AssociatePatientReq, CaseDocumentRes, CaseRes, CaseViewRes, CasesRes,
    CreateCaseReq, DashboardStatsRes, DiagnosisRes, DoctorResponseTimeRes, ErrorRes,
    HealthRes, HealthService, InboxEntryRes, InboxRes, ReviewCaseReq, StageStatsRes,
    ACCESS_TOKEN_HEADER,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use td_core::{CaseError, CaseService, ErrorKind, NewCase, NewPatient, Session};
use td_types::DocumentId;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state for the REST API server.
#[derive(Clone)]
pub struct AppState {
    service: CaseService,
}

impl AppState {
    pub fn new(service: CaseService) -> Self {
        Self { service }
    }
}

type ApiError = (StatusCode, Json<ErrorRes>);
type ApiResult<T> = Result<T, ApiError>;

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        create_case,
        assigned_cases,
        patient_case,
        cases_by_ids,
        view_case,
        review_case,
        approve_case,
        associate_patient,
        doctor_inbox,
        dashboard_stats,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        CreateCaseReq,
        ReviewCaseReq,
        AssociatePatientReq,
        CaseRes,
        CasesRes,
        CaseDocumentRes,
        DiagnosisRes,
        CaseViewRes,
        InboxEntryRes,
        InboxRes,
        DoctorResponseTimeRes,
        StageStatsRes,
        DashboardStatsRes,
    ))
)]
pub struct ApiDoc;

/// Builds the router with every endpoint, Swagger UI and permissive CORS.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/case", post(create_case))
        .route("/api/case/mine", get(assigned_cases))
        .route("/api/case/patient", get(patient_case))
        .route("/api/case/id/:id", get(cases_by_ids))
        .route("/api/case/id/:id/view", get(view_case))
        .route("/api/case/id/:id/review", post(review_case))
        .route("/api/case/id/:id/approve", post(approve_case))
        .route("/api/case/id/:id/patient", post(associate_patient))
        .route("/api/inbox", get(doctor_inbox))
        .route("/api/dashboard/stats", get(dashboard_stats))
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// ERRORS AND SESSIONS
// ============================================================================

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidAssignment | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::UpstreamFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Logs a failed operation and converts it into a status and error body.
///
/// Local storage failures are reported without detail.
fn failure(context: &str, err: CaseError) -> ApiError {
    let kind = err.kind();
    let status = status_for(kind);
    if status.is_server_error() {
        tracing::error!("{} error: {:?}", context, err);
    } else {
        tracing::warn!("{} rejected: {}", context, err);
    }

    let message = match kind {
        ErrorKind::Internal => "Internal error".to_owned(),
        _ => err.to_string(),
    };
    (
        status,
        Json(ErrorRes {
            kind: kind.to_string(),
            message,
        }),
    )
}

async fn session(state: &AppState, headers: &HeaderMap) -> ApiResult<Session> {
    let raw = headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    let token = parse_access_token(raw)
        .map_err(|e| failure("Authenticate", CaseError::Unauthenticated(e.to_string())))?;
    state
        .service
        .session(token)
        .await
        .map_err(|e| failure("Authenticate", e))
}

fn case_id(raw: &str) -> ApiResult<DocumentId> {
    DocumentId::parse(raw).map_err(|e| failure("Parse case id", e.into()))
}

// ============================================================================
// HANDLERS
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for load balancers and monitoring.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/api/case",
    request_body = CreateCaseReq,
    params(("x-tv-access-token" = String, Header, description = "Caller's vault access token")),
    responses(
        (status = 201, description = "Case created", body = CaseRes),
        (status = 400, description = "Invalid ids, or approver and reviewer are the same user", body = ErrorRes),
        (status = 401, description = "Missing or invalid access token", body = ErrorRes),
        (status = 403, description = "Caller is not an admin", body = ErrorRes),
        (status = 502, description = "Vault failure", body = ErrorRes)
    )
)]
/// Create a case from vault documents that already exist
///
/// Provisions the case's read and reviewer groups and stores the workflow metadata.
///
/// # Errors
/// Returns `400 Bad Request` if an id is malformed or the same doctor is named as both
/// approver and reviewer; nothing is created in that case.
#[axum::debug_handler]
async fn create_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateCaseReq>,
) -> ApiResult<(StatusCode, Json<CaseRes>)> {
    let session = session(&state, &headers).await?;
    let new_case = NewCase::try_from(req).map_err(|e| failure("Create case", e))?;
    let record = state
        .service
        .create_case(&session, new_case)
        .await
        .map_err(|e| failure("Create case", e))?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

#[utoipa::path(
    get,
    path = "/api/case/mine",
    params(("x-tv-access-token" = String, Header, description = "Caller's vault access token")),
    responses(
        (status = 200, description = "Cases waiting on the calling doctor", body = CasesRes),
        (status = 401, description = "Missing or invalid access token", body = ErrorRes),
        (status = 403, description = "Caller is not a doctor", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn assigned_cases(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<CasesRes>> {
    let session = session(&state, &headers).await?;
    let records = state
        .service
        .assigned_cases(&session)
        .await
        .map_err(|e| failure("List assigned cases", e))?;
    Ok(Json(CasesRes::from_records(records)))
}

#[utoipa::path(
    get,
    path = "/api/case/patient",
    params(("x-tv-access-token" = String, Header, description = "Caller's vault access token")),
    responses(
        (status = 200, description = "The calling patient's case", body = CaseRes),
        (status = 403, description = "Caller is not a patient", body = ErrorRes),
        (status = 404, description = "No case for this patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn patient_case(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<CaseRes>> {
    let session = session(&state, &headers).await?;
    let record = state
        .service
        .patient_case(&session)
        .await
        .map_err(|e| failure("Read patient case", e))?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    get,
    path = "/api/case/id/{id}",
    params(
        ("id" = String, Path, description = "Comma-separated case document ids"),
        ("x-tv-access-token" = String, Header, description = "Caller's vault access token")
    ),
    responses(
        (status = 200, description = "Metadata of the cases that exist", body = CasesRes),
        (status = 400, description = "Malformed id", body = ErrorRes),
        (status = 403, description = "Caller is a patient", body = ErrorRes)
    )
)]
/// Read case metadata by id
///
/// Unknown ids are skipped; results follow the requested order.
#[axum::debug_handler]
async fn cases_by_ids(
    State(state): State<AppState>,
    Path(ids): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<CasesRes>> {
    let session = session(&state, &headers).await?;
    let ids = ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(case_id)
        .collect::<ApiResult<Vec<_>>>()?;
    let records = state
        .service
        .cases_by_ids(&session, &ids)
        .await
        .map_err(|e| failure("Read cases", e))?;
    Ok(Json(CasesRes::from_records(records)))
}

#[utoipa::path(
    get,
    path = "/api/case/id/{id}/view",
    params(
        ("id" = String, Path, description = "Case document id"),
        ("x-tv-access-token" = String, Header, description = "Caller's vault access token")
    ),
    responses(
        (status = 200, description = "Case metadata with its documents", body = CaseViewRes),
        (status = 403, description = "Caller is not involved in the case", body = ErrorRes),
        (status = 404, description = "Unknown case", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn view_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<CaseViewRes>> {
    let session = session(&state, &headers).await?;
    let id = case_id(&id)?;
    let view = state
        .service
        .view_case(&session, &id)
        .await
        .map_err(|e| failure("View case", e))?;
    Ok(Json(view.into()))
}

#[utoipa::path(
    post,
    path = "/api/case/id/{id}/review",
    request_body = ReviewCaseReq,
    params(
        ("id" = String, Path, description = "Case document id"),
        ("x-tv-access-token" = String, Header, description = "Caller's vault access token")
    ),
    responses(
        (status = 200, description = "Diagnosis recorded", body = CaseRes),
        (status = 403, description = "Caller is not the case's reviewer", body = ErrorRes),
        (status = 404, description = "Unknown case", body = ErrorRes),
        (status = 409, description = "Case already approved", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn review_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ReviewCaseReq>,
) -> ApiResult<Json<CaseRes>> {
    let session = session(&state, &headers).await?;
    let id = case_id(&id)?;
    let record = state
        .service
        .review_case(&session, &id, req.into())
        .await
        .map_err(|e| failure("Review case", e))?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    post,
    path = "/api/case/id/{id}/approve",
    params(
        ("id" = String, Path, description = "Case document id"),
        ("x-tv-access-token" = String, Header, description = "Caller's vault access token")
    ),
    responses(
        (status = 200, description = "Case approved", body = CaseRes),
        (status = 403, description = "Caller is not the case's approver", body = ErrorRes),
        (status = 409, description = "Case is not waiting for approval", body = ErrorRes),
        (status = 502, description = "Approved, but the patient could not be notified", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn approve_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<CaseRes>> {
    let session = session(&state, &headers).await?;
    let id = case_id(&id)?;
    let record = state
        .service
        .approve_case(&session, &id)
        .await
        .map_err(|e| failure("Approve case", e))?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    post,
    path = "/api/case/id/{id}/patient",
    request_body = AssociatePatientReq,
    params(
        ("id" = String, Path, description = "Case document id"),
        ("x-tv-access-token" = String, Header, description = "Caller's vault access token")
    ),
    responses(
        (status = 200, description = "Patient created and invited", body = CaseRes),
        (status = 403, description = "Caller is not an admin", body = ErrorRes),
        (status = 409, description = "Case already has a patient", body = ErrorRes),
        (status = 502, description = "Vault failure, or the invitation could not be sent", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn associate_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AssociatePatientReq>,
) -> ApiResult<Json<CaseRes>> {
    let session = session(&state, &headers).await?;
    let id = case_id(&id)?;
    let patient = NewPatient::try_from(req).map_err(|e| failure("Associate patient", e))?;
    let record = state
        .service
        .associate_patient(&session, &id, patient)
        .await
        .map_err(|e| failure("Associate patient", e))?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    get,
    path = "/api/inbox",
    params(("x-tv-access-token" = String, Header, description = "Caller's vault access token")),
    responses(
        (status = 200, description = "Assigned cases with their case documents", body = InboxRes),
        (status = 403, description = "Caller is not a doctor", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn doctor_inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<InboxRes>> {
    let session = session(&state, &headers).await?;
    let inbox = state
        .service
        .doctor_inbox(&session)
        .await
        .map_err(|e| failure("Doctor inbox", e))?;
    Ok(Json(inbox.into()))
}

#[utoipa::path(
    get,
    path = "/api/dashboard/stats",
    params(("x-tv-access-token" = String, Header, description = "Caller's vault access token")),
    responses(
        (status = 200, description = "Response-time statistics", body = DashboardStatsRes),
        (status = 403, description = "Caller is not an admin", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn dashboard_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<DashboardStatsRes>> {
    let session = session(&state, &headers).await?;
    let stats = state
        .service
        .dashboard_stats(&session)
        .await
        .map_err(|e| failure("Dashboard stats", e))?;
    Ok(Json(stats.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvalidAssignment), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::InvalidState), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::UpstreamFailure), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = CaseError::FileRead(std::io::Error::other("disk on fire"));
        let (status, Json(body)) = failure("test", err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.kind, "Internal");
        assert_eq!(body.message, "Internal error");
    }
}
