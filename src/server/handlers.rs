use crate::domain::model::{Outcome, ValidationRequest};
use crate::server::AppState;
use crate::utils::error::ValidatorError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// API 錯誤，一律回傳 `{"error": message}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ValidatorError> for ApiError {
    fn from(err: ValidatorError) -> Self {
        let status = match &err {
            ValidatorError::InvalidRequest { .. }
            | ValidatorError::InvalidConfigValueError { .. }
            | ValidatorError::ConfigValidationError { .. }
            | ValidatorError::MissingConfigError { .. } => StatusCode::BAD_REQUEST,
            ValidatorError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            ValidatorError::JobNotFinished { .. } => StatusCode::CONFLICT,
            ValidatorError::ServerBusy { .. } | ValidatorError::QueueClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match status {
            StatusCode::SERVICE_UNAVAILABLE => "server busy".to_string(),
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("❌ Request failed: {}", err);
                err.to_string()
            }
            _ => err.to_string(),
        };

        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// 不是 UUID 的 id 不可能對應到任何 job，一律回 404
fn parse_job_id(id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| {
        ApiError::from(ValidatorError::JobNotFound {
            id: id.to_string(),
        })
    })
}

pub async fn submit_job(
    State(service): State<AppState>,
    payload: std::result::Result<Json<ValidationRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let record = service.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

pub async fn list_jobs(State(service): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(service.jobs().await?))
}

pub async fn get_job(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_job_id(&id)?;
    Ok(Json(service.job(id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultsQuery {
    pub outcome: Option<String>,
}

pub async fn get_results(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_job_id(&id)?;
    let outcome = query
        .outcome
        .as_deref()
        .map(str::parse::<Outcome>)
        .transpose()
        .map_err(ApiError::bad_request)?;
    Ok(Json(service.results(id, outcome).await?))
}

pub async fn get_report(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_job_id(&id)?;
    let archive = service.report(id).await?;
    let disposition = format!("attachment; filename=\"odata-validation-{}.zip\"", id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive,
    ))
}

pub async fn list_rules(State(service): State<AppState>) -> impl IntoResponse {
    Json(service.rules())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue_capacity: usize,
    pub pending_jobs: usize,
    pub workers: usize,
    pub rules: usize,
}

pub async fn health(State(service): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue_capacity: service.queue_capacity(),
        pending_jobs: service.pending_jobs(),
        workers: service.workers(),
        rules: service.rules().len(),
    })
}
