use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::{Extension, Json, Router, routing::get, routing::post};
use tracing::Instrument;

use crate::error::{AppError, attach_correlation};
use crate::models::{
    CredentialsResponse, IssueTokenRequest, TokenResponse, ValidateTokenRequest,
    ValidatedTokenResponse,
};
use crate::state::AppState;
use crate::telemetry::{CorrelationId, correlation_layer, request_span};
use credential_core::Protocol;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/v1/tokens", post(issue_token))
        .route("/v1/tokens/validate", post(validate_token))
        .route("/v1/tokens/credentials", post(get_credentials))
        .layer(middleware::from_fn(correlation_layer))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn issue_token(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<IssueTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let span = request_span("http.issue_token", &correlation.0);
    async move {
        let issued = state
            .orchestrator
            .issue_token(
                Protocol::Rest,
                &request.resource_type,
                &request.resource_name,
                &request.agent_id,
                request.ttl_minutes,
            )
            .await
            .map_err(AppError::from)?;
        Ok((StatusCode::CREATED, Json(TokenResponse::from(issued))))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| attach_correlation(err, &correlation))
}

async fn validate_token(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<ValidateTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let span = request_span("http.validate_token", &correlation.0);
    async move {
        let validated = state
            .orchestrator
            .validate_token(Protocol::Rest, &request.token)
            .await
            .map_err(AppError::from)?;
        Ok((StatusCode::OK, Json(ValidatedTokenResponse::from(validated))))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| attach_correlation(err, &correlation))
}

async fn get_credentials(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<ValidateTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let span = request_span("http.get_credentials", &correlation.0);
    async move {
        let fields = state
            .orchestrator
            .credentials_from_token(Protocol::Rest, &request.token)
            .await
            .map_err(AppError::from)?;
        Ok((StatusCode::OK, Json(CredentialsResponse { fields })))
    }
    .instrument(span)
    .await
    .map_err(|err: AppError| attach_correlation(err, &correlation))
}
