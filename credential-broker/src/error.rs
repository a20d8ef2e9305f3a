use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::telemetry::{CORRELATION_ID_HEADER, CorrelationId, correlation_header_value};
use credential_core::{IssueError, TokenError};

#[derive(Debug, Error)]
pub enum AppErrorKind {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("token expired")]
    TokenExpired,
    #[error("token signature invalid")]
    InvalidSignature,
    #[error("upstream unavailable: {0}")]
    Upstream(String),
    #[error("unexpected error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct AppError {
    kind: AppErrorKind,
    correlation_id: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, id: String) -> Self {
        self.correlation_id = Some(id);
        self
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            AppErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            AppErrorKind::TokenExpired | AppErrorKind::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppErrorKind::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self.kind {
            AppErrorKind::BadRequest(_) => "bad_request",
            AppErrorKind::NotFound(_) => "not_found",
            AppErrorKind::TokenExpired => "token_expired",
            AppErrorKind::InvalidSignature => "invalid_signature",
            AppErrorKind::Upstream(_) => "upstream_unavailable",
            AppErrorKind::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    correlation_id: Option<&'a str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let correlation = self.correlation_id.clone();
        let body = Json(ErrorBody {
            error: self.code(),
            message: self.kind.to_string(),
            correlation_id: correlation.as_deref(),
        });

        let mut response = (status, body).into_response();
        if let Some(id) = correlation {
            response
                .headers_mut()
                .insert(CORRELATION_ID_HEADER, correlation_header_value(&id));
        }
        response
    }
}

impl From<IssueError> for AppError {
    fn from(value: IssueError) -> Self {
        let kind = match &value {
            IssueError::InvalidResourceType { .. } | IssueError::TtlOutOfRange { .. } => {
                AppErrorKind::BadRequest(value.to_string())
            }
            IssueError::NotFound { resource } => AppErrorKind::NotFound(resource.clone()),
            IssueError::Unavailable(message) => AppErrorKind::Upstream(message.clone()),
            IssueError::Encryption(message) => AppErrorKind::Internal(message.clone()),
        };
        AppError::new(kind)
    }
}

impl From<TokenError> for AppError {
    fn from(value: TokenError) -> Self {
        let kind = match &value {
            TokenError::Expired => AppErrorKind::TokenExpired,
            TokenError::InvalidSignature => AppErrorKind::InvalidSignature,
            TokenError::Malformed(message) => AppErrorKind::BadRequest(message.clone()),
            TokenError::Decryption(message) => AppErrorKind::Internal(message.clone()),
        };
        AppError::new(kind)
    }
}

pub fn attach_correlation(err: AppError, correlation: &CorrelationId) -> AppError {
    err.with_correlation(correlation.0.clone())
}
