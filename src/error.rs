use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error taxonomy for the request path (spec §7). Internal plumbing
/// (ingestion, CLI, store setup) keeps using `anyhow::Result` directly;
/// this type exists at the HTTP boundary so every handler maps to a
/// documented status code.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("provider returned empty response")]
    ProviderEmpty,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) | AppError::ProviderEmpty => StatusCode::BAD_GATEWAY,
            AppError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::RateLimited(_) => "rate_limited",
            AppError::Upstream(_) => "upstream_error",
            AppError::ProviderEmpty => "provider_empty",
            AppError::Parse(_) => "parse_error",
            AppError::Cancelled => "cancelled",
            AppError::Fatal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorEnvelope<'a>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Fatal(_)) {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let status = self.status();
        let body = ErrorBody {
            error: ErrorEnvelope {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
