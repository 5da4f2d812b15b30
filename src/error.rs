use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

/// Contract violations raised by the pure pricing functions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PricingError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// ROI requested against a zero acquisition cost. Distinct from a 0% ROI.
    #[error("ROI is undefined for zero acquisition cost")]
    DivisionUndefined,
}

/// Failures of a single upstream provider call. Never fatal to a batch.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream call timed out after {0}ms")]
    Timeout(u64),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not found")]
    NotFound,

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Pricing(PricingError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            AppError::Pricing(PricingError::DivisionUndefined) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ChannelSend(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
