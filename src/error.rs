use crate::api::signature::SignatureError;
use crate::orchestration::RecalcError;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Upstream store error: {0}")]
    BadGateway(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<RecalcError> for AppError {
    fn from(err: RecalcError) -> Self {
        match err {
            RecalcError::SeedMissingOrStale { .. } => AppError::Conflict(err.to_string()),
            RecalcError::Fetch(_) | RecalcError::Write(_) => AppError::BadGateway(err.to_string()),
            RecalcError::Ledger(_) | RecalcError::Aborted(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::BadGateway(err.to_string())
    }
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::Mismatch => AppError::Unauthorized(err.to_string()),
            SignatureError::MissingHeader | SignatureError::MalformedHeader => {
                AppError::BadRequest(err.to_string())
            }
            SignatureError::InvalidKey => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LedgerError;
    use crate::orchestration::FetchError;

    #[test]
    fn test_recalc_error_status_mapping() {
        let stale: AppError = RecalcError::SeedMissingOrStale {
            order: None,
            reason: "remainder missing".to_string(),
        }
        .into();
        assert_eq!(stale.into_response().status(), StatusCode::CONFLICT);

        let fetch: AppError =
            RecalcError::Fetch(FetchError::new(StoreError::RateLimited)).into();
        assert_eq!(fetch.into_response().status(), StatusCode::BAD_GATEWAY);

        let overflow: AppError =
            RecalcError::Ledger(LedgerError::Overflow("80 / 1E-28".to_string())).into();
        assert_eq!(overflow.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let aborted: AppError = RecalcError::Aborted("task 7 panicked".to_string()).into();
        assert_eq!(aborted.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_signature_error_status_mapping() {
        let missing: AppError = SignatureError::MissingHeader.into();
        assert_eq!(missing.into_response().status(), StatusCode::BAD_REQUEST);

        let mismatch: AppError = SignatureError::Mismatch.into();
        assert_eq!(mismatch.into_response().status(), StatusCode::UNAUTHORIZED);

        let key: AppError = SignatureError::InvalidKey.into();
        assert_eq!(key.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
