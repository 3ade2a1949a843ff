use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    InvalidTransition(String),
    #[error("counter-offer limit of {max} reached")]
    CounterOfferLimit { max: u32 },
    #[error("{message}")]
    OutsideCheckInWindow { message: String, details: Value },
    #[error("{message}")]
    TooFarToCheckIn { message: String, details: Value },
    #[error("conflicting update; reload and retry")]
    Conflict,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidTransition(_)
            | ApiError::CounterOfferLimit { .. }
            | ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::OutsideCheckInWindow { .. } | ApiError::TooFarToCheckIn { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound => "not_found",
            ApiError::InvalidTransition(_) => "invalid_transition",
            ApiError::CounterOfferLimit { .. } => "counter_offer_limit",
            ApiError::OutsideCheckInWindow { .. } => "outside_check_in_window",
            ApiError::TooFarToCheckIn { .. } => "too_far_to_check_in",
            ApiError::Conflict => "conflict",
            ApiError::Internal => "internal_error",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::OutsideCheckInWindow { details, .. }
            | ApiError::TooFarToCheckIn { details, .. } => Some(details.clone()),
            ApiError::CounterOfferLimit { max } => {
                Some(serde_json::json!({ "max_counter_offers": max }))
            }
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}
