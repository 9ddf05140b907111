use aide::OperationOutput;
use axum::extract::rejection::JsonRejection;
use axum::{http::StatusCode, response::IntoResponse, Json};
use log::error;
use serde_json::json;

use crate::models::Transaction;

/// Why a request could not be tied to a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingToken,
    InvalidToken,
    ExpiredToken,
    MissingSecret,
    InvalidSecret,
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::MissingToken => "UNAUTHORIZED",
            AuthFailure::InvalidToken => "TOKEN_INVALID",
            AuthFailure::ExpiredToken => "TOKEN_EXPIRED",
            AuthFailure::MissingSecret => "SECRET_REQUIRED",
            AuthFailure::InvalidSecret => "INVALID_SECRET",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthFailure::MissingToken => "Authentication required",
            AuthFailure::InvalidToken => "Invalid token",
            AuthFailure::ExpiredToken => "Token expired",
            AuthFailure::MissingSecret => "Secret required",
            AuthFailure::InvalidSecret => "Invalid secret",
        }
    }
}

/// Represent errors in the application
///
/// All `ServiceError`s can be transformed to http errors. Everything except
/// `InternalServerError` is an expected outcome that the client can act on.
#[derive(Debug, Clone)]
pub enum ServiceError {
    InternalServerError(String),
    NotFound(&'static str, &'static str),
    Expired(&'static str, &'static str),
    InvalidState(&'static str, String),
    Forbidden(&'static str),
    Conflict(&'static str, &'static str),
    Unauthenticated(AuthFailure),
    Declined(Box<Transaction>),
    EmptyInput(&'static str, &'static str),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::NotFound(_, _) => StatusCode::NOT_FOUND,
            ServiceError::Expired(_, _) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidState(_, _) => StatusCode::BAD_REQUEST,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Conflict(_, _) => StatusCode::CONFLICT,
            ServiceError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Declined(_) => StatusCode::PAYMENT_REQUIRED,
            ServiceError::EmptyInput(_, _) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InternalServerError(_) => "INTERNAL_ERROR",
            ServiceError::NotFound(code, _) => code,
            ServiceError::Expired(code, _) => code,
            ServiceError::InvalidState(code, _) => code,
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::Conflict(code, _) => code,
            ServiceError::Unauthenticated(reason) => reason.code(),
            ServiceError::Declined(_) => "PAYMENT_DECLINED",
            ServiceError::EmptyInput(code, _) => code,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for ServiceError {}

/// Helper for `ServiceError` result
pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<sqlx::Error> for ServiceError {
    fn from(error: sqlx::Error) -> Self {
        ServiceError::InternalServerError(format!("Database error: {error}"))
    }
}

impl From<sqlx::migrate::MigrateError> for ServiceError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        ServiceError::InternalServerError(format!("Migration error: {error}"))
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                ServiceError::EmptyInput("JSON_BODY_REQUIRED", "A JSON request body is required")
            }
            rejection => ServiceError::InvalidState("INVALID_BODY", rejection.body_text()),
        }
    }
}

impl OperationOutput for ServiceError {
    type Inner = String;
}
impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.code();

        let body = match self {
            ServiceError::InternalServerError(ref cause) => {
                error!("Internal server error: {}", cause);
                json!({
                    "success": false,
                    "error": "Internal server error",
                    "code": code,
                })
            }
            ServiceError::NotFound(_, message)
            | ServiceError::Expired(_, message)
            | ServiceError::Forbidden(message)
            | ServiceError::Conflict(_, message)
            | ServiceError::EmptyInput(_, message) => json!({
                "success": false,
                "error": message,
                "code": code,
            }),
            ServiceError::InvalidState(_, ref message) => json!({
                "success": false,
                "error": message,
                "code": code,
            }),
            ServiceError::Unauthenticated(reason) => json!({
                "success": false,
                "error": reason.message(),
                "code": code,
            }),
            ServiceError::Declined(ref transaction) => json!({
                "success": false,
                "error": "Payment failed. Please try again.",
                "code": code,
                "data": {
                    "transactionId": transaction.id,
                    "total": transaction.total.as_decimal(),
                    "status": transaction.status.as_str(),
                },
            }),
        };

        (status, Json(body)).into_response()
    }
}
