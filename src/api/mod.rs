use aide::axum::ApiRouter;
use aide::OperationOutput;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::Serialize;

use crate::database::AppState;

pub mod auth;
pub mod checkout;
pub mod nfc;
pub mod qr_auth;

#[cfg(test)]
mod tests;

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .merge(qr_auth::router(app_state.clone()))
        .merge(auth::router(app_state.clone()))
        .merge(nfc::router(app_state.clone()))
        .merge(checkout::router(app_state))
}

/// Success envelope shared by all endpoints, errors use `{success: false, error, code}`
#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

pub fn ok<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::new(data))
}

/// Like `ok` but answers with `201 Created`
#[derive(Debug, PartialEq)]
pub struct Created<T>(pub T);

impl<T> OperationOutput for Created<T> {
    type Inner = ApiResponse<T>;
}

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::CREATED, Json(ApiResponse::new(self.0))).into_response()
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct MessageDto {
    pub message: String,
}

impl MessageDto {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_owned(),
        }
    }
}

pub fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}
