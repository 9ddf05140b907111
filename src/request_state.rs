use std::convert::Infallible;

use aide::gen::GenContext;
use aide::openapi::Operation;
use aide::OperationInput;
use axum::{
    async_trait,
    extract::{FromRef, FromRequest, FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    Json, RequestPartsExt,
};
use serde::de::DeserializeOwned;
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};

use crate::{
    database::AppState,
    error::{AuthFailure, ServiceError, ServiceResult},
};

pub const QR_SECRET_HEADER: &str = "x-qr-secret";
pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Application state plus whoever the bearer token says the caller is.
///
/// Extraction never fails. Handlers that need a user call `session_require`, which
/// turns a missing, invalid or expired token into the matching 401.
pub struct RequestState {
    pub app: AppState,
    auth: Result<u64, AuthFailure>,
}

impl RequestState {
    pub fn session_require(&self) -> ServiceResult<u64> {
        self.auth.map_err(ServiceError::Unauthenticated)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestState
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);

        let auth = if let Ok(TypedHeader(Authorization(bearer))) =
            parts.extract::<TypedHeader<Authorization<Bearer>>>().await
        {
            app.tokens.verify(bearer.token())
        } else {
            Err(AuthFailure::MissingToken)
        };

        Ok(Self { app, auth })
    }
}

impl OperationInput for RequestState {}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_owned())
}

/// The `X-QR-Secret` header, if present
pub struct QrSecret(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for QrSecret {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(QrSecret(header_value(&parts.headers, QR_SECRET_HEADER)))
    }
}

impl OperationInput for QrSecret {}

/// Identifies the reader that reported a tap
pub struct DeviceId(pub String);

impl DeviceId {
    fn from_headers(headers: &HeaderMap) -> Self {
        let device = header_value(headers, DEVICE_ID_HEADER).or_else(|| {
            header_value(headers, FORWARDED_FOR_HEADER)
                .and_then(|v| v.split(',').next().map(|first| first.trim().to_owned()))
        });
        DeviceId(device.unwrap_or_else(|| "unknown".to_owned()))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for DeviceId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(DeviceId::from_headers(&parts.headers))
    }
}

impl OperationInput for DeviceId {}

/// A JSON request body whose rejections use the common error envelope
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

impl<T: schemars::JsonSchema> OperationInput for JsonBody<T> {
    fn operation_input(ctx: &mut GenContext, operation: &mut Operation) {
        Json::<T>::operation_input(ctx, operation);
    }
}
