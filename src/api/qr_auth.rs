use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::body::Bytes;
use axum::extract::Path;
use axum::Json;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::{CreatedSession, PollOutcome, SessionInfo};
use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models;
use crate::request_state::{JsonBody, QrSecret, RequestState};

use super::{ok, timestamp, ApiResponse, Created};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/auth/qr/session",
            post_with(create_session, create_session_docs),
        )
        .api_route(
            "/auth/qr/status/:session_id",
            get_with(poll_session, poll_session_docs),
        )
        .api_route(
            "/auth/qr/info/:session_id",
            get_with(session_info, session_info_docs),
        )
        .api_route(
            "/auth/qr/authorize",
            post_with(authorize_session, authorize_session_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionDto {
    pub device_info: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QrSessionCreatedDto {
    pub session_id: String,
    pub secret: String,
    pub expires_at: String,
    pub qr_data: String,
}

impl From<CreatedSession> for QrSessionCreatedDto {
    fn from(value: CreatedSession) -> Self {
        Self {
            expires_at: timestamp(&value.ticket.expires_at),
            session_id: value.ticket.id,
            secret: value.ticket.secret,
            qr_data: value.qr_data,
        }
    }
}

/// The tablet may post no body at all
async fn create_session(
    state: RequestState,
    body: Bytes,
) -> ServiceResult<Created<QrSessionCreatedDto>> {
    let form: CreateSessionDto = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionDto::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServiceError::InvalidState("INVALID_BODY", e.to_string()))?
    };
    let created = state.app.handshake.create_session(form.device_info).await?;
    Ok(Created(created.into()))
}

fn create_session_docs(op: TransformOperation) -> TransformOperation {
    op.description("Create a QR login session. Called by the cart tablet, the secret is only returned here.")
        .tag("qr-auth")
        .response::<201, Json<ApiResponse<QrSessionCreatedDto>>>()
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionUserDto {
    pub id: u64,
    pub name: String,
    pub phone: String,
    pub preferred_payment_method_id: Option<u64>,
}

impl From<&models::User> for SessionUserDto {
    fn from(value: &models::User) -> Self {
        Self {
            id: value.id,
            name: value.name.clone(),
            phone: value.phone.clone(),
            preferred_payment_method_id: value.preferred_payment_method_id,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusDto {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUserDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<PollOutcome> for SessionStatusDto {
    fn from(value: PollOutcome) -> Self {
        let status = value.status().as_str().to_owned();
        match value {
            PollOutcome::Pending { expires_at } | PollOutcome::Expired { expires_at } => Self {
                status,
                expires_at: Some(timestamp(&expires_at)),
                token: None,
                user: None,
                message: None,
            },
            PollOutcome::Redeemed { token, user } => Self {
                status,
                expires_at: None,
                token: Some(token),
                user: Some((&user).into()),
                message: None,
            },
            PollOutcome::Used => Self {
                status,
                expires_at: None,
                token: None,
                user: None,
                message: Some("Token already retrieved".to_owned()),
            },
        }
    }
}

async fn poll_session(
    state: RequestState,
    QrSecret(secret): QrSecret,
    Path(session_id): Path<String>,
) -> ServiceResult<Json<ApiResponse<SessionStatusDto>>> {
    let outcome = state
        .app
        .handshake
        .poll(&session_id, secret.as_deref())
        .await?;
    Ok(ok(outcome.into()))
}

fn poll_session_docs(op: TransformOperation) -> TransformOperation {
    op.description("Poll a QR login session with the X-QR-Secret header. The first poll after authorization returns the token, later polls report `used`.")
        .tag("qr-auth")
        .response::<200, Json<ApiResponse<SessionStatusDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing or invalid secret!"))
        .response_with::<404, (), _>(|res| res.description("The session does not exist!"))
        .security_requirement("QrSecret")
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoDto {
    pub session_id: String,
    pub status: String,
    pub device_info: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

impl From<SessionInfo> for SessionInfoDto {
    fn from(value: SessionInfo) -> Self {
        Self {
            session_id: value.id,
            status: value.status.as_str().to_owned(),
            device_info: value.device_info,
            created_at: timestamp(&value.created_at),
            expires_at: timestamp(&value.expires_at),
        }
    }
}

async fn session_info(
    state: RequestState,
    Path(session_id): Path<String>,
) -> ServiceResult<Json<ApiResponse<SessionInfoDto>>> {
    state.session_require()?;

    let info = state.app.handshake.session_info(&session_id).await?;
    Ok(ok(info.into()))
}

fn session_info_docs(op: TransformOperation) -> TransformOperation {
    op.description("Show a QR login session to the phone before it authorizes.")
        .tag("qr-auth")
        .response::<200, Json<ApiResponse<SessionInfoDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<404, (), _>(|res| res.description("The session does not exist!"))
        .security_requirement("SessionToken")
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeSessionDto {
    pub session_id: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct AuthorizedUserDto {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionAuthorizedDto {
    pub status: String,
    pub session_id: String,
    pub user: AuthorizedUserDto,
}

async fn authorize_session(
    state: RequestState,
    JsonBody(form): JsonBody<AuthorizeSessionDto>,
) -> ServiceResult<Json<ApiResponse<SessionAuthorizedDto>>> {
    let user_id = state.session_require()?;
    let session_id = form
        .session_id
        .filter(|id| !id.is_empty())
        .ok_or(ServiceError::EmptyInput(
            "SESSION_ID_REQUIRED",
            "Session ID is required",
        ))?;

    let user = state.app.handshake.authorize(&session_id, user_id).await?;
    Ok(ok(SessionAuthorizedDto {
        status: models::QrSessionStatus::Authorized.as_str().to_owned(),
        session_id,
        user: AuthorizedUserDto {
            name: user.name,
            phone: user.phone,
        },
    }))
}

fn authorize_session_docs(op: TransformOperation) -> TransformOperation {
    op.description("Authorize a pending QR login session with the caller's account.")
        .tag("qr-auth")
        .response::<200, Json<ApiResponse<SessionAuthorizedDto>>>()
        .response_with::<400, (), _>(|res| {
            res.description("The session is expired or was already authorized or used!")
        })
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<404, (), _>(|res| res.description("The session does not exist!"))
        .security_requirement("SessionToken")
}
