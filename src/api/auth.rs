use aide::axum::routing::{delete_with, get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::Json;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models;
use crate::request_state::{JsonBody, RequestState};

use super::{ok, ApiResponse, MessageDto};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route("/auth/me", get_with(auth_get_user, auth_get_user_docs))
        .api_route("/auth/nfc/link", post_with(link_nfc, link_nfc_docs))
        .api_route("/auth/nfc/unlink", delete_with(unlink_nfc, unlink_nfc_docs))
        .api_route("/auth/nfc/status", get_with(nfc_status, nfc_status_docs))
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: u64,
    pub name: String,
    pub phone: String,
    pub nfc_uid: Option<String>,
    pub preferred_payment_method_id: Option<u64>,
}

impl From<&models::User> for UserDto {
    fn from(value: &models::User) -> Self {
        Self {
            id: value.id,
            name: value.name.clone(),
            phone: value.phone.clone(),
            nfc_uid: value.nfc_uid.clone(),
            preferred_payment_method_id: value.preferred_payment_method_id,
        }
    }
}

async fn current_user(state: &RequestState) -> ServiceResult<models::User> {
    let user_id = state.session_require()?;
    state
        .app
        .identities
        .get_user(user_id)
        .await?
        .ok_or(ServiceError::NotFound("USER_NOT_FOUND", "User not found"))
}

async fn auth_get_user(state: RequestState) -> ServiceResult<Json<ApiResponse<UserDto>>> {
    let user = current_user(&state).await?;
    Ok(ok(UserDto::from(&user)))
}

fn auth_get_user_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get the user the bearer token belongs to.")
        .tag("auth")
        .response::<200, Json<ApiResponse<UserDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing, invalid or expired token!"))
        .security_requirement("SessionToken")
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkNfcDto {
    pub nfc_uid: Option<String>,
}

async fn link_nfc(
    state: RequestState,
    JsonBody(form): JsonBody<LinkNfcDto>,
) -> ServiceResult<Json<ApiResponse<UserDto>>> {
    let user_id = state.session_require()?;
    let nfc_uid = form
        .nfc_uid
        .map(|uid| uid.trim().to_owned())
        .filter(|uid| !uid.is_empty())
        .ok_or(ServiceError::EmptyInput("NFC_UID_REQUIRED", "NFC UID required"))?;

    let user = state.app.identities.link(user_id, &nfc_uid).await?;
    info!("Linked nfc card {} to user {}", nfc_uid, user_id);
    Ok(ok(UserDto::from(&user)))
}

fn link_nfc_docs(op: TransformOperation) -> TransformOperation {
    op.description("Link an NFC card to the caller's account.")
        .tag("auth")
        .response::<200, Json<ApiResponse<UserDto>>>()
        .response_with::<400, (), _>(|res| res.description("No NFC UID given!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<409, (), _>(|res| {
            res.description("The card is already linked to another account!")
        })
        .security_requirement("SessionToken")
}

async fn unlink_nfc(state: RequestState) -> ServiceResult<Json<ApiResponse<MessageDto>>> {
    let user_id = state.session_require()?;

    state.app.identities.unlink(user_id).await?;
    info!("Unlinked nfc card from user {}", user_id);
    Ok(ok(MessageDto::new("NFC card unlinked successfully")))
}

fn unlink_nfc_docs(op: TransformOperation) -> TransformOperation {
    op.description("Remove the NFC card from the caller's account.")
        .tag("auth")
        .response::<200, Json<ApiResponse<MessageDto>>>()
        .response_with::<400, (), _>(|res| res.description("No card is linked!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("SessionToken")
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NfcStatusDto {
    pub is_linked: bool,
    pub nfc_uid: Option<String>,
}

async fn nfc_status(state: RequestState) -> ServiceResult<Json<ApiResponse<NfcStatusDto>>> {
    let user = current_user(&state).await?;
    Ok(ok(NfcStatusDto {
        is_linked: user.nfc_uid.is_some(),
        nfc_uid: user.nfc_uid,
    }))
}

fn nfc_status_docs(op: TransformOperation) -> TransformOperation {
    op.description("Whether the caller has an NFC card linked.")
        .tag("auth")
        .response::<200, Json<ApiResponse<NfcStatusDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("SessionToken")
}
