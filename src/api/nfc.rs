use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::Query;
use axum::Json;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::{paid, EventRef};
use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{self, Cents, NfcEventKind, NfcEventOutcome};
use crate::request_state::{DeviceId, JsonBody, RequestState};

use super::{ok, timestamp, ApiResponse, MessageDto};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/nfc/events",
            get_with(list_events, list_events_docs).post_with(record_tap, record_tap_docs),
        )
        .api_route("/nfc/payment", post_with(trigger_payment, trigger_payment_docs))
        .api_route(
            "/nfc/mark-processed",
            post_with(mark_processed, mark_processed_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NfcEventDto {
    pub id: u64,
    pub uid: String,
    pub event: String,
    pub device_id: String,
    pub processed: bool,
    pub transaction_id: Option<u64>,
    pub user_name: Option<String>,
    pub total: Option<f64>,
    pub created_at: String,
}

impl From<&models::NfcEvent> for NfcEventDto {
    fn from(value: &models::NfcEvent) -> Self {
        Self {
            id: value.id,
            uid: value.uid.clone(),
            event: value.kind.as_str().to_owned(),
            device_id: value.device_id.clone(),
            processed: value.processed,
            transaction_id: value.transaction_id,
            user_name: value.user_name.clone(),
            total: value.total.map(|t| t.as_decimal()),
            created_at: timestamp(&value.created_at),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct ListEventsQuery {
    pub limit: Option<i64>,
    pub unprocessed: Option<bool>,
}

async fn list_events(
    state: RequestState,
    Query(query): Query<ListEventsQuery>,
) -> ServiceResult<Json<ApiResponse<Vec<NfcEventDto>>>> {
    let events = state
        .app
        .nfc
        .list_events(query.limit.unwrap_or(10), query.unprocessed.unwrap_or(false))
        .await?;
    Ok(ok(events.iter().map(NfcEventDto::from).collect()))
}

fn list_events_docs(op: TransformOperation) -> TransformOperation {
    op.description("List nfc events newest first. Polled by the display, use `unprocessed=true` to only get events not yet handled.")
        .tag("nfc")
        .response::<200, Json<ApiResponse<Vec<NfcEventDto>>>>()
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct RecordTapDto {
    #[serde(alias = "nfc_uid")]
    pub uid: Option<String>,
    pub event: Option<String>,
}

async fn record_tap(
    state: RequestState,
    DeviceId(device_id): DeviceId,
    JsonBody(form): JsonBody<RecordTapDto>,
) -> ServiceResult<Json<ApiResponse<NfcEventDto>>> {
    let kind = match form.event.as_deref() {
        None => NfcEventKind::Detected,
        Some(event) => NfcEventKind::parse(event).ok_or_else(|| {
            ServiceError::InvalidState("INVALID_EVENT", format!("Unknown nfc event '{}'", event))
        })?,
    };

    let event = state
        .app
        .nfc
        .record_tap(form.uid.as_deref().unwrap_or_default(), kind, &device_id)
        .await?;
    Ok(ok(NfcEventDto::from(&event)))
}

fn record_tap_docs(op: TransformOperation) -> TransformOperation {
    op.description("Record a tap reported by an nfc reader. The reader is identified by X-Device-Id.")
        .tag("nfc")
        .response::<200, Json<ApiResponse<NfcEventDto>>>()
        .response_with::<400, (), _>(|res| res.description("No NFC UID given!"))
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct TriggerPaymentDto {
    #[serde(alias = "nfc_uid")]
    pub uid: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NfcPaymentDto {
    pub transaction_id: u64,
    pub user_id: u64,
    pub user_name: String,
    pub total: f64,
    pub item_count: i64,
    pub status: String,
}

async fn trigger_payment(
    state: RequestState,
    JsonBody(form): JsonBody<TriggerPaymentDto>,
) -> ServiceResult<Json<ApiResponse<NfcPaymentDto>>> {
    let uid = form.uid.unwrap_or_default();
    let outcome = state.app.nfc.trigger_payment(&uid).await?;

    let transaction = paid(outcome.transaction)?;

    Ok(ok(NfcPaymentDto {
        transaction_id: transaction.id,
        user_id: outcome.user.id,
        user_name: outcome.user.name,
        total: transaction.total.as_decimal(),
        item_count: transaction.item_count(),
        status: transaction.status.as_str().to_owned(),
    }))
}

fn trigger_payment_docs(op: TransformOperation) -> TransformOperation {
    op.description("Pay the cart of the card's owner with their preferred payment method.")
        .tag("nfc")
        .response::<200, Json<ApiResponse<NfcPaymentDto>>>()
        .response_with::<400, (), _>(|res| res.description("The cart is empty!"))
        .response_with::<402, (), _>(|res| res.description("The payment was declined!"))
        .response_with::<404, (), _>(|res| res.description("The card is not linked!"))
        .response_with::<409, (), _>(|res| {
            res.description("A payment for this card is already in progress!")
        })
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkProcessedDto {
    pub event_id: Option<u64>,
    pub uid: Option<String>,
    pub timestamp: Option<String>,
    pub transaction_id: Option<u64>,
    pub user_name: Option<String>,
    pub total: Option<f64>,
}

impl MarkProcessedDto {
    fn event_ref(&self) -> ServiceResult<EventRef> {
        if let Some(id) = self.event_id {
            return Ok(EventRef::Id(id));
        }

        match (&self.uid, &self.timestamp) {
            (Some(uid), Some(created_at)) => {
                let created_at = DateTime::parse_from_rfc3339(created_at)
                    .map_err(|_| {
                        ServiceError::InvalidState(
                            "INVALID_TIMESTAMP",
                            format!("Invalid timestamp '{}'", created_at),
                        )
                    })?
                    .with_timezone(&Utc);
                Ok(EventRef::Tap {
                    uid: uid.clone(),
                    created_at,
                })
            }
            _ => Err(ServiceError::EmptyInput(
                "EVENT_ID_REQUIRED",
                "Event ID or uid and timestamp required",
            )),
        }
    }
}

async fn mark_processed(
    state: RequestState,
    JsonBody(form): JsonBody<MarkProcessedDto>,
) -> ServiceResult<Json<ApiResponse<MessageDto>>> {
    let event = form.event_ref()?;
    let outcome = NfcEventOutcome {
        transaction_id: form.transaction_id,
        user_name: form.user_name,
        total: form.total.map(|t| Cents((t * 100.0).round() as i64)),
    };

    state.app.nfc.mark_processed(event, outcome).await?;
    Ok(ok(MessageDto::new("NFC event marked as processed")))
}

fn mark_processed_docs(op: TransformOperation) -> TransformOperation {
    op.description("Mark an nfc event as handled by the display, either by `eventId` or by `uid` and `timestamp`. Marking twice is harmless.")
        .tag("nfc")
        .response::<200, Json<ApiResponse<MessageDto>>>()
        .response_with::<400, (), _>(|res| res.description("Neither event id nor tap given!"))
        .response_with::<404, (), _>(|res| res.description("The event or the given transaction does not exist!"))
}
