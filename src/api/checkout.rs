use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, Query};
use axum::Json;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{self, TransactionStatus};
use crate::request_state::{JsonBody, RequestState};

use super::{ok, timestamp, ApiResponse};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route("/checkout", post_with(checkout, checkout_docs))
        .api_route(
            "/checkout/history",
            get_with(list_transactions, list_transactions_docs),
        )
        .api_route(
            "/checkout/history/:id",
            get_with(get_transaction, get_transaction_docs),
        )
        .api_route("/checkout/stats", get_with(get_stats, get_stats_docs))
        .api_route(
            "/checkout/payment-methods",
            get_with(list_payment_methods, list_payment_methods_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionItemDto {
    pub product_id: u64,
    pub quantity: i32,
    pub unit_price: f64,
    pub subtotal: f64,
}

impl From<&models::TransactionItem> for TransactionItemDto {
    fn from(value: &models::TransactionItem) -> Self {
        Self {
            product_id: value.product_id,
            quantity: value.quantity,
            unit_price: value.unit_price.as_decimal(),
            subtotal: value.subtotal().as_decimal(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDto {
    pub id: u64,
    pub total: f64,
    pub status: String,
    pub payment_method_id: u64,
    pub nfc_uid: Option<String>,
    pub item_count: i64,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub items: Vec<TransactionItemDto>,
}

impl From<&models::Transaction> for TransactionDto {
    fn from(value: &models::Transaction) -> Self {
        Self {
            id: value.id,
            total: value.total.as_decimal(),
            status: value.status.as_str().to_owned(),
            payment_method_id: value.payment_method_id,
            nfc_uid: value.nfc_uid.clone(),
            item_count: value.item_count(),
            created_at: timestamp(&value.created_at),
            completed_at: value.completed_at.as_ref().map(timestamp),
            items: value.items.iter().map(TransactionItemDto::from).collect(),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutDto {
    pub payment_method_id: Option<u64>,
}

async fn checkout(
    state: RequestState,
    JsonBody(form): JsonBody<CheckoutDto>,
) -> ServiceResult<Json<ApiResponse<TransactionDto>>> {
    let user_id = state.session_require()?;
    let payment_method_id = form.payment_method_id.ok_or(ServiceError::EmptyInput(
        "PAYMENT_METHOD_REQUIRED",
        "Payment method is required",
    ))?;

    let transaction = state
        .app
        .checkout
        .checkout(user_id, payment_method_id)
        .await?;
    Ok(ok(TransactionDto::from(&transaction)))
}

fn checkout_docs(op: TransformOperation) -> TransformOperation {
    op.description("Pay the caller's cart with the given payment method.")
        .tag("checkout")
        .response::<200, Json<ApiResponse<TransactionDto>>>()
        .response_with::<400, (), _>(|res| {
            res.description("The cart is empty or the payment method is not available!")
        })
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<402, (), _>(|res| res.description("The payment was declined!"))
        .security_requirement("SessionToken")
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub status: Option<String>,
}

async fn list_transactions(
    state: RequestState,
    Query(query): Query<HistoryQuery>,
) -> ServiceResult<Json<ApiResponse<Vec<TransactionDto>>>> {
    let user_id = state.session_require()?;
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(status) => Some(TransactionStatus::parse(status).ok_or_else(|| {
            ServiceError::InvalidState("INVALID_STATUS", format!("Unknown status '{}'", status))
        })?),
    };

    let transactions = state
        .app
        .ledger
        .list_transactions(user_id, query.limit.unwrap_or(50).clamp(1, 100), status)
        .await?;
    Ok(ok(transactions.iter().map(TransactionDto::from).collect()))
}

fn list_transactions_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the caller's transactions, newest first.")
        .tag("checkout")
        .response::<200, Json<ApiResponse<Vec<TransactionDto>>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("SessionToken")
}

async fn get_transaction(
    state: RequestState,
    Path(id): Path<u64>,
) -> ServiceResult<Json<ApiResponse<TransactionDto>>> {
    let user_id = state.session_require()?;

    let transaction = state.app.ledger.get_owned_transaction(user_id, id).await?;
    Ok(ok(TransactionDto::from(&transaction)))
}

fn get_transaction_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get one of the caller's transactions with its items.")
        .tag("checkout")
        .response::<200, Json<ApiResponse<TransactionDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| {
            res.description("The transaction does not belong to the caller!")
        })
        .security_requirement("SessionToken")
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatsDto {
    pub total_transactions: u64,
    pub total_spent: f64,
    pub completed_count: u64,
    pub failed_count: u64,
}

async fn get_stats(state: RequestState) -> ServiceResult<Json<ApiResponse<TransactionStatsDto>>> {
    let user_id = state.session_require()?;

    let stats = state.app.ledger.transaction_stats(user_id).await?;
    Ok(ok(TransactionStatsDto {
        total_transactions: stats.total_transactions,
        total_spent: stats.total_spent.as_decimal(),
        completed_count: stats.completed_count,
        failed_count: stats.failed_count,
    }))
}

fn get_stats_docs(op: TransformOperation) -> TransformOperation {
    op.description("Summary over all of the caller's transactions.")
        .tag("checkout")
        .response::<200, Json<ApiResponse<TransactionStatsDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("SessionToken")
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodDto {
    pub id: u64,
    pub name: String,
    pub enabled: bool,
    pub display_order: i32,
}

impl From<&models::PaymentMethod> for PaymentMethodDto {
    fn from(value: &models::PaymentMethod) -> Self {
        Self {
            id: value.id,
            name: value.name.clone(),
            enabled: value.enabled,
            display_order: value.display_order,
        }
    }
}

async fn list_payment_methods(
    state: RequestState,
) -> ServiceResult<Json<ApiResponse<Vec<PaymentMethodDto>>>> {
    let methods = state.app.ledger.payment_methods().await?;
    Ok(ok(methods.iter().map(PaymentMethodDto::from).collect()))
}

fn list_payment_methods_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the enabled payment methods in display order.")
        .tag("checkout")
        .response::<200, Json<ApiResponse<Vec<PaymentMethodDto>>>>()
}
