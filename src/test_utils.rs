//! Doubles shared by the unit and router tests
use std::sync::Arc;

use axum::async_trait;
use chrono::Duration;

use crate::database::{AppState, MemoryStore};
use crate::env::Settings;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{PaymentDecision, Transaction};
use crate::payment::PaymentSimulator;
use crate::token::TokenIssuer;

/// Always returns the same decision
pub struct FixedPaymentSimulator(pub PaymentDecision);

impl FixedPaymentSimulator {
    pub fn approve() -> Arc<dyn PaymentSimulator> {
        Arc::new(FixedPaymentSimulator(PaymentDecision::Approved))
    }

    pub fn decline() -> Arc<dyn PaymentSimulator> {
        Arc::new(FixedPaymentSimulator(PaymentDecision::Declined))
    }
}

#[async_trait]
impl PaymentSimulator for FixedPaymentSimulator {
    async fn authorize(&self, _transaction: &Transaction) -> ServiceResult<PaymentDecision> {
        Ok(self.0)
    }
}

/// A gateway that can not be reached
pub struct FailingPaymentSimulator;

#[async_trait]
impl PaymentSimulator for FailingPaymentSimulator {
    async fn authorize(&self, _transaction: &Transaction) -> ServiceResult<PaymentDecision> {
        Err(ServiceError::InternalServerError(
            "payment gateway unreachable".to_owned(),
        ))
    }
}

pub fn token_issuer() -> TokenIssuer {
    TokenIssuer::new(b"test-secret", Duration::days(7))
}

pub fn memory_state(payment: Arc<dyn PaymentSimulator>) -> (Arc<MemoryStore>, AppState) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(store.clone(), payment, token_issuer(), Settings::default());
    (store, state)
}
