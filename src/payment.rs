use axum::async_trait;
use log::{info, warn};
use rand::Rng;

use crate::error::ServiceResult;
use crate::models::{PaymentDecision, Transaction};

/// The single point that decides whether a pending transaction is paid.
///
/// Implementations receive the whole transaction so a real gateway can apply
/// per-method rules. An `Err` means no decision could be obtained.
#[async_trait]
pub trait PaymentSimulator: Send + Sync {
    async fn authorize(&self, transaction: &Transaction) -> ServiceResult<PaymentDecision>;
}

/// Weighted coin flip standing in for a payment gateway.
pub struct RandomPaymentSimulator {
    approval_rate: f64,
}

impl RandomPaymentSimulator {
    pub const DEFAULT_APPROVAL_RATE: f64 = 0.9;

    pub fn new(approval_rate: f64) -> Self {
        let approval_rate = if approval_rate.is_finite() {
            approval_rate.clamp(0.0, 1.0)
        } else {
            warn!(
                "Approval rate {} is not a number, using {}",
                approval_rate,
                Self::DEFAULT_APPROVAL_RATE
            );
            Self::DEFAULT_APPROVAL_RATE
        };
        Self { approval_rate }
    }
}

#[async_trait]
impl PaymentSimulator for RandomPaymentSimulator {
    async fn authorize(&self, transaction: &Transaction) -> ServiceResult<PaymentDecision> {
        let approved = rand::thread_rng().gen_bool(self.approval_rate);
        let decision = if approved {
            PaymentDecision::Approved
        } else {
            PaymentDecision::Declined
        };

        info!(
            "Simulated payment for transaction {} ({} via method {}): {:?}",
            transaction.id, transaction.total, transaction.payment_method_id, decision
        );
        Ok(decision)
    }
}
