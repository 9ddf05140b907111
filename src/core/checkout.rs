use std::sync::Arc;

use log::{error, info, warn};

use crate::database::CheckoutLedger;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{PaymentDecision, Transaction, TransactionStatus};
use crate::payment::PaymentSimulator;

/// Turns a cart into a paid or failed transaction.
pub struct Checkout {
    ledger: Arc<dyn CheckoutLedger>,
    payment: Arc<dyn PaymentSimulator>,
}

impl Checkout {
    pub fn new(ledger: Arc<dyn CheckoutLedger>, payment: Arc<dyn PaymentSimulator>) -> Self {
        Self { ledger, payment }
    }

    /// Snapshot the cart, ask for a payment decision and record the outcome.
    ///
    /// Returns the transaction in its terminal status. A declined payment is not an
    /// error here, the caller decides how to report it. The cart is cleared only once
    /// the transaction is stored as completed.
    pub async fn settle(
        &self,
        user_id: u64,
        payment_method_id: u64,
        nfc_uid: Option<String>,
    ) -> ServiceResult<Transaction> {
        let transaction = self
            .ledger
            .create_from_cart(user_id, payment_method_id, nfc_uid)
            .await?;

        let decision = match self.payment.authorize(&transaction).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    "No payment decision for transaction {}, marking it failed",
                    transaction.id
                );
                self.ledger.fail(transaction.id).await?;
                return Err(e);
            }
        };

        match decision {
            PaymentDecision::Approved => {
                let completed = self.ledger.complete(transaction.id).await?;
                if completed.status == TransactionStatus::Completed {
                    self.ledger.clear_cart(user_id).await?;
                    info!("Transaction {} completed", completed.id);
                }
                Ok(completed)
            }
            PaymentDecision::Declined => {
                let failed = self.ledger.fail(transaction.id).await?;
                warn!("Transaction {} failed, payment declined", failed.id);
                Ok(failed)
            }
        }
    }

    /// Interactive checkout with an explicitly chosen payment method
    pub async fn checkout(&self, user_id: u64, payment_method_id: u64) -> ServiceResult<Transaction> {
        match self.ledger.get_payment_method(payment_method_id).await? {
            Some(method) if method.enabled => {}
            _ => {
                return Err(ServiceError::InvalidState(
                    "INVALID_PAYMENT_METHOD",
                    "Invalid payment method".to_owned(),
                ))
            }
        }

        paid(self.settle(user_id, payment_method_id, None).await?)
    }
}

/// A settled transaction as a result, declined payments become `ServiceError::Declined`
pub fn paid(transaction: Transaction) -> ServiceResult<Transaction> {
    match transaction.status {
        TransactionStatus::Completed => Ok(transaction),
        _ => Err(ServiceError::Declined(Box::new(transaction))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{IdentityLinkRegistry, MemoryStore};
    use crate::models::Cents;
    use crate::test_utils::{FailingPaymentSimulator, FixedPaymentSimulator};

    async fn shopper(store: &MemoryStore) -> u64 {
        let user = store.create_user("Sara", "1", None).await.unwrap();
        let milk = store.insert_product("Fresh Milk", Cents(1599)).await.unwrap();
        store.put_cart_item(user.id, milk.id, 2).await.unwrap();
        user.id
    }

    fn checkout(store: Arc<MemoryStore>, payment: Arc<dyn PaymentSimulator>) -> Checkout {
        Checkout::new(store, payment)
    }

    #[tokio::test]
    async fn test_approved_payment_clears_cart() {
        let store = Arc::new(MemoryStore::new());
        let user_id = shopper(&store).await;
        let checkout = checkout(store.clone(), FixedPaymentSimulator::approve());

        let transaction = checkout.checkout(user_id, 2).await.unwrap();
        assert_eq!(transaction.status, TransactionStatus::Completed);
        assert!(transaction.completed_at.is_some());
        assert_eq!(transaction.total, Cents(3198));
        assert_eq!(transaction.payment_method_id, 2);
        assert!(store.cart_items(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_declined_payment_keeps_cart() {
        let store = Arc::new(MemoryStore::new());
        let user_id = shopper(&store).await;
        let checkout = checkout(store.clone(), FixedPaymentSimulator::decline());

        match checkout.checkout(user_id, 1).await {
            Err(ServiceError::Declined(transaction)) => {
                assert_eq!(transaction.status, TransactionStatus::Failed)
            }
            other => panic!("expected decline, got {:?}", other),
        }
        assert_eq!(store.cart_items(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_decision_fails_transaction() {
        let store = Arc::new(MemoryStore::new());
        let user_id = shopper(&store).await;
        let checkout = checkout(store.clone(), Arc::new(FailingPaymentSimulator));

        assert!(matches!(
            checkout.settle(user_id, 1, None).await,
            Err(ServiceError::InternalServerError(_))
        ));

        let history = store.list_transactions(user_id, 10, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TransactionStatus::Failed);
        assert_eq!(store.cart_items(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_payment_method_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let user_id = shopper(&store).await;
        store.set_payment_method_enabled(4, false).await;
        let checkout = checkout(store.clone(), FixedPaymentSimulator::approve());

        for method in [4, 99] {
            assert!(matches!(
                checkout.checkout(user_id, method).await,
                Err(ServiceError::InvalidState("INVALID_PAYMENT_METHOD", _))
            ));
        }
        assert_eq!(store.transaction_count().await, 0);
    }
}
