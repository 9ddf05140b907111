use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};

use crate::database::{CheckoutLedger, IdentityLinkRegistry, NfcEventStore};
use crate::env::Settings;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    NewNfcEvent, NfcEvent, NfcEventKind, NfcEventOutcome, Transaction, TransactionStatus, User,
};

use super::Checkout;

/// Device id recorded for events the server writes itself
const PAYMENT_DEVICE_ID: &str = "auto-payment";

/// Identifies an event either directly or by the tap that produced it
#[derive(Debug, PartialEq, Clone)]
pub enum EventRef {
    Id(u64),
    Tap { uid: String, created_at: DateTime<Utc> },
}

#[derive(Debug, PartialEq, Clone)]
pub struct PaymentOutcome {
    pub user: User,
    pub transaction: Transaction,
}

/// Routes nfc taps to payments and keeps the event log the display polls.
pub struct NfcEventRouter {
    events: Arc<dyn NfcEventStore>,
    identities: Arc<dyn IdentityLinkRegistry>,
    ledger: Arc<dyn CheckoutLedger>,
    checkout: Arc<Checkout>,
    tap_lock_timeout: Duration,
}

fn required_uid(uid: &str) -> ServiceResult<&str> {
    let uid = uid.trim();
    if uid.is_empty() {
        return Err(ServiceError::EmptyInput("NFC_UID_REQUIRED", "NFC UID required"));
    }
    Ok(uid)
}

impl NfcEventRouter {
    pub fn new(
        events: Arc<dyn NfcEventStore>,
        identities: Arc<dyn IdentityLinkRegistry>,
        ledger: Arc<dyn CheckoutLedger>,
        checkout: Arc<Checkout>,
        settings: &Settings,
    ) -> Self {
        Self {
            events,
            identities,
            ledger,
            checkout,
            tap_lock_timeout: settings.tap_lock_timeout,
        }
    }

    pub async fn record_tap(
        &self,
        uid: &str,
        kind: NfcEventKind,
        device_id: &str,
    ) -> ServiceResult<NfcEvent> {
        let uid = required_uid(uid)?;
        let event = self
            .events
            .record(NewNfcEvent {
                uid: uid.to_owned(),
                kind,
                device_id: device_id.to_owned(),
                processed: false,
                transaction_id: None,
                user_name: None,
                total: None,
            })
            .await?;

        info!(
            "Recorded nfc event {} ({}) for {} from {}",
            event.id,
            kind.as_str(),
            uid,
            device_id
        );
        Ok(event)
    }

    /// Pay the cart of the card's owner.
    ///
    /// Only one payment per card runs at a time, a tap arriving while another one is
    /// in flight is rejected. The outcome is recorded as an unprocessed event so the
    /// display picks it up. A declined payment is returned as a failed transaction.
    pub async fn trigger_payment(&self, uid: &str) -> ServiceResult<PaymentOutcome> {
        let uid = required_uid(uid)?;
        let user = self.identities.resolve(uid).await?.ok_or(ServiceError::NotFound(
            "NFC_NOT_LINKED",
            "NFC card not linked to any account",
        ))?;

        let holder = match self
            .events
            .acquire_tap_lock(uid, Utc::now(), self.tap_lock_timeout)
            .await?
        {
            Some(holder) => holder,
            None => {
                warn!("Rejected tap for {}, a payment is already in progress", uid);
                return Err(ServiceError::Conflict(
                    "NFC_TAP_IN_PROGRESS",
                    "A payment for this card is already in progress",
                ));
            }
        };

        let result = self.pay(user, uid).await;

        if let Err(e) = self.events.release_tap_lock(uid, &holder).await {
            error!("Could not release tap lock for {}: {}", uid, e);
        }
        result
    }

    async fn pay(&self, user: User, uid: &str) -> ServiceResult<PaymentOutcome> {
        let payment_method_id = self.ledger.default_payment_method(&user).await?;
        let transaction = self
            .checkout
            .settle(user.id, payment_method_id, Some(uid.to_owned()))
            .await?;

        let kind = match transaction.status {
            TransactionStatus::Completed => NfcEventKind::PaymentSuccess,
            _ => NfcEventKind::PaymentFailed,
        };
        // The payment is settled at this point, a lost event must not turn it into an error
        let recorded = self
            .events
            .record(NewNfcEvent {
                uid: uid.to_owned(),
                kind,
                device_id: PAYMENT_DEVICE_ID.to_owned(),
                processed: false,
                transaction_id: Some(transaction.id),
                user_name: Some(user.name.clone()),
                total: Some(transaction.total),
            })
            .await;
        if let Err(e) = recorded {
            error!(
                "Could not record nfc event for transaction {}: {}",
                transaction.id, e
            );
        }

        info!(
            "Nfc payment for {} by user {}: transaction {} {}",
            uid,
            user.id,
            transaction.id,
            transaction.status.as_str()
        );
        Ok(PaymentOutcome { user, transaction })
    }

    /// Mark an event as handled by the display. Marking it again is a no-op.
    pub async fn mark_processed(
        &self,
        event: EventRef,
        outcome: NfcEventOutcome,
    ) -> ServiceResult<()> {
        let not_found = ServiceError::NotFound("NFC_EVENT_NOT_FOUND", "NFC event not found");

        if let Some(transaction_id) = outcome.transaction_id {
            if self.ledger.get_transaction(transaction_id).await?.is_none() {
                return Err(ServiceError::NotFound(
                    "TRANSACTION_NOT_FOUND",
                    "Transaction not found",
                ));
            }
        }

        let id = match event {
            EventRef::Id(id) => id,
            EventRef::Tap { uid, created_at } => {
                match self.events.find_event(&uid, created_at).await? {
                    Some(event) => event.id,
                    None => return Err(not_found),
                }
            }
        };

        if !self.events.mark_processed(id, outcome, Utc::now()).await? {
            return Err(not_found);
        }
        Ok(())
    }

    pub async fn list_events(&self, limit: i64, unprocessed_only: bool) -> ServiceResult<Vec<NfcEvent>> {
        self.events
            .list_events(limit.clamp(1, 100), unprocessed_only)
            .await
    }
}
