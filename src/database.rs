use std::sync::Arc;

use axum::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use log::info;
use rand::RngCore;
use sqlx::PgPool;

use crate::core::{Checkout, NfcEventRouter, QrHandshakeService};
use crate::env::Settings;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    CartItem, Cents, NewNfcEvent, NewTransaction, NfcEvent, NfcEventOutcome, PaymentMethod,
    Product, QrSession, QrSessionStatus, QrSessionTicket, Transaction, TransactionItem,
    TransactionStats, TransactionStatus, User,
};
use crate::payment::PaymentSimulator;
use crate::token::TokenIssuer;

mod memory;
mod migration;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Persists QR login sessions.
///
/// Every state transition is a single conditional write, so two callers racing on the
/// same session can never both win. Expiry is checked by the writes themselves; a row
/// that still says `pending` after its deadline can not be authorized.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &QrSession) -> ServiceResult<()>;

    async fn get_session(&self, id: &str) -> ServiceResult<Option<QrSession>>;

    /// `pending -> authorized`, only if still pending and not expired at `now`
    async fn authorize(&self, id: &str, user_id: u64, now: DateTime<Utc>) -> ServiceResult<bool>;

    /// `authorized -> used`, only if still authorized and not expired at `now`.
    /// Returns the authorizing user for the single caller that performed the transition.
    async fn consume_if_authorized(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<u64>>;

    /// `pending | authorized -> expired` for a session whose deadline has passed
    async fn mark_expired(&self, id: &str, now: DateTime<Utc>) -> ServiceResult<bool>;

    /// Flip every pending session past its deadline to expired
    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> ServiceResult<u64>;

    async fn delete_sessions_created_before(&self, cutoff: DateTime<Utc>) -> ServiceResult<u64>;

    /// Create a new pending session with a random secret that is independent of the id
    async fn create(
        &self,
        device_info: Option<String>,
        ttl: Duration,
    ) -> ServiceResult<QrSessionTicket> {
        let now = Utc::now();
        let session = QrSession {
            id: uuid::Uuid::new_v4().to_string(),
            secret: generate_secret(),
            status: QrSessionStatus::Pending,
            device_info,
            user_id: None,
            created_at: now,
            expires_at: now + ttl,
            authorized_at: None,
            used_at: None,
        };
        self.insert_session(&session).await?;

        Ok(QrSessionTicket {
            id: session.id,
            secret: session.secret,
            expires_at: session.expires_at,
        })
    }

    async fn validate_secret(&self, id: &str, secret: &str) -> ServiceResult<bool> {
        Ok(self
            .get_session(id)
            .await?
            .map(|session| session.secret_matches(secret))
            .unwrap_or(false))
    }
}

/// Maps physical nfc cards to user accounts. A card belongs to at most one user.
#[async_trait]
pub trait IdentityLinkRegistry: Send + Sync {
    async fn create_user(
        &self,
        name: &str,
        phone: &str,
        preferred_payment_method_id: Option<u64>,
    ) -> ServiceResult<User>;

    async fn get_user(&self, user_id: u64) -> ServiceResult<Option<User>>;

    /// Fails with `Conflict` if the card belongs to another user, succeeds without
    /// change if it already belongs to `user_id`.
    async fn link(&self, user_id: u64, nfc_uid: &str) -> ServiceResult<User>;

    /// Fails with `InvalidState` if no card is linked.
    async fn unlink(&self, user_id: u64) -> ServiceResult<()>;

    async fn resolve(&self, nfc_uid: &str) -> ServiceResult<Option<User>>;
}

/// Carts, payment methods and the transaction ledger.
#[async_trait]
pub trait CheckoutLedger: Send + Sync {
    async fn insert_product(&self, name: &str, price: Cents) -> ServiceResult<Product>;

    async fn cart_items(&self, user_id: u64) -> ServiceResult<Vec<CartItem>>;

    /// Set the quantity of a product in the cart, a quantity of zero or less removes it
    async fn put_cart_item(&self, user_id: u64, product_id: u64, quantity: i32)
        -> ServiceResult<()>;

    async fn clear_cart(&self, user_id: u64) -> ServiceResult<()>;

    /// Enabled payment methods in display order
    async fn payment_methods(&self) -> ServiceResult<Vec<PaymentMethod>>;

    async fn get_payment_method(&self, id: u64) -> ServiceResult<Option<PaymentMethod>>;

    /// Write header and items as one unit. Either both are visible afterwards or neither.
    async fn insert_transaction(&self, transaction: NewTransaction) -> ServiceResult<Transaction>;

    async fn get_transaction(&self, id: u64) -> ServiceResult<Option<Transaction>>;

    /// Move a pending transaction to a terminal status. A transaction that is already
    /// terminal is returned unchanged.
    async fn finish_transaction(
        &self,
        id: u64,
        status: TransactionStatus,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction>;

    async fn list_transactions(
        &self,
        user_id: u64,
        limit: i64,
        status: Option<TransactionStatus>,
    ) -> ServiceResult<Vec<Transaction>>;

    async fn transaction_stats(&self, user_id: u64) -> ServiceResult<TransactionStats>;

    /// Snapshot the user's cart into a pending transaction.
    ///
    /// Prices are copied into the items, the total is the exact sum of all lines.
    /// The cart itself is left untouched.
    async fn create_from_cart(
        &self,
        user_id: u64,
        payment_method_id: u64,
        nfc_uid: Option<String>,
    ) -> ServiceResult<Transaction> {
        let cart = self.cart_items(user_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::EmptyInput("CART_EMPTY", "Cart is empty"));
        }

        let items: Vec<TransactionItem> = cart
            .iter()
            .map(|item| TransactionItem {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();
        let total = items.iter().map(|item| item.subtotal()).sum();

        let transaction = self
            .insert_transaction(NewTransaction {
                user_id,
                payment_method_id,
                nfc_uid,
                total,
                items,
            })
            .await?;

        info!(
            "Created transaction {} for user {} over {}",
            transaction.id, user_id, transaction.total
        );
        Ok(transaction)
    }

    async fn complete(&self, id: u64) -> ServiceResult<Transaction> {
        self.finish_transaction(id, TransactionStatus::Completed, Utc::now())
            .await
    }

    async fn fail(&self, id: u64) -> ServiceResult<Transaction> {
        self.finish_transaction(id, TransactionStatus::Failed, Utc::now())
            .await
    }

    /// Read a transaction on behalf of `user_id`. Foreign and unknown ids look the same.
    async fn get_owned_transaction(&self, user_id: u64, id: u64) -> ServiceResult<Transaction> {
        match self.get_transaction(id).await? {
            Some(transaction) if transaction.user_id == user_id => Ok(transaction),
            _ => Err(ServiceError::Forbidden("Access denied")),
        }
    }

    /// The user's preferred payment method, otherwise the first enabled one
    async fn default_payment_method(&self, user: &User) -> ServiceResult<u64> {
        if let Some(id) = user.preferred_payment_method_id {
            if let Some(method) = self.get_payment_method(id).await? {
                if method.enabled {
                    return Ok(method.id);
                }
            }
        }

        self.payment_methods()
            .await?
            .first()
            .map(|method| method.id)
            .ok_or(ServiceError::EmptyInput(
                "NO_PAYMENT_METHOD",
                "No payment method available",
            ))
    }
}

/// Log of nfc reader events, polled by the display.
#[async_trait]
pub trait NfcEventStore: Send + Sync {
    async fn record(&self, event: NewNfcEvent) -> ServiceResult<NfcEvent>;

    /// Newest first
    async fn list_events(&self, limit: i64, unprocessed_only: bool)
        -> ServiceResult<Vec<NfcEvent>>;

    async fn find_event(&self, uid: &str, created_at: DateTime<Utc>)
        -> ServiceResult<Option<NfcEvent>>;

    /// Returns `false` if the event does not exist. Marking an already processed event
    /// again changes nothing.
    async fn mark_processed(
        &self,
        id: u64,
        outcome: NfcEventOutcome,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool>;

    /// Take the per card lock. A lock older than `stale_after` is taken over.
    ///
    /// Returns the holder token on success, `None` while someone else holds the lock.
    async fn acquire_tap_lock(
        &self,
        uid: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> ServiceResult<Option<String>>;

    /// Release the lock only if `holder` still owns it. A lock that was taken over
    /// after going stale stays with its new holder.
    async fn release_tap_lock(&self, uid: &str, holder: &str) -> ServiceResult<()>;

    async fn delete_processed_events_before(&self, cutoff: DateTime<Utc>) -> ServiceResult<u64>;
}

/// Everything a store backend has to provide
pub trait Store: SessionStore + IdentityLinkRegistry + CheckoutLedger + NfcEventStore {}

impl<T> Store for T where T: SessionStore + IdentityLinkRegistry + CheckoutLedger + NfcEventStore {}

fn generate_secret() -> String {
    let mut data = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut data);
    URL_SAFE_NO_PAD.encode(data)
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub identities: Arc<dyn IdentityLinkRegistry>,
    pub ledger: Arc<dyn CheckoutLedger>,
    pub nfc_events: Arc<dyn NfcEventStore>,
    pub tokens: Arc<TokenIssuer>,
    pub handshake: Arc<QrHandshakeService>,
    pub checkout: Arc<Checkout>,
    pub nfc: Arc<NfcEventRouter>,
}

impl AppState {
    /// Connect to the configured backend. `memory` selects the in process store.
    pub async fn connect(
        url: &str,
        payment: Arc<dyn PaymentSimulator>,
        tokens: TokenIssuer,
        settings: Settings,
    ) -> ServiceResult<AppState> {
        if url == "memory" {
            info!("Using in-memory store");
            return Ok(AppState::new(
                Arc::new(MemoryStore::new()),
                payment,
                tokens,
                settings,
            ));
        }

        let store = PgStore::connect(url).await?;
        Ok(AppState::new(Arc::new(store), payment, tokens, settings))
    }

    pub async fn from_pool(
        pool: PgPool,
        payment: Arc<dyn PaymentSimulator>,
        tokens: TokenIssuer,
        settings: Settings,
    ) -> ServiceResult<AppState> {
        let store = PgStore::from_pool(pool).await?;
        Ok(AppState::new(Arc::new(store), payment, tokens, settings))
    }

    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        payment: Arc<dyn PaymentSimulator>,
        tokens: TokenIssuer,
        settings: Settings,
    ) -> AppState {
        let sessions: Arc<dyn SessionStore> = store.clone();
        let identities: Arc<dyn IdentityLinkRegistry> = store.clone();
        let ledger: Arc<dyn CheckoutLedger> = store.clone();
        let nfc_events: Arc<dyn NfcEventStore> = store;
        let tokens = Arc::new(tokens);

        let handshake = Arc::new(QrHandshakeService::new(
            sessions.clone(),
            identities.clone(),
            tokens.clone(),
            &settings,
        ));
        let checkout = Arc::new(Checkout::new(ledger.clone(), payment));
        let nfc = Arc::new(NfcEventRouter::new(
            nfc_events.clone(),
            identities.clone(),
            ledger.clone(),
            checkout.clone(),
            &settings,
        ));

        AppState {
            sessions,
            identities,
            ledger,
            nfc_events,
            tokens,
            handshake,
            checkout,
            nfc,
        }
    }
}
