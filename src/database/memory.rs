//! In process store
//!
//! All tables sit behind one mutex, so every trait method is atomic with respect to
//! every other one. This gives the same guarantees as the conditional statements of
//! the postgres store without a database.
use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use axum::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use tokio::sync::Mutex;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    CartItem, Cents, NewNfcEvent, NewTransaction, NfcEvent, NfcEventOutcome, PaymentMethod,
    Product, QrSession, QrSessionStatus, Transaction, TransactionStats, TransactionStatus, User,
};

use super::{CheckoutLedger, IdentityLinkRegistry, NfcEventStore, SessionStore};

#[derive(Default)]
struct Tables {
    users: BTreeMap<u64, User>,
    payment_methods: Vec<PaymentMethod>,
    products: BTreeMap<u64, Product>,
    /// Cart lines per user in insertion order
    carts: HashMap<u64, Vec<(u64, i32)>>,
    sessions: HashMap<String, QrSession>,
    transactions: BTreeMap<u64, Transaction>,
    events: BTreeMap<u64, NfcEvent>,
    /// Acquisition time and holder token per card
    tap_locks: HashMap<String, (DateTime<Utc>, String)>,
    last_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    #[cfg(test)]
    fail_next_item_write: AtomicBool,
    #[cfg(test)]
    fail_next_event_write: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let payment_methods = [
            (1, "Mada Pay"),
            (2, "Apple Pay"),
            (3, "Google Pay"),
            (4, "Cash on Delivery"),
        ]
        .into_iter()
        .map(|(id, name)| PaymentMethod {
            id,
            name: name.to_owned(),
            enabled: true,
            display_order: id as i32,
        })
        .collect();

        MemoryStore {
            tables: Mutex::new(Tables {
                payment_methods,
                last_id: 100,
                ..Default::default()
            }),
            #[cfg(test)]
            fail_next_item_write: AtomicBool::new(false),
            #[cfg(test)]
            fail_next_event_write: AtomicBool::new(false),
        }
    }

    /// Make the next transaction write fail after its header was stored
    #[cfg(test)]
    pub fn fail_next_item_write(&self) {
        self.fail_next_item_write.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn fail_next_event_write(&self) {
        self.fail_next_event_write.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub async fn set_payment_method_enabled(&self, id: u64, enabled: bool) {
        let mut tables = self.tables.lock().await;
        for method in tables.payment_methods.iter_mut() {
            if method.id == id {
                method.enabled = enabled;
            }
        }
    }

    #[cfg(test)]
    pub async fn set_product_price(&self, id: u64, price: Cents) {
        let mut tables = self.tables.lock().await;
        if let Some(product) = tables.products.get_mut(&id) {
            product.price = price;
        }
    }

    #[cfg(test)]
    pub async fn transaction_count(&self) -> usize {
        self.tables.lock().await.transactions.len()
    }

    #[cfg(test)]
    fn should_fail_item_write(&self) -> bool {
        self.fail_next_item_write.swap(false, Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn should_fail_item_write(&self) -> bool {
        false
    }

    #[cfg(test)]
    fn should_fail_event_write(&self) -> bool {
        self.fail_next_event_write.swap(false, Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn should_fail_event_write(&self) -> bool {
        false
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &QrSession) -> ServiceResult<()> {
        let mut tables = self.tables.lock().await;
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> ServiceResult<Option<QrSession>> {
        Ok(self.tables.lock().await.sessions.get(id).cloned())
    }

    async fn authorize(&self, id: &str, user_id: u64, now: DateTime<Utc>) -> ServiceResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(id) {
            Some(session)
                if session.status == QrSessionStatus::Pending && !session.is_expired(now) =>
            {
                session.status = QrSessionStatus::Authorized;
                session.user_id = Some(user_id);
                session.authorized_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_if_authorized(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<u64>> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(id) {
            Some(session)
                if session.status == QrSessionStatus::Authorized && !session.is_expired(now) =>
            {
                session.status = QrSessionStatus::Used;
                session.used_at = Some(now);
                Ok(session.user_id)
            }
            _ => Ok(None),
        }
    }

    async fn mark_expired(&self, id: &str, now: DateTime<Utc>) -> ServiceResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(id) {
            Some(session)
                if matches!(
                    session.status,
                    QrSessionStatus::Pending | QrSessionStatus::Authorized
                ) && session.is_expired(now) =>
            {
                session.status = QrSessionStatus::Expired;
                session.user_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> ServiceResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut count = 0;
        for session in tables.sessions.values_mut() {
            if session.status == QrSessionStatus::Pending && session.is_expired(now) {
                session.status = QrSessionStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_sessions_created_before(&self, cutoff: DateTime<Utc>) -> ServiceResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| session.created_at >= cutoff);
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl IdentityLinkRegistry for MemoryStore {
    async fn create_user(
        &self,
        name: &str,
        phone: &str,
        preferred_payment_method_id: Option<u64>,
    ) -> ServiceResult<User> {
        let mut tables = self.tables.lock().await;
        let user = User {
            id: tables.next_id(),
            name: name.to_owned(),
            phone: phone.to_owned(),
            nfc_uid: None,
            preferred_payment_method_id,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: u64) -> ServiceResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn link(&self, user_id: u64, nfc_uid: &str) -> ServiceResult<User> {
        let mut tables = self.tables.lock().await;

        let claimed_by_other = tables
            .users
            .values()
            .any(|u| u.id != user_id && u.nfc_uid.as_deref() == Some(nfc_uid));
        if claimed_by_other {
            return Err(ServiceError::Conflict(
                "NFC_ALREADY_LINKED",
                "NFC card is already linked to another account",
            ));
        }

        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(ServiceError::NotFound("USER_NOT_FOUND", "User not found"))?;
        user.nfc_uid = Some(nfc_uid.to_owned());
        Ok(user.clone())
    }

    async fn unlink(&self, user_id: u64) -> ServiceResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&user_id) {
            Some(user) if user.nfc_uid.is_some() => {
                user.nfc_uid = None;
                Ok(())
            }
            _ => Err(ServiceError::InvalidState(
                "NO_NFC_LINKED",
                "No NFC card is linked to this account".to_owned(),
            )),
        }
    }

    async fn resolve(&self, nfc_uid: &str) -> ServiceResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.nfc_uid.as_deref() == Some(nfc_uid))
            .cloned())
    }
}

fn load_transaction(tables: &Tables, id: u64) -> ServiceResult<Transaction> {
    tables
        .transactions
        .get(&id)
        .cloned()
        .ok_or(ServiceError::NotFound(
            "TRANSACTION_NOT_FOUND",
            "Transaction not found",
        ))
}

#[async_trait]
impl CheckoutLedger for MemoryStore {
    async fn insert_product(&self, name: &str, price: Cents) -> ServiceResult<Product> {
        let mut tables = self.tables.lock().await;
        let product = Product {
            id: tables.next_id(),
            name: name.to_owned(),
            price,
        };
        tables.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn cart_items(&self, user_id: u64) -> ServiceResult<Vec<CartItem>> {
        let tables = self.tables.lock().await;
        let lines = match tables.carts.get(&user_id) {
            Some(lines) => lines,
            None => return Ok(Vec::new()),
        };

        Ok(lines
            .iter()
            .filter_map(|(product_id, quantity)| {
                tables.products.get(product_id).map(|product| CartItem {
                    product_id: product.id,
                    name: product.name.clone(),
                    quantity: *quantity,
                    unit_price: product.price,
                })
            })
            .collect())
    }

    async fn put_cart_item(
        &self,
        user_id: u64,
        product_id: u64,
        quantity: i32,
    ) -> ServiceResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.products.contains_key(&product_id) {
            return Err(ServiceError::NotFound("PRODUCT_NOT_FOUND", "Product not found"));
        }

        let lines = tables.carts.entry(user_id).or_default();
        if quantity <= 0 {
            lines.retain(|(id, _)| *id != product_id);
        } else if let Some(line) = lines.iter_mut().find(|(id, _)| *id == product_id) {
            line.1 = quantity;
        } else {
            lines.push((product_id, quantity));
        }
        Ok(())
    }

    async fn clear_cart(&self, user_id: u64) -> ServiceResult<()> {
        self.tables.lock().await.carts.remove(&user_id);
        Ok(())
    }

    async fn payment_methods(&self) -> ServiceResult<Vec<PaymentMethod>> {
        let tables = self.tables.lock().await;
        let mut methods: Vec<PaymentMethod> = tables
            .payment_methods
            .iter()
            .filter(|m| m.enabled)
            .cloned()
            .collect();
        methods.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(methods)
    }

    async fn get_payment_method(&self, id: u64) -> ServiceResult<Option<PaymentMethod>> {
        let tables = self.tables.lock().await;
        Ok(tables.payment_methods.iter().find(|m| m.id == id).cloned())
    }

    async fn insert_transaction(&self, transaction: NewTransaction) -> ServiceResult<Transaction> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let header = Transaction {
            id,
            user_id: transaction.user_id,
            total: transaction.total,
            payment_method_id: transaction.payment_method_id,
            status: TransactionStatus::Pending,
            nfc_uid: transaction.nfc_uid,
            created_at: Utc::now().trunc_subsecs(6),
            completed_at: None,
            items: Vec::new(),
        };
        tables.transactions.insert(id, header);

        if self.should_fail_item_write() {
            tables.transactions.remove(&id);
            return Err(ServiceError::InternalServerError(
                "Could not write transaction items".to_owned(),
            ));
        }

        let stored = tables
            .transactions
            .get_mut(&id)
            .ok_or_else(|| ServiceError::InternalServerError("Lost transaction".to_owned()))?;
        stored.items = transaction.items;
        Ok(stored.clone())
    }

    async fn get_transaction(&self, id: u64) -> ServiceResult<Option<Transaction>> {
        Ok(self.tables.lock().await.transactions.get(&id).cloned())
    }

    async fn finish_transaction(
        &self,
        id: u64,
        status: TransactionStatus,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction> {
        let mut tables = self.tables.lock().await;
        if let Some(transaction) = tables.transactions.get_mut(&id) {
            if transaction.status == TransactionStatus::Pending {
                transaction.status = status;
                if status == TransactionStatus::Completed {
                    transaction.completed_at = Some(now);
                }
            }
        }
        load_transaction(&tables, id)
    }

    async fn list_transactions(
        &self,
        user_id: u64,
        limit: i64,
        status: Option<TransactionStatus>,
    ) -> ServiceResult<Vec<Transaction>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .transactions
            .values()
            .rev()
            .filter(|t| t.user_id == user_id)
            .filter(|t| status.map(|s| s == t.status).unwrap_or(true))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn transaction_stats(&self, user_id: u64) -> ServiceResult<TransactionStats> {
        let tables = self.tables.lock().await;
        let mut stats = TransactionStats::default();
        for transaction in tables.transactions.values().filter(|t| t.user_id == user_id) {
            stats.total_transactions += 1;
            match transaction.status {
                TransactionStatus::Completed => {
                    stats.completed_count += 1;
                    stats.total_spent = stats.total_spent + transaction.total;
                }
                TransactionStatus::Failed => stats.failed_count += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl NfcEventStore for MemoryStore {
    async fn record(&self, event: NewNfcEvent) -> ServiceResult<NfcEvent> {
        if self.should_fail_event_write() {
            return Err(ServiceError::InternalServerError(
                "Could not write nfc event".to_owned(),
            ));
        }
        let mut tables = self.tables.lock().await;
        let now = Utc::now().trunc_subsecs(6);
        let event = NfcEvent {
            id: tables.next_id(),
            uid: event.uid,
            kind: event.kind,
            device_id: event.device_id,
            processed: event.processed,
            transaction_id: event.transaction_id,
            user_name: event.user_name,
            total: event.total,
            created_at: now,
            processed_at: if event.processed { Some(now) } else { None },
        };
        tables.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn list_events(
        &self,
        limit: i64,
        unprocessed_only: bool,
    ) -> ServiceResult<Vec<NfcEvent>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .events
            .values()
            .rev()
            .filter(|e| !unprocessed_only || !e.processed)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_event(
        &self,
        uid: &str,
        created_at: DateTime<Utc>,
    ) -> ServiceResult<Option<NfcEvent>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .events
            .values()
            .rev()
            .find(|e| e.uid == uid && e.created_at == created_at)
            .cloned())
    }

    async fn mark_processed(
        &self,
        id: u64,
        outcome: NfcEventOutcome,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.events.get_mut(&id) {
            Some(event) => {
                if !event.processed {
                    event.processed = true;
                    event.processed_at = Some(now);
                    event.transaction_id = outcome.transaction_id.or(event.transaction_id);
                    event.user_name = outcome.user_name.or(event.user_name.take());
                    event.total = outcome.total.or(event.total);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn acquire_tap_lock(
        &self,
        uid: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> ServiceResult<Option<String>> {
        let mut tables = self.tables.lock().await;
        match tables.tap_locks.get(uid) {
            Some((acquired_at, _)) if *acquired_at > now - stale_after => Ok(None),
            _ => {
                let holder = uuid::Uuid::new_v4().to_string();
                tables
                    .tap_locks
                    .insert(uid.to_owned(), (now, holder.clone()));
                Ok(Some(holder))
            }
        }
    }

    async fn release_tap_lock(&self, uid: &str, holder: &str) -> ServiceResult<()> {
        let mut tables = self.tables.lock().await;
        if matches!(tables.tap_locks.get(uid), Some((_, current)) if current == holder) {
            tables.tap_locks.remove(uid);
        }
        Ok(())
    }

    async fn delete_processed_events_before(&self, cutoff: DateTime<Utc>) -> ServiceResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.events.len();
        tables
            .events
            .retain(|_, e| !(e.processed && e.created_at < cutoff));
        Ok((before - tables.events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NfcEventKind, TransactionItem};

    async fn user_with_cart(store: &MemoryStore) -> (User, Product, Product) {
        let user = store.create_user("Sara", "0500000001", None).await.unwrap();
        let milk = store.insert_product("Fresh Milk", Cents(1599)).await.unwrap();
        let bread = store.insert_product("Fresh Bread", Cents(750)).await.unwrap();
        store.put_cart_item(user.id, milk.id, 1).await.unwrap();
        store.put_cart_item(user.id, bread.id, 2).await.unwrap();
        (user, milk, bread)
    }

    #[tokio::test]
    async fn test_session_transitions_are_one_shot() {
        let store = MemoryStore::new();
        let ticket = store.create(None, Duration::minutes(5)).await.unwrap();
        let now = Utc::now();

        assert!(store.authorize(&ticket.id, 1, now).await.unwrap());
        assert!(!store.authorize(&ticket.id, 2, now).await.unwrap());
        assert_eq!(
            store.consume_if_authorized(&ticket.id, now).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            store.consume_if_authorized(&ticket.id, now).await.unwrap(),
            None
        );

        let session = store.get_session(&ticket.id).await.unwrap().unwrap();
        assert_eq!(session.status, QrSessionStatus::Used);
        assert_eq!(session.user_id, Some(1));
    }

    #[tokio::test]
    async fn test_secret_is_independent_of_id() {
        let store = MemoryStore::new();
        let ticket = store.create(None, Duration::minutes(5)).await.unwrap();

        assert_ne!(ticket.id, ticket.secret);
        assert!(store.validate_secret(&ticket.id, &ticket.secret).await.unwrap());
        assert!(!store.validate_secret(&ticket.id, &ticket.id).await.unwrap());
        assert!(!store.validate_secret("unknown", &ticket.secret).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_session_clears_user() {
        let store = MemoryStore::new();
        let ticket = store.create(None, Duration::seconds(1)).await.unwrap();
        let now = Utc::now();
        assert!(store.authorize(&ticket.id, 7, now).await.unwrap());

        let later = now + Duration::seconds(5);
        assert_eq!(
            store.consume_if_authorized(&ticket.id, later).await.unwrap(),
            None
        );
        assert!(store.mark_expired(&ticket.id, later).await.unwrap());

        let session = store.get_session(&ticket.id).await.unwrap().unwrap();
        assert_eq!(session.status, QrSessionStatus::Expired);
        assert_eq!(session.user_id, None);
    }

    #[tokio::test]
    async fn test_cleanup_only_touches_stale_pending_sessions() {
        let store = MemoryStore::new();
        let stale = store.create(None, Duration::seconds(-1)).await.unwrap();
        let fresh = store.create(None, Duration::minutes(5)).await.unwrap();

        assert_eq!(store.expire_stale_sessions(Utc::now()).await.unwrap(), 1);
        let stale = store.get_session(&stale.id).await.unwrap().unwrap();
        let fresh = store.get_session(&fresh.id).await.unwrap().unwrap();
        assert_eq!(stale.status, QrSessionStatus::Expired);
        assert_eq!(fresh.status, QrSessionStatus::Pending);

        let deleted = store
            .delete_sessions_created_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn test_link_uniqueness() {
        let store = MemoryStore::new();
        let a = store.create_user("A", "1", None).await.unwrap();
        let b = store.create_user("B", "2", None).await.unwrap();

        store.link(a.id, "04A1B2").await.unwrap();
        let again = store.link(a.id, "04A1B2").await.unwrap();
        assert_eq!(again.nfc_uid.as_deref(), Some("04A1B2"));

        let err = store.link(b.id, "04A1B2").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict("NFC_ALREADY_LINKED", _)));
        assert_eq!(store.resolve("04A1B2").await.unwrap().unwrap().id, a.id);

        store.unlink(a.id).await.unwrap();
        assert!(matches!(
            store.unlink(a.id).await.unwrap_err(),
            ServiceError::InvalidState("NO_NFC_LINKED", _)
        ));
        assert_eq!(store.resolve("04A1B2").await.unwrap(), None);
        store.link(b.id, "04A1B2").await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_snapshots_cart() {
        let store = MemoryStore::new();
        let (user, milk, bread) = user_with_cart(&store).await;

        let transaction = store.create_from_cart(user.id, 1, None).await.unwrap();
        assert_eq!(transaction.total, Cents(1599 + 2 * 750));
        assert_eq!(transaction.status, TransactionStatus::Pending);
        assert_eq!(
            transaction.items,
            vec![
                TransactionItem {
                    product_id: milk.id,
                    quantity: 1,
                    unit_price: Cents(1599)
                },
                TransactionItem {
                    product_id: bread.id,
                    quantity: 2,
                    unit_price: Cents(750)
                },
            ]
        );

        store.set_product_price(milk.id, Cents(9999)).await;
        let stored = store.get_transaction(transaction.id).await.unwrap().unwrap();
        assert_eq!(stored.items[0].unit_price, Cents(1599));
        assert_eq!(stored.total, Cents(3099));

        assert_eq!(store.cart_items(user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let store = MemoryStore::new();
        let user = store.create_user("Sara", "1", None).await.unwrap();
        let err = store.create_from_cart(user.id, 1, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::EmptyInput("CART_EMPTY", _)));
        assert_eq!(store.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_item_write_leaves_no_header() {
        let store = MemoryStore::new();
        let (user, _, _) = user_with_cart(&store).await;

        store.fail_next_item_write();
        assert!(store.create_from_cart(user.id, 1, None).await.is_err());
        assert_eq!(store.transaction_count().await, 0);
        assert!(store
            .list_transactions(user.id, 50, None)
            .await
            .unwrap()
            .is_empty());

        let transaction = store.create_from_cart(user.id, 1, None).await.unwrap();
        assert_eq!(transaction.items.len(), 2);
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let store = MemoryStore::new();
        let (user, _, _) = user_with_cart(&store).await;

        let first = store.create_from_cart(user.id, 1, None).await.unwrap();
        assert_eq!(
            store.complete(first.id).await.unwrap().status,
            TransactionStatus::Completed
        );
        assert_eq!(
            store.complete(first.id).await.unwrap().status,
            TransactionStatus::Completed
        );
        assert_eq!(
            store.fail(first.id).await.unwrap().status,
            TransactionStatus::Completed
        );

        let second = store.create_from_cart(user.id, 1, None).await.unwrap();
        assert_eq!(
            store.fail(second.id).await.unwrap().status,
            TransactionStatus::Failed
        );
        let completed = store.complete(second.id).await.unwrap();
        assert_eq!(completed.status, TransactionStatus::Failed);
        assert_eq!(completed.completed_at, None);

        let stats = store.transaction_stats(user.id).await.unwrap();
        assert_eq!(stats.total_transactions, 2);
        assert_eq!(stats.completed_count, 1);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.total_spent, first.total);
    }

    #[tokio::test]
    async fn test_foreign_transaction_is_forbidden() {
        let store = MemoryStore::new();
        let (user, _, _) = user_with_cart(&store).await;
        let other = store.create_user("Omar", "2", None).await.unwrap();
        let transaction = store.create_from_cart(user.id, 1, None).await.unwrap();

        assert!(store
            .get_owned_transaction(user.id, transaction.id)
            .await
            .is_ok());
        assert!(matches!(
            store.get_owned_transaction(other.id, transaction.id).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            store.get_owned_transaction(user.id, 999_999).await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_default_payment_method() {
        let store = MemoryStore::new();
        let plain = store.create_user("A", "1", None).await.unwrap();
        let prefers = store.create_user("B", "2", Some(3)).await.unwrap();

        assert_eq!(store.default_payment_method(&plain).await.unwrap(), 1);
        assert_eq!(store.default_payment_method(&prefers).await.unwrap(), 3);

        store.set_payment_method_enabled(3, false).await;
        assert_eq!(store.default_payment_method(&prefers).await.unwrap(), 1);

        for id in 1..=4 {
            store.set_payment_method_enabled(id, false).await;
        }
        assert!(matches!(
            store.default_payment_method(&plain).await,
            Err(ServiceError::EmptyInput("NO_PAYMENT_METHOD", _))
        ));
    }

    #[tokio::test]
    async fn test_mark_processed_is_idempotent() {
        let store = MemoryStore::new();
        let event = store
            .record(NewNfcEvent {
                uid: "04A1B2".to_owned(),
                kind: NfcEventKind::Detected,
                device_id: "reader-1".to_owned(),
                processed: false,
                transaction_id: None,
                user_name: None,
                total: None,
            })
            .await
            .unwrap();

        assert_eq!(store.list_events(10, true).await.unwrap().len(), 1);

        let outcome = NfcEventOutcome {
            transaction_id: Some(5),
            user_name: Some("Sara".to_owned()),
            total: Some(Cents(2750)),
        };
        assert!(store
            .mark_processed(event.id, outcome, Utc::now())
            .await
            .unwrap());
        assert!(store
            .mark_processed(event.id, NfcEventOutcome::default(), Utc::now())
            .await
            .unwrap());
        assert!(!store
            .mark_processed(999_999, NfcEventOutcome::default(), Utc::now())
            .await
            .unwrap());

        assert!(store.list_events(10, true).await.unwrap().is_empty());
        let all = store.list_events(10, false).await.unwrap();
        assert_eq!(all[0].transaction_id, Some(5));
        assert_eq!(all[0].total, Some(Cents(2750)));

        let found = store
            .find_event("04A1B2", event.created_at)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, event.id);
    }

    #[tokio::test]
    async fn test_tap_lock_is_exclusive_until_stale() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let stale_after = Duration::seconds(30);

        let first = store.acquire_tap_lock("04A1B2", now, stale_after).await.unwrap();
        assert!(first.is_some());
        assert_eq!(store.acquire_tap_lock("04A1B2", now, stale_after).await.unwrap(), None);
        assert!(store
            .acquire_tap_lock("FFFF", now, stale_after)
            .await
            .unwrap()
            .is_some());

        let later = now + Duration::seconds(31);
        let second = store
            .acquire_tap_lock("04A1B2", later, stale_after)
            .await
            .unwrap()
            .unwrap();

        store.release_tap_lock("04A1B2", &second).await.unwrap();
        assert!(store
            .acquire_tap_lock("04A1B2", later, stale_after)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_stale_holder_can_not_release_taken_over_lock() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let stale_after = Duration::seconds(30);

        let slow = store
            .acquire_tap_lock("04A1B2", now, stale_after)
            .await
            .unwrap()
            .unwrap();
        let later = now + Duration::seconds(31);
        let current = store
            .acquire_tap_lock("04A1B2", later, stale_after)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(slow, current);

        // The slow payment finishes after its lock was taken over
        store.release_tap_lock("04A1B2", &slow).await.unwrap();
        assert_eq!(
            store.acquire_tap_lock("04A1B2", later, stale_after).await.unwrap(),
            None
        );

        store.release_tap_lock("04A1B2", &current).await.unwrap();
        assert!(store
            .acquire_tap_lock("04A1B2", later, stale_after)
            .await
            .unwrap()
            .is_some());
    }
}
