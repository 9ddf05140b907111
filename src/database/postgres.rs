use std::collections::HashMap;

use axum::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::info;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    CartItem, Cents, NewNfcEvent, NewTransaction, NfcEvent, NfcEventKind, NfcEventOutcome,
    PaymentMethod, Product, QrSession, QrSessionStatus, Transaction, TransactionItem,
    TransactionStats, TransactionStatus, User,
};

use super::migration;
use super::{CheckoutLedger, IdentityLinkRegistry, NfcEventStore, SessionStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> ServiceResult<PgStore> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        PgStore::from_pool(pool).await
    }

    /// Run pending migrations on `pool` and wrap it
    pub async fn from_pool(pool: PgPool) -> ServiceResult<PgStore> {
        let migrator = Migrator::new(migration::postgresql_migrations()).await?;
        migrator.run(&pool).await?;
        info!("Database migrations are up to date");

        Ok(PgStore { pool })
    }

    async fn load_items(
        &self,
        transaction_ids: &[i64],
    ) -> ServiceResult<HashMap<u64, Vec<TransactionItem>>> {
        let rows = sqlx::query_as::<_, TransactionItemRow>(
            r#"
            SELECT transaction_id, product_id, quantity, unit_price_cents
            FROM transaction_items
            WHERE transaction_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(transaction_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<u64, Vec<TransactionItem>> = HashMap::new();
        for row in rows {
            items
                .entry(row.transaction_id as u64)
                .or_default()
                .push(TransactionItem {
                    product_id: row.product_id as u64,
                    quantity: row.quantity,
                    unit_price: Cents(row.unit_price_cents),
                });
        }
        Ok(items)
    }

    async fn with_items(&self, rows: Vec<TransactionRow>) -> ServiceResult<Vec<Transaction>> {
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let mut items = self.load_items(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let lines = items.remove(&(row.id as u64)).unwrap_or_default();
                row.into_transaction(lines)
            })
            .collect()
    }
}

fn corrupt(what: &str, value: &str) -> ServiceError {
    ServiceError::InternalServerError(format!("Unexpected {} '{}' in database", what, value))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    secret: String,
    status: String,
    device_info: Option<String>,
    user_id: Option<i64>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    authorized_at: Option<DateTime<Utc>>,
    used_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_session(self) -> ServiceResult<QrSession> {
        let status =
            QrSessionStatus::parse(&self.status).ok_or_else(|| corrupt("session status", &self.status))?;
        Ok(QrSession {
            id: self.id,
            secret: self.secret,
            status,
            device_info: self.device_info,
            user_id: self.user_id.map(|id| id as u64),
            created_at: self.created_at,
            expires_at: self.expires_at,
            authorized_at: self.authorized_at,
            used_at: self.used_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    phone: String,
    nfc_uid: Option<String>,
    preferred_payment_method_id: Option<i64>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id as u64,
            name: row.name,
            phone: row.phone,
            nfc_uid: row.nfc_uid,
            preferred_payment_method_id: row.preferred_payment_method_id.map(|id| id as u64),
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentMethodRow {
    id: i64,
    name: String,
    enabled: bool,
    display_order: i32,
}

impl From<PaymentMethodRow> for PaymentMethod {
    fn from(row: PaymentMethodRow) -> Self {
        PaymentMethod {
            id: row.id as u64,
            name: row.name,
            enabled: row.enabled,
            display_order: row.display_order,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    product_id: i64,
    name: String,
    quantity: i32,
    price_cents: i64,
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    user_id: i64,
    total_cents: i64,
    payment_method_id: i64,
    status: String,
    nfc_uid: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_transaction(self, items: Vec<TransactionItem>) -> ServiceResult<Transaction> {
        let status = TransactionStatus::parse(&self.status)
            .ok_or_else(|| corrupt("transaction status", &self.status))?;
        Ok(Transaction {
            id: self.id as u64,
            user_id: self.user_id as u64,
            total: Cents(self.total_cents),
            payment_method_id: self.payment_method_id as u64,
            status,
            nfc_uid: self.nfc_uid,
            created_at: self.created_at,
            completed_at: self.completed_at,
            items,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionItemRow {
    transaction_id: i64,
    product_id: i64,
    quantity: i32,
    unit_price_cents: i64,
}

#[derive(sqlx::FromRow)]
struct NfcEventRow {
    id: i64,
    uid: String,
    event_type: String,
    device_id: String,
    processed: bool,
    transaction_id: Option<i64>,
    user_name: Option<String>,
    total_cents: Option<i64>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl NfcEventRow {
    fn into_event(self) -> ServiceResult<NfcEvent> {
        let kind = NfcEventKind::parse(&self.event_type)
            .ok_or_else(|| corrupt("nfc event type", &self.event_type))?;
        Ok(NfcEvent {
            id: self.id as u64,
            uid: self.uid,
            kind,
            device_id: self.device_id,
            processed: self.processed,
            transaction_id: self.transaction_id.map(|id| id as u64),
            user_name: self.user_name,
            total: self.total_cents.map(Cents),
            created_at: self.created_at,
            processed_at: self.processed_at,
        })
    }
}

const SESSION_COLUMNS: &str = "id, secret, status, device_info, user_id, created_at, expires_at, authorized_at, used_at";
const USER_COLUMNS: &str = "id, name, phone, nfc_uid, preferred_payment_method_id";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, total_cents, payment_method_id, status, nfc_uid, created_at, completed_at";
const EVENT_COLUMNS: &str = "id, uid, event_type, device_id, processed, transaction_id, user_name, total_cents, created_at, processed_at";

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &QrSession) -> ServiceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO qr_login_sessions (id, secret, status, device_info, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&session.id)
        .bind(&session.secret)
        .bind(session.status.as_str())
        .bind(&session.device_info)
        .bind(session.user_id.map(|id| id as i64))
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> ServiceResult<Option<QrSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM qr_login_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn authorize(&self, id: &str, user_id: u64, now: DateTime<Utc>) -> ServiceResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE qr_login_sessions
            SET status = 'authorized', user_id = $2, authorized_at = $3
            WHERE id = $1 AND status = 'pending' AND expires_at >= $3
            "#,
        )
        .bind(id)
        .bind(user_id as i64)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn consume_if_authorized(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<u64>> {
        let user_id: Option<Option<i64>> = sqlx::query_scalar(
            r#"
            UPDATE qr_login_sessions
            SET status = 'used', used_at = $2
            WHERE id = $1 AND status = 'authorized' AND expires_at >= $2
            RETURNING user_id
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id.flatten().map(|id| id as u64))
    }

    async fn mark_expired(&self, id: &str, now: DateTime<Utc>) -> ServiceResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE qr_login_sessions
            SET status = 'expired', user_id = NULL
            WHERE id = $1 AND status IN ('pending', 'authorized') AND expires_at < $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> ServiceResult<u64> {
        let updated = sqlx::query(
            "UPDATE qr_login_sessions SET status = 'expired' WHERE status = 'pending' AND expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated)
    }

    async fn delete_sessions_created_before(&self, cutoff: DateTime<Utc>) -> ServiceResult<u64> {
        let deleted = sqlx::query("DELETE FROM qr_login_sessions WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

#[async_trait]
impl IdentityLinkRegistry for PgStore {
    async fn create_user(
        &self,
        name: &str,
        phone: &str,
        preferred_payment_method_id: Option<u64>,
    ) -> ServiceResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (name, phone, preferred_payment_method_id) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(phone)
        .bind(preferred_payment_method_id.map(|id| id as i64))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_user(&self, user_id: u64) -> ServiceResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn link(&self, user_id: u64, nfc_uid: &str) -> ServiceResult<User> {
        let conflict = ServiceError::Conflict(
            "NFC_ALREADY_LINKED",
            "NFC card is already linked to another account",
        );

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET nfc_uid = $2
            WHERE id = $1
              AND NOT EXISTS (SELECT 1 FROM users WHERE nfc_uid = $2 AND id <> $1)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id as i64)
        .bind(nfc_uid)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => Ok(row.into()),
            Ok(None) => match self.get_user(user_id).await? {
                Some(_) => Err(conflict),
                None => Err(ServiceError::NotFound("USER_NOT_FOUND", "User not found")),
            },
            Err(e) if is_unique_violation(&e) => Err(conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn unlink(&self, user_id: u64) -> ServiceResult<()> {
        let updated = sqlx::query(
            "UPDATE users SET nfc_uid = NULL WHERE id = $1 AND nfc_uid IS NOT NULL",
        )
        .bind(user_id as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(ServiceError::InvalidState(
                "NO_NFC_LINKED",
                "No NFC card is linked to this account".to_owned(),
            ));
        }
        Ok(())
    }

    async fn resolve(&self, nfc_uid: &str) -> ServiceResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE nfc_uid = $1"
        ))
        .bind(nfc_uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }
}

#[async_trait]
impl CheckoutLedger for PgStore {
    async fn insert_product(&self, name: &str, price: Cents) -> ServiceResult<Product> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO products (name, price_cents) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(price.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(Product {
            id: id as u64,
            name: name.to_owned(),
            price,
        })
    }

    async fn cart_items(&self, user_id: u64) -> ServiceResult<Vec<CartItem>> {
        let rows = sqlx::query_as::<_, CartRow>(
            r#"
            SELECT c.product_id, p.name, c.quantity, p.price_cents
            FROM user_carts c
            JOIN products p ON p.id = c.product_id
            WHERE c.user_id = $1
            ORDER BY c.added_at, c.product_id
            "#,
        )
        .bind(user_id as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CartItem {
                product_id: row.product_id as u64,
                name: row.name,
                quantity: row.quantity,
                unit_price: Cents(row.price_cents),
            })
            .collect())
    }

    async fn put_cart_item(
        &self,
        user_id: u64,
        product_id: u64,
        quantity: i32,
    ) -> ServiceResult<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)")
            .bind(product_id as i64)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(ServiceError::NotFound("PRODUCT_NOT_FOUND", "Product not found"));
        }

        if quantity <= 0 {
            sqlx::query("DELETE FROM user_carts WHERE user_id = $1 AND product_id = $2")
                .bind(user_id as i64)
                .bind(product_id as i64)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO user_carts (user_id, product_id, quantity) VALUES ($1, $2, $3)
            ON CONFLICT (user_id, product_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(user_id as i64)
        .bind(product_id as i64)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_cart(&self, user_id: u64) -> ServiceResult<()> {
        sqlx::query("DELETE FROM user_carts WHERE user_id = $1")
            .bind(user_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn payment_methods(&self) -> ServiceResult<Vec<PaymentMethod>> {
        let rows = sqlx::query_as::<_, PaymentMethodRow>(
            "SELECT id, name, enabled, display_order FROM payment_methods WHERE enabled ORDER BY display_order, name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PaymentMethod::from).collect())
    }

    async fn get_payment_method(&self, id: u64) -> ServiceResult<Option<PaymentMethod>> {
        let row = sqlx::query_as::<_, PaymentMethodRow>(
            "SELECT id, name, enabled, display_order FROM payment_methods WHERE id = $1",
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PaymentMethod::from))
    }

    async fn insert_transaction(&self, transaction: NewTransaction) -> ServiceResult<Transaction> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions (user_id, total_cents, payment_method_id, status, nfc_uid)
            VALUES ($1, $2, $3, 'pending', $4)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(transaction.user_id as i64)
        .bind(transaction.total.0)
        .bind(transaction.payment_method_id as i64)
        .bind(&transaction.nfc_uid)
        .fetch_one(&mut *tx)
        .await?;

        for item in transaction.items.iter() {
            sqlx::query(
                r#"
                INSERT INTO transaction_items (transaction_id, product_id, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(row.id)
            .bind(item.product_id as i64)
            .bind(item.quantity)
            .bind(item.unit_price.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        row.into_transaction(transaction.items)
    }

    async fn get_transaction(&self, id: u64) -> ServiceResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.with_items(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn finish_transaction(
        &self,
        id: u64,
        status: TransactionStatus,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2,
                completed_at = CASE WHEN $2 = 'completed' THEN $3 ELSE completed_at END
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id as i64)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_transaction(id).await?.ok_or(ServiceError::NotFound(
            "TRANSACTION_NOT_FOUND",
            "Transaction not found",
        ))
    }

    async fn list_transactions(
        &self,
        user_id: u64,
        limit: i64,
        status: Option<TransactionStatus>,
    ) -> ServiceResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM transactions
            WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(user_id as i64)
        .bind(status.map(|s| s.as_str()))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        self.with_items(rows).await
    }

    async fn transaction_stats(&self, user_id: u64) -> ServiceResult<TransactionStats> {
        let (total, spent, completed, failed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(total_cents) FILTER (WHERE status = 'completed'), 0)::BIGINT,
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM transactions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(TransactionStats {
            total_transactions: total as u64,
            total_spent: Cents(spent),
            completed_count: completed as u64,
            failed_count: failed as u64,
        })
    }
}

#[async_trait]
impl NfcEventStore for PgStore {
    async fn record(&self, event: NewNfcEvent) -> ServiceResult<NfcEvent> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, NfcEventRow>(&format!(
            r#"
            INSERT INTO nfc_events
                (uid, event_type, device_id, processed, transaction_id, user_name, total_cents, created_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, CASE WHEN $4 THEN $8 END)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(&event.uid)
        .bind(event.kind.as_str())
        .bind(&event.device_id)
        .bind(event.processed)
        .bind(event.transaction_id.map(|id| id as i64))
        .bind(&event.user_name)
        .bind(event.total.map(|total| total.0))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.into_event()
    }

    async fn list_events(
        &self,
        limit: i64,
        unprocessed_only: bool,
    ) -> ServiceResult<Vec<NfcEvent>> {
        let rows = sqlx::query_as::<_, NfcEventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM nfc_events
            WHERE NOT ($1 AND processed)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(unprocessed_only)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NfcEventRow::into_event).collect()
    }

    async fn find_event(
        &self,
        uid: &str,
        created_at: DateTime<Utc>,
    ) -> ServiceResult<Option<NfcEvent>> {
        let row = sqlx::query_as::<_, NfcEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM nfc_events WHERE uid = $1 AND created_at = $2 ORDER BY id DESC LIMIT 1"
        ))
        .bind(uid)
        .bind(created_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NfcEventRow::into_event).transpose()
    }

    async fn mark_processed(
        &self,
        id: u64,
        outcome: NfcEventOutcome,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE nfc_events
            SET processed = TRUE,
                processed_at = $2,
                transaction_id = COALESCE($3, transaction_id),
                user_name = COALESCE($4, user_name),
                total_cents = COALESCE($5, total_cents)
            WHERE id = $1 AND NOT processed
            "#,
        )
        .bind(id as i64)
        .bind(now)
        .bind(outcome.transaction_id.map(|id| id as i64))
        .bind(outcome.user_name)
        .bind(outcome.total.map(|total| total.0))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM nfc_events WHERE id = $1)")
            .bind(id as i64)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn acquire_tap_lock(
        &self,
        uid: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> ServiceResult<Option<String>> {
        let holder = uuid::Uuid::new_v4().to_string();
        let acquired = sqlx::query(
            r#"
            INSERT INTO nfc_tap_locks (uid, acquired_at, holder) VALUES ($1, $2, $4)
            ON CONFLICT (uid) DO UPDATE
            SET acquired_at = EXCLUDED.acquired_at, holder = EXCLUDED.holder
            WHERE nfc_tap_locks.acquired_at <= $3
            "#,
        )
        .bind(uid)
        .bind(now)
        .bind(now - stale_after)
        .bind(&holder)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok((acquired == 1).then_some(holder))
    }

    async fn release_tap_lock(&self, uid: &str, holder: &str) -> ServiceResult<()> {
        sqlx::query("DELETE FROM nfc_tap_locks WHERE uid = $1 AND holder = $2")
            .bind(uid)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_processed_events_before(&self, cutoff: DateTime<Utc>) -> ServiceResult<u64> {
        let deleted = sqlx::query("DELETE FROM nfc_events WHERE processed AND created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}
