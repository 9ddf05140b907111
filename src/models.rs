use std::fmt::{self, Display};
use std::iter::Sum;
use std::ops::Add;

use chrono::{DateTime, Utc};

/// An amount of money in cents. All arithmetic is done on whole cents so totals are exact.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default)]
pub struct Cents(pub i64);

impl Cents {
    pub fn zero() -> Self {
        Cents(0)
    }

    pub fn times(self, quantity: i32) -> Self {
        Cents(self.0 * quantity as i64)
    }

    /// Decimal representation with two digits, e.g. `2750` -> `27.5`
    pub fn as_decimal(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl Add for Cents {
    type Output = Cents;

    fn add(self, rhs: Self) -> Self::Output {
        Cents(self.0 + rhs.0)
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Cents::zero(), |acc, c| acc + c)
    }
}

impl Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QrSessionStatus {
    Pending,
    Authorized,
    Used,
    Expired,
}

impl QrSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QrSessionStatus::Pending => "pending",
            QrSessionStatus::Authorized => "authorized",
            QrSessionStatus::Used => "used",
            QrSessionStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(QrSessionStatus::Pending),
            "authorized" => Some(QrSessionStatus::Authorized),
            "used" => Some(QrSessionStatus::Used),
            "expired" => Some(QrSessionStatus::Expired),
            _ => None,
        }
    }
}

/// A QR login session created by a cart tablet and authorized from a phone.
///
/// `user_id` is only set while the session is `Authorized` or `Used`.
#[derive(Debug, PartialEq, Clone)]
pub struct QrSession {
    pub id: String,
    pub secret: String,
    pub status: QrSessionStatus,
    pub device_info: Option<String>,
    pub user_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
}

impl QrSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Compare in constant time, the secret is the only proof of being the creating device
    pub fn secret_matches(&self, candidate: &str) -> bool {
        let a = self.secret.as_bytes();
        let b = candidate.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }

    /// The status as observed at `now`, regardless of whether the stored row has caught up
    pub fn effective_status(&self, now: DateTime<Utc>) -> QrSessionStatus {
        match self.status {
            QrSessionStatus::Pending | QrSessionStatus::Authorized if self.is_expired(now) => {
                QrSessionStatus::Expired
            }
            status => status,
        }
    }
}

/// What the creating tablet receives. This is the only time the secret leaves the server.
#[derive(Debug, PartialEq, Clone)]
pub struct QrSessionTicket {
    pub id: String,
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub phone: String,
    pub nfc_uid: Option<String>,
    pub preferred_payment_method_id: Option<u64>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct PaymentMethod {
    pub id: u64,
    pub name: String,
    pub enabled: bool,
    pub display_order: i32,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub price: Cents,
}

/// A cart line joined with the current product price.
#[derive(Debug, PartialEq, Clone)]
pub struct CartItem {
    pub product_id: u64,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Cents,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "cancelled" => Some(TransactionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Snapshot of one cart line at transaction creation time.
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionItem {
    pub product_id: u64,
    pub quantity: i32,
    pub unit_price: Cents,
}

impl TransactionItem {
    pub fn subtotal(&self) -> Cents {
        self.unit_price.times(self.quantity)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Transaction {
    pub id: u64,
    pub user_id: u64,
    pub total: Cents,
    pub payment_method_id: u64,
    pub status: TransactionStatus,
    pub nfc_uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items: Vec<TransactionItem>,
}

impl Transaction {
    pub fn item_count(&self) -> i64 {
        self.items.iter().map(|i| i.quantity as i64).sum()
    }
}

/// Header and items of a transaction that is about to be written in one unit.
#[derive(Debug, PartialEq, Clone)]
pub struct NewTransaction {
    pub user_id: u64,
    pub payment_method_id: u64,
    pub nfc_uid: Option<String>,
    pub total: Cents,
    pub items: Vec<TransactionItem>,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct TransactionStats {
    pub total_transactions: u64,
    pub total_spent: Cents,
    pub completed_count: u64,
    pub failed_count: u64,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum NfcEventKind {
    Detected,
    PaymentSuccess,
    PaymentFailed,
}

impl NfcEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NfcEventKind::Detected => "detected",
            NfcEventKind::PaymentSuccess => "payment_success",
            NfcEventKind::PaymentFailed => "payment_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "detected" | "nfc_detected" => Some(NfcEventKind::Detected),
            "payment_success" => Some(NfcEventKind::PaymentSuccess),
            "payment_failed" => Some(NfcEventKind::PaymentFailed),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct NfcEvent {
    pub id: u64,
    pub uid: String,
    pub kind: NfcEventKind,
    pub device_id: String,
    pub processed: bool,
    pub transaction_id: Option<u64>,
    pub user_name: Option<String>,
    pub total: Option<Cents>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct NewNfcEvent {
    pub uid: String,
    pub kind: NfcEventKind,
    pub device_id: String,
    pub processed: bool,
    pub transaction_id: Option<u64>,
    pub user_name: Option<String>,
    pub total: Option<Cents>,
}

/// Details attached to an event when a display marks it as handled.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct NfcEventOutcome {
    pub transaction_id: Option<u64>,
    pub user_name: Option<String>,
    pub total: Option<Cents>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PaymentDecision {
    Approved,
    Declined,
}
