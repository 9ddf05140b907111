mod checkout;
mod nfc;
mod qr_handshake;

pub use checkout::{paid, Checkout};
pub use nfc::{EventRef, NfcEventRouter, PaymentOutcome};
pub use qr_handshake::{CreatedSession, PollOutcome, QrHandshakeService, SessionInfo};
