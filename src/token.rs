//! Stateless bearer tokens
//!
//! A token is `base64url(user_id "." expires_unix) "." base64url(hmac_sha256(payload))`.
//! Tokens carry only the user identity, so they outlive the QR session that produced
//! them. There is no revocation list; logging out means discarding the token.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AuthFailure;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct TokenIssuer {
    mac: HmacSha256,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(key: &[u8], ttl: Duration) -> Self {
        let mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        Self { mac, ttl }
    }

    pub fn mint(&self, user_id: u64) -> String {
        self.mint_at(user_id, Utc::now())
    }

    pub fn mint_at(&self, user_id: u64, now: DateTime<Utc>) -> String {
        let expires_at = now + self.ttl;
        let payload = format!("{}.{}", user_id, expires_at.timestamp());
        let payload = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(self.sign(&payload));
        format!("{payload}.{signature}")
    }

    /// Resolve a token to its user id. A bad signature and a stale token are reported
    /// differently so clients can tell "log in again" from "token corrupted".
    pub fn verify(&self, token: &str) -> Result<u64, AuthFailure> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<u64, AuthFailure> {
        let (payload, signature) = token.split_once('.').ok_or(AuthFailure::InvalidToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthFailure::InvalidToken)?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthFailure::InvalidToken)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthFailure::InvalidToken)?;
        let payload = String::from_utf8(payload).map_err(|_| AuthFailure::InvalidToken)?;
        let (user_id, expires_at) = payload.split_once('.').ok_or(AuthFailure::InvalidToken)?;
        let user_id: u64 = user_id.parse().map_err(|_| AuthFailure::InvalidToken)?;
        let expires_at: i64 = expires_at.parse().map_err(|_| AuthFailure::InvalidToken)?;
        let expires_at = Utc
            .timestamp_opt(expires_at, 0)
            .single()
            .ok_or(AuthFailure::InvalidToken)?;

        if now > expires_at {
            return Err(AuthFailure::ExpiredToken);
        }

        Ok(user_id)
    }

    fn sign(&self, payload: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}
