use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};

use crate::database::{IdentityLinkRegistry, SessionStore};
use crate::env::Settings;
use crate::error::{AuthFailure, ServiceError, ServiceResult};
use crate::models::{QrSession, QrSessionStatus, QrSessionTicket, User};
use crate::token::TokenIssuer;

/// Lets an anonymous cart tablet log in by having an authenticated phone approve it.
///
/// The tablet creates a session and shows its id as a QR code. The phone scans it
/// and authorizes. The tablet polls with the secret it received on creation and
/// redeems the session for a bearer token exactly once.
pub struct QrHandshakeService {
    sessions: Arc<dyn SessionStore>,
    identities: Arc<dyn IdentityLinkRegistry>,
    tokens: Arc<TokenIssuer>,
    session_ttl: Duration,
    frontend_url: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct CreatedSession {
    pub ticket: QrSessionTicket,
    pub qr_data: String,
}

/// What the creating tablet sees when polling
#[derive(Debug, PartialEq, Clone)]
pub enum PollOutcome {
    Pending { expires_at: DateTime<Utc> },
    Expired { expires_at: DateTime<Utc> },
    Redeemed { token: String, user: User },
    Used,
}

impl PollOutcome {
    pub fn status(&self) -> QrSessionStatus {
        match self {
            PollOutcome::Pending { .. } => QrSessionStatus::Pending,
            PollOutcome::Expired { .. } => QrSessionStatus::Expired,
            PollOutcome::Redeemed { .. } => QrSessionStatus::Authorized,
            PollOutcome::Used => QrSessionStatus::Used,
        }
    }
}

/// Public view of a session for the phone. Never carries the secret or the user.
#[derive(Debug, PartialEq, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub status: QrSessionStatus,
    pub device_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn session_not_found() -> ServiceError {
    ServiceError::NotFound("SESSION_NOT_FOUND", "Session not found")
}

fn session_expired() -> ServiceError {
    ServiceError::Expired("SESSION_EXPIRED", "Session has expired")
}

impl QrHandshakeService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        identities: Arc<dyn IdentityLinkRegistry>,
        tokens: Arc<TokenIssuer>,
        settings: &Settings,
    ) -> Self {
        Self {
            sessions,
            identities,
            tokens,
            session_ttl: settings.session_ttl,
            frontend_url: settings.frontend_url.clone(),
        }
    }

    pub fn qr_data(&self, session_id: &str) -> String {
        format!("{}/authorize-cart?session={}", self.frontend_url, session_id)
    }

    pub async fn create_session(&self, device_info: Option<String>) -> ServiceResult<CreatedSession> {
        let ticket = self.sessions.create(device_info, self.session_ttl).await?;
        info!("Created QR session {}", ticket.id);

        Ok(CreatedSession {
            qr_data: self.qr_data(&ticket.id),
            ticket,
        })
    }

    /// Poll on behalf of the creating tablet.
    ///
    /// The secret is checked before anything about the session is revealed. An
    /// authorized session is redeemed by this call, only one poll can ever win.
    pub async fn poll(&self, id: &str, secret: Option<&str>) -> ServiceResult<PollOutcome> {
        let secret = secret
            .filter(|s| !s.is_empty())
            .ok_or(ServiceError::Unauthenticated(AuthFailure::MissingSecret))?;
        let session = self
            .sessions
            .get_session(id)
            .await?
            .ok_or_else(session_not_found)?;
        if !session.secret_matches(secret) {
            warn!("Rejected poll with wrong secret for QR session {}", id);
            return Err(ServiceError::Unauthenticated(AuthFailure::InvalidSecret));
        }

        let now = Utc::now();
        match session.effective_status(now) {
            QrSessionStatus::Pending => Ok(PollOutcome::Pending {
                expires_at: session.expires_at,
            }),
            QrSessionStatus::Used => Ok(PollOutcome::Used),
            QrSessionStatus::Expired => {
                self.expire(&session, now).await?;
                Ok(PollOutcome::Expired {
                    expires_at: session.expires_at,
                })
            }
            QrSessionStatus::Authorized => self.redeem(&session, now).await,
        }
    }

    async fn redeem(&self, session: &QrSession, now: DateTime<Utc>) -> ServiceResult<PollOutcome> {
        let user_id = match self.sessions.consume_if_authorized(&session.id, now).await? {
            Some(user_id) => user_id,
            None => {
                // Someone else redeemed it or the deadline passed in between
                let current = self
                    .sessions
                    .get_session(&session.id)
                    .await?
                    .ok_or_else(session_not_found)?;
                return match current.effective_status(Utc::now()) {
                    QrSessionStatus::Expired => {
                        self.expire(&current, Utc::now()).await?;
                        Ok(PollOutcome::Expired {
                            expires_at: current.expires_at,
                        })
                    }
                    _ => Ok(PollOutcome::Used),
                };
            }
        };

        let user = self
            .identities
            .get_user(user_id)
            .await?
            .ok_or(ServiceError::NotFound("USER_NOT_FOUND", "User not found"))?;
        let token = self.tokens.mint(user.id);
        info!("QR session {} redeemed for user {}", session.id, user.id);

        Ok(PollOutcome::Redeemed { token, user })
    }

    async fn expire(&self, session: &QrSession, now: DateTime<Utc>) -> ServiceResult<()> {
        if self.sessions.mark_expired(&session.id, now).await? {
            info!("QR session {} expired", session.id);
        }
        Ok(())
    }

    pub async fn session_info(&self, id: &str) -> ServiceResult<SessionInfo> {
        let session = self
            .sessions
            .get_session(id)
            .await?
            .ok_or_else(session_not_found)?;

        Ok(SessionInfo {
            status: session.effective_status(Utc::now()),
            id: session.id,
            device_info: session.device_info,
            created_at: session.created_at,
            expires_at: session.expires_at,
        })
    }

    /// Authorize a pending session for `user_id`. Returns the authorizing user.
    pub async fn authorize(&self, id: &str, user_id: u64) -> ServiceResult<User> {
        let user = self
            .identities
            .get_user(user_id)
            .await?
            .ok_or(ServiceError::NotFound("USER_NOT_FOUND", "User not found"))?;
        let session = self
            .sessions
            .get_session(id)
            .await?
            .ok_or_else(session_not_found)?;

        let now = Utc::now();
        self.check_authorizable(&session, now).await?;

        if !self.sessions.authorize(id, user_id, now).await? {
            let current = self
                .sessions
                .get_session(id)
                .await?
                .ok_or_else(session_not_found)?;
            self.check_authorizable(&current, Utc::now()).await?;
            return Err(ServiceError::InvalidState(
                "SESSION_INVALID_STATUS",
                "Session could not be authorized".to_owned(),
            ));
        }

        info!("QR session {} authorized by user {}", id, user_id);
        Ok(user)
    }

    async fn check_authorizable(&self, session: &QrSession, now: DateTime<Utc>) -> ServiceResult<()> {
        match session.effective_status(now) {
            QrSessionStatus::Pending => Ok(()),
            QrSessionStatus::Expired => {
                self.expire(session, now).await?;
                Err(session_expired())
            }
            status => Err(ServiceError::InvalidState(
                "SESSION_INVALID_STATUS",
                format!("Session is already {}", status.as_str()),
            )),
        }
    }
}
