use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use log::{error, info};

use crate::database::AppState;
use crate::env;
use crate::error::ServiceResult;

/// How long finished records are kept around
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub sessions: Duration,
    pub nfc_events: Duration,
}

impl Retention {
    pub fn from_env() -> Self {
        Self {
            sessions: Duration::days(*env::QR_SESSION_RETENTION_DAYS),
            nfc_events: Duration::hours(*env::NFC_EVENT_RETENTION_HOURS),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_sessions: u64,
    pub deleted_sessions: u64,
    pub deleted_events: u64,
}

/// Expire stale pending sessions and drop old sessions and handled events.
///
/// Readers check expiry themselves, this only keeps the tables small.
pub async fn cleanup(app_state: &AppState, retention: Retention) -> ServiceResult<CleanupReport> {
    let now = Utc::now();
    let report = CleanupReport {
        expired_sessions: app_state.sessions.expire_stale_sessions(now).await?,
        deleted_sessions: app_state
            .sessions
            .delete_sessions_created_before(now - retention.sessions)
            .await?,
        deleted_events: app_state
            .nfc_events
            .delete_processed_events_before(now - retention.nfc_events)
            .await?,
    };

    if report != CleanupReport::default() {
        info!(
            "Cleanup expired {} sessions, deleted {} sessions and {} nfc events",
            report.expired_sessions, report.deleted_sessions, report.deleted_events
        );
    }
    Ok(report)
}

pub fn spawn_cleanup(app_state: AppState, period: StdDuration, retention: Retention) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = cleanup(&app_state, retention).await {
                error!("Cleanup failed: {}", e);
            }
        }
    });
}
