// Security event logging

use sqlx::PgPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::models::UserId;

/// Access-control event type
#[derive(Debug, Clone)]
pub enum AccessEvent {
    LoginRequested,
    LoginSucceeded,
    LoginFailed { reason: String },
    GateAllowed,
    GateRejected { reason: String },
}

impl AccessEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccessEvent::LoginRequested => "LOGIN_REQUESTED",
            AccessEvent::LoginSucceeded => "LOGIN_SUCCEEDED",
            AccessEvent::LoginFailed { .. } => "LOGIN_FAILED",
            AccessEvent::GateAllowed => "GATE_ALLOWED",
            AccessEvent::GateRejected { .. } => "GATE_REJECTED",
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            AccessEvent::LoginFailed { reason } | AccessEvent::GateRejected { reason } => {
                Some(reason.as_str())
            }
            _ => None,
        }
    }
}

/// Audit logger for access-control events
pub struct AuditLogger {
    db_pool: Option<Arc<PgPool>>,
}

impl AuditLogger {
    /// If `db_pool` is `None`, only structured logging is used.
    pub fn new(db_pool: Option<Arc<PgPool>>) -> Self {
        Self { db_pool }
    }

    /// Record an access event
    ///
    /// Fire-and-forget: spawns a task and never blocks or fails the request.
    /// Callers may drop the returned handle.
    /// `subject` is the request path for gate events and is omitted for logins,
    /// since neither emails nor tokens are ever written here.
    pub fn log_access_event(
        &self,
        event: AccessEvent,
        user_id: Option<UserId>,
        subject: Option<&str>,
    ) -> JoinHandle<()> {
        let db_pool = self.db_pool.clone();
        let subject = subject.map(|s| s.to_string());

        tokio::spawn(async move {
            match event {
                AccessEvent::LoginFailed { ref reason } | AccessEvent::GateRejected { ref reason } => {
                    warn!(
                        event_type = event.event_type(),
                        user_id = ?user_id,
                        subject = ?subject,
                        reason = %reason,
                        "Access denied"
                    );
                }
                _ => {
                    info!(
                        event_type = event.event_type(),
                        user_id = ?user_id,
                        subject = ?subject,
                        "Access event"
                    );
                }
            }

            if let Some(pool) = db_pool {
                if let Err(e) = sqlx::query(
                    "INSERT INTO access_audit_log (event_type, user_id, subject, reason, created_at)
                     VALUES ($1, $2, $3, $4, NOW())",
                )
                .bind(event.event_type())
                .bind(user_id.map(|id| id.as_uuid()))
                .bind(&subject)
                .bind(event.reason())
                .execute(pool.as_ref())
                .await
                {
                    warn!(error = %e, "Failed to write audit log to database");
                }
            }
        })
    }
}
