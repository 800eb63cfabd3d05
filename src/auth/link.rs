// Per-participant attendance link secrets with rotation on use

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::api::AttendanceStore;
use crate::core::crypto::generate_opaque_token;
use crate::core::errors::AppError;
use crate::core::models::{
    AttendanceStatus, AttendanceUpdate, EventId, GroupId, LinkedAttendance,
};

/// Reject writes once `registration_ends_at` has passed (no grace period)
pub fn ensure_registration_open(
    registration_ends_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    match registration_ends_at {
        Some(ends_at) if now > ends_at => Err(AppError::RegistrationClosed),
        _ => Ok(()),
    }
}

/// Fresh attendance secret for a new row or a rotation
pub fn generate_secret() -> String {
    generate_opaque_token()
}

/// One-click response link: `{origin}/respond/{decision}?token=..&group=..&event=..`
pub fn build_attendance_link(
    origin: &Url,
    group_id: GroupId,
    event_id: EventId,
    secret: &str,
    decision: AttendanceStatus,
) -> Result<Url, AppError> {
    let decision = decision.decision().ok_or_else(|| {
        AppError::ValidationError("UNANSWERED has no response link".to_string())
    })?;
    let mut url = origin
        .join(&format!("respond/{}", decision))
        .map_err(|e| AppError::ConfigurationError(format!("Invalid public origin: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("token", secret)
        .append_pair("group", &group_id.to_string())
        .append_pair("event", &event_id.to_string());
    Ok(url)
}

/// Editable status page link: `{origin}/respond/status/{secret}`
pub fn build_status_link(origin: &Url, secret: &str) -> Result<Url, AppError> {
    origin
        .join("respond/status/")
        .and_then(|base| base.join(secret))
        .map_err(|e| AppError::ConfigurationError(format!("Invalid public origin: {}", e)))
}

/// Link-based responses authenticated solely by the attendance secret
pub struct AttendanceLinks {
    store: Arc<dyn AttendanceStore + Send + Sync>,
}

impl AttendanceLinks {
    pub fn new(store: Arc<dyn AttendanceStore + Send + Sync>) -> Self {
        Self { store }
    }

    pub async fn resolve_by_secret(&self, secret: &str) -> Result<LinkedAttendance, AppError> {
        self.store
            .find_by_secret(secret)
            .await?
            .ok_or_else(|| AppError::NotFound("attendance".to_string()))
    }

    pub async fn resolve_by_secret_and_rotate(
        &self,
        secret: &str,
        status: AttendanceStatus,
    ) -> Result<LinkedAttendance, AppError> {
        self.resolve_by_secret_and_rotate_at(secret, status, Utc::now()).await
    }

    /// Record `status` and replace the secret in one atomic write
    ///
    /// Afterwards `secret` no longer resolves; a replay is reported as `NotFound`.
    pub async fn resolve_by_secret_and_rotate_at(
        &self,
        secret: &str,
        status: AttendanceStatus,
        now: DateTime<Utc>,
    ) -> Result<LinkedAttendance, AppError> {
        let update = AttendanceUpdate {
            status,
            comment: None,
            rotate_to: Some(generate_secret()),
        };

        match self.store.update_by_secret(secret, update, now).await {
            Ok(linked) => {
                info!(
                    event_id = %linked.attendance.event_id,
                    user_id = %linked.attendance.user_id,
                    status = %status,
                    "Attendance recorded via link, secret rotated"
                );
                Ok(linked)
            }
            Err(e) => {
                warn!(error = %e, "One-click attendance response rejected");
                Err(e)
            }
        }
    }

    pub async fn edit_response(
        &self,
        secret: &str,
        status: AttendanceStatus,
        comment: Option<String>,
    ) -> Result<LinkedAttendance, AppError> {
        self.edit_response_at(secret, status, comment, Utc::now()).await
    }

    /// Update status and comment without rotating; the status page stays usable
    pub async fn edit_response_at(
        &self,
        secret: &str,
        status: AttendanceStatus,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<LinkedAttendance, AppError> {
        let update = AttendanceUpdate { status, comment, rotate_to: None };
        let linked = self.store.update_by_secret(secret, update, now).await?;
        info!(
            event_id = %linked.attendance.event_id,
            user_id = %linked.attendance.user_id,
            status = %status,
            "Attendance edited via status page"
        );
        Ok(linked)
    }
}
