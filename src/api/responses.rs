// Response types for API endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::auth::permission::{EventTier, GroupTier};
use crate::core::errors::AppError;
use crate::core::models::{Attendance, EventRecord, GroupRecord, LinkedAttendance, SessionUser};

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub redis: String,
    pub database: String,
}

/// Returned for every login request, known address or not
#[derive(Debug, Serialize)]
pub struct LoginRequestedResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: SessionUser,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct GroupSummaryResponse {
    pub group: GroupRecord,
    pub tier: GroupTier,
}

#[derive(Debug, Serialize)]
pub struct GroupEventsResponse {
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Serialize)]
pub struct EventSummaryResponse {
    pub event: EventRecord,
    pub tier: EventTier,
    /// The caller's own row, if invited
    pub attendance: Option<Attendance>,
}

#[derive(Debug, Serialize)]
pub struct AttendanceListResponse {
    pub attendances: Vec<Attendance>,
}

/// Status page view of a link-authenticated attendance
#[derive(Debug, Serialize)]
pub struct ResponseStatusView {
    pub event: EventRecord,
    pub attendance: Attendance,
    /// `false` once the registration deadline has passed
    pub editable: bool,
    /// Status page for the secret that is valid after this request
    pub status_link: String,
}

impl ResponseStatusView {
    pub fn new(linked: LinkedAttendance, status_link: String, now: DateTime<Utc>) -> Self {
        let editable = crate::auth::link::ensure_registration_open(
            linked.event.registration_ends_at,
            now,
        )
        .is_ok();
        Self {
            event: linked.event,
            attendance: linked.attendance,
            editable,
            status_link,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvitationResponse {
    pub invited: usize,
}

/// API error type that converts domain errors to HTTP responses
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: String) -> Self {
        Self {
            status,
            message,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            request_id: self.request_id,
        });
        (self.status, body).into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        }
        Self::new(status, err.user_message())
    }
}
