// Axum web server layer

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    routing::{get, patch, post},
    BoxError, Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;

pub mod cookies;
pub mod handlers;
pub mod middleware;
pub mod responses;

use crate::auth::gate::{gate_middleware, RequestGate};
use crate::auth::link::AttendanceLinks;
use crate::auth::permission::PermissionResolver;
use crate::auth::session::SessionCodec;
use crate::auth::ticket::EmailTickets;
use crate::auth::audit_logger::AuditLogger;
use crate::core::errors::AppError;
use crate::core::models::{
    Attendance, AttendanceUpdate, EventId, EventRecord, GroupId, GroupRecord, LinkedAttendance,
    MailMessage, User, UserId,
};

/// Application state containing all shared dependencies
///
/// Every collaborator is constructed once in `main` and shared by `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub session_codec: Arc<SessionCodec>,
    pub tickets: Arc<EmailTickets>,
    pub resolver: Arc<PermissionResolver>,
    pub links: Arc<AttendanceLinks>,
    pub credential_store: Arc<dyn CredentialStore + Send + Sync>,
    pub access_store: Arc<dyn AccessStore + Send + Sync>,
    pub user_store: Arc<dyn UserStore + Send + Sync>,
    pub attendance_store: Arc<dyn AttendanceStore + Send + Sync>,
    pub mailer: Arc<dyn Mailer + Send + Sync>,
    pub audit_logger: Arc<AuditLogger>,
    pub config: Arc<Config>,
}

/// Expiring key-value store used for one-time verification tickets
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// `SET key value EX ttl_secs`
    async fn put_expiring(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), AppError>;
    /// Read the value and delete the key in one atomic step
    async fn take(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn ping(&self) -> Result<(), AppError>;
}

/// Read access to the ownership / delegation / membership facts
#[async_trait::async_trait]
pub trait AccessStore: Send + Sync {
    async fn find_group(&self, group_id: GroupId) -> Result<Option<GroupRecord>, AppError>;
    async fn find_event(&self, event_id: EventId) -> Result<Option<EventRecord>, AppError>;
    async fn list_group_events(&self, group_id: GroupId) -> Result<Vec<EventRecord>, AppError>;
    async fn is_attendee(&self, event_id: EventId, user_id: UserId) -> Result<bool, AppError>;
    async fn ping(&self) -> Result<(), AppError>;
}

/// User persistence
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Idempotent upsert keyed by email
    async fn upsert_by_email(&self, email: &str) -> Result<User, AppError>;
}

/// Attendance persistence
///
/// Mutations take `now` and must check the event's registration deadline
/// inside the same transaction that writes the row.
#[async_trait::async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn find(&self, event_id: EventId, user_id: UserId) -> Result<Option<Attendance>, AppError>;
    async fn find_by_secret(&self, secret: &str) -> Result<Option<LinkedAttendance>, AppError>;
    async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Attendance>, AppError>;
    /// Create an UNANSWERED row with `secret`, or return the existing row unchanged
    async fn create_if_absent(
        &self,
        event_id: EventId,
        user_id: UserId,
        secret: &str,
    ) -> Result<Attendance, AppError>;
    /// Apply `update` to the row currently holding `secret`
    ///
    /// Fails with `NotFound` when no row holds `secret`; a concurrent
    /// rotation of the same secret must leave exactly one caller successful.
    async fn update_by_secret(
        &self,
        secret: &str,
        update: AttendanceUpdate,
        now: DateTime<Utc>,
    ) -> Result<LinkedAttendance, AppError>;
    async fn update_own(
        &self,
        event_id: EventId,
        user_id: UserId,
        update: AttendanceUpdate,
        now: DateTime<Utc>,
    ) -> Result<Attendance, AppError>;
}

/// Outbound mail delivery
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), AppError>;
}

// Re-export Config from config module
pub use crate::config::Config;

/// Create the Axum router with all routes and middleware
///
/// Middleware stack (outermost to innermost):
/// - Timeout (tower::timeout) converted to 408 by `HandleErrorLayer`
/// - Body size limit (tower-http::limit)
/// - Tracing (tower-http::trace)
/// - Request gate, applied with `route_layer` to `/api` routes only
pub fn create_router(app_state: AppState, gate: Arc<RequestGate>) -> Router {
    let gated = Router::new()
        .route("/groups/:group_id", get(handlers::group_summary_handler))
        .route("/groups/:group_id/events", get(handlers::group_events_handler))
        .route(
            "/groups/:group_id/events/:event_id",
            get(handlers::event_summary_handler),
        )
        .route(
            "/groups/:group_id/events/:event_id/attendance",
            patch(handlers::update_own_attendance_handler),
        )
        .route(
            "/groups/:group_id/events/:event_id/manage/attendances",
            get(handlers::list_attendances_handler),
        )
        .route(
            "/groups/:group_id/events/:event_id/manage/invitations",
            post(handlers::invite_participants_handler),
        )
        .route_layer(axum::middleware::from_fn_with_state(gate, gate_middleware));

    let public = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/auth/login", post(handlers::request_login_handler))
        .route("/auth/verify", get(handlers::verify_login_handler))
        .route("/auth/session", get(handlers::current_session_handler))
        .route("/auth/logout", post(handlers::logout_handler))
        .route(
            "/respond/status/:token",
            get(handlers::show_response_handler).patch(handlers::edit_response_handler),
        )
        .route("/respond/:decision", get(handlers::respond_via_link_handler));

    let body_limit = app_state.config.body_size_limit_bytes;
    let timeout_secs = app_state.config.request_timeout_secs;

    let middleware_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|e: BoxError| async move {
            let status = if e.is::<tower::timeout::error::Elapsed>() {
                StatusCode::REQUEST_TIMEOUT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, e.to_string())
        }))
        .timeout(Duration::from_secs(timeout_secs))
        .into_inner();

    public
        .nest("/api", gated)
        .layer(middleware::tracing_layer())
        .layer(middleware::body_size_limit_layer(body_limit))
        .layer(middleware_stack)
        .with_state(app_state)
}
