// Request handlers for API endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::cookies::{clear_session_cookie, extract_session_cookie, session_set_cookie};
use crate::api::responses::{
    ApiError, AttendanceListResponse, EventSummaryResponse, GroupEventsResponse,
    GroupSummaryResponse, HealthResponse, InvitationResponse, LoginRequestedResponse,
    ResponseStatusView, SessionResponse,
};
use crate::api::{AppState, Mailer};
use crate::auth::audit_logger::AccessEvent;
use crate::auth::gate::GatePass;
use crate::auth::link::{build_attendance_link, build_status_link, generate_secret};
use crate::auth::permission::{EventTier, GroupTier};
use crate::auth::ticket::normalize_email;
use crate::core::errors::AppError;
use crate::core::models::{
    Attendance, AttendanceStatus, AttendanceUpdate, EventId, EventRecord, GroupId, MailMessage, SessionClaims,
    SessionUser,
};

const MAX_COMMENT_CHARS: usize = 1000;
const MAX_INVITATIONS_PER_REQUEST: usize = 100;
const LINK_DECISIONS: [AttendanceStatus; 3] = [
    AttendanceStatus::Presence,
    AttendanceStatus::PresencePartially,
    AttendanceStatus::Absence,
];

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: String,
}

/// `group` and `event` may also be present on emailed links; they are ignored
#[derive(Debug, Deserialize)]
pub struct RespondQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct EditResponseRequest {
    pub status: AttendanceStatus,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub emails: Vec<String>,
}

/// Health check handler
///
/// GET /health
///
/// Reports "degraded" instead of failing when a store is slow or down.
pub async fn health_handler(State(app_state): State<AppState>) -> Json<HealthResponse> {
    let credential_store = app_state.credential_store.clone();
    let access_store = app_state.access_store.clone();

    let (redis, database) = tokio::join!(
        check_service("redis", async move { credential_store.ping().await }),
        check_service("database", async move { access_store.ping().await }),
    );

    let healthy = redis == "connected" && database == "connected";
    Json(HealthResponse {
        status: (if healthy { "healthy" } else { "degraded" }).to_string(),
        redis,
        database,
    })
}

async fn check_service<F>(service: &str, check: F) -> String
where
    F: std::future::Future<Output = Result<(), AppError>>,
{
    match tokio::time::timeout(Duration::from_millis(800), check).await {
        Ok(Ok(())) => "connected".to_string(),
        Ok(Err(e)) => {
            warn!(service = service, error = %e, "Health check failed");
            "unavailable".to_string()
        }
        Err(_) => {
            debug!(service = service, "Health check timed out");
            "slow: timeout".to_string()
        }
    }
}

/// Start a passwordless login
///
/// POST /auth/login
///
/// Always answers 202 with the same body for a well-formed address so the
/// endpoint cannot be used to discover registered users.
pub async fn request_login_handler(
    State(app_state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginRequestedResponse>), ApiError> {
    let email = normalize_email(&request.email)?;
    let token = app_state.tickets.issue(&email).await?;
    let link = verify_link(&app_state.config.public_origin, &token)?;

    dispatch_mail(
        app_state.mailer.clone(),
        MailMessage {
            to: vec![email],
            subject: "Your sign-in link".to_string(),
            text: format!(
                "Use this link to sign in. It expires in {} minutes and works once.\n\n{}\n",
                app_state.config.email_ticket_ttl_secs / 60,
                link
            ),
        },
    );
    app_state
        .audit_logger
        .log_access_event(AccessEvent::LoginRequested, None, None);

    Ok((
        StatusCode::ACCEPTED,
        Json(LoginRequestedResponse {
            message: "If the address can receive mail, a sign-in link is on its way".to_string(),
        }),
    ))
}

/// Complete a passwordless login
///
/// GET /auth/verify?token=
///
/// Consumes the ticket, upserts the user and sets the session cookie.
pub async fn verify_login_handler(
    State(app_state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Response, ApiError> {
    let email = match app_state.tickets.consume(&query.token).await {
        Ok(email) => email,
        Err(e) => {
            app_state.audit_logger.log_access_event(
                AccessEvent::LoginFailed { reason: e.to_string() },
                None,
                None,
            );
            return Err(e.into());
        }
    };

    let user = app_state.user_store.upsert_by_email(&email).await?;
    let issued = app_state
        .session_codec
        .issue(&SessionUser::from(&user))
        .map_err(AppError::from)?;
    let cookie = session_set_cookie(
        &issued.token,
        issued.expires_at,
        app_state.config.is_production(),
    )?;

    app_state
        .audit_logger
        .log_access_event(AccessEvent::LoginSucceeded, Some(user.id), None);
    info!(user_id = %user.id, "Session issued");

    let body = SessionResponse {
        expires_at: issued.expires_at,
        user: issued.claims.user,
    };
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Current session
///
/// GET /auth/session
pub async fn current_session_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let token = extract_session_cookie(&headers).ok_or(AppError::Unauthenticated)?;
    let claims = app_state.session_codec.verify(&token)?;
    let expires_at = chrono::DateTime::from_timestamp(claims.expires_at, 0)
        .ok_or_else(|| AppError::InvalidCredential("expiry out of range".to_string()))?;

    Ok(Json(SessionResponse {
        user: claims.user,
        expires_at,
    }))
}

/// POST /auth/logout
///
/// Credentials are self-verifying; logout only removes the cookie.
pub async fn logout_handler(State(app_state): State<AppState>) -> Result<Response, ApiError> {
    let cookie = clear_session_cookie(app_state.config.is_production())?;
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]).into_response())
}

/// One-click attendance response
///
/// GET /respond/:decision?token=
///
/// The secret is rotated in the same write, so the clicked link stops working.
pub async fn respond_via_link_handler(
    State(app_state): State<AppState>,
    Path(decision): Path<String>,
    Query(query): Query<RespondQuery>,
) -> Result<Json<ResponseStatusView>, ApiError> {
    let status = AttendanceStatus::from_decision(&decision)?;
    let linked = app_state
        .links
        .resolve_by_secret_and_rotate(&query.token, status)
        .await?;

    let status_link = build_status_link(&app_state.config.public_origin, &linked.attendance.secret)?;
    Ok(Json(ResponseStatusView::new(linked, status_link.to_string(), Utc::now())))
}

/// Status page
///
/// GET /respond/status/:token
pub async fn show_response_handler(
    State(app_state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ResponseStatusView>, ApiError> {
    let linked = app_state.links.resolve_by_secret(&token).await?;
    let status_link = build_status_link(&app_state.config.public_origin, &token)?;
    Ok(Json(ResponseStatusView::new(linked, status_link.to_string(), Utc::now())))
}

/// Edit a response from the status page
///
/// PATCH /respond/status/:token
///
/// Does not rotate; the same status page stays usable until the deadline.
pub async fn edit_response_handler(
    State(app_state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<EditResponseRequest>,
) -> Result<Json<ResponseStatusView>, ApiError> {
    let comment = validate_comment(request.comment)?;
    let linked = app_state
        .links
        .edit_response(&token, request.status, comment)
        .await?;
    let status_link = build_status_link(&app_state.config.public_origin, &token)?;
    Ok(Json(ResponseStatusView::new(linked, status_link.to_string(), Utc::now())))
}

/// GET /api/groups/:group_id
pub async fn group_summary_handler(
    State(app_state): State<AppState>,
    Extension(pass): Extension<GatePass>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<GroupSummaryResponse>, ApiError> {
    let group = app_state
        .access_store
        .find_group(group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("group".to_string()))?;

    Ok(Json(GroupSummaryResponse {
        group,
        tier: pass.granted.group_tier().unwrap_or(GroupTier::None),
    }))
}

/// GET /api/groups/:group_id/events
pub async fn group_events_handler(
    State(app_state): State<AppState>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<GroupEventsResponse>, ApiError> {
    let events = app_state.access_store.list_group_events(group_id).await?;
    Ok(Json(GroupEventsResponse { events }))
}

/// GET /api/groups/:group_id/events/:event_id
pub async fn event_summary_handler(
    State(app_state): State<AppState>,
    Extension(pass): Extension<GatePass>,
    Path((_group_id, event_id)): Path<(GroupId, EventId)>,
) -> Result<Json<EventSummaryResponse>, ApiError> {
    let event = load_event(&app_state, event_id).await?;
    let attendance = app_state
        .attendance_store
        .find(event_id, pass.caller.user.id)
        .await?;

    Ok(Json(EventSummaryResponse {
        event,
        tier: pass.granted.event_tier().unwrap_or(EventTier::None),
        attendance,
    }))
}

/// Edit the caller's own attendance row
///
/// PATCH /api/groups/:group_id/events/:event_id/attendance
///
/// The gate only proves participation; the row written is always the caller's.
pub async fn update_own_attendance_handler(
    State(app_state): State<AppState>,
    Extension(caller): Extension<SessionClaims>,
    Path((_group_id, event_id)): Path<(GroupId, EventId)>,
    Json(request): Json<EditResponseRequest>,
) -> Result<Json<Attendance>, ApiError> {
    let comment = validate_comment(request.comment)?;
    let update = AttendanceUpdate {
        status: request.status,
        comment,
        rotate_to: None,
    };
    let attendance = app_state
        .attendance_store
        .update_own(event_id, caller.user.id, update, Utc::now())
        .await?;

    info!(
        event_id = %event_id,
        user_id = %caller.user.id,
        status = %attendance.status,
        "Attendance updated by participant"
    );
    Ok(Json(attendance))
}

/// GET /api/groups/:group_id/events/:event_id/manage/attendances
pub async fn list_attendances_handler(
    State(app_state): State<AppState>,
    Path((_group_id, event_id)): Path<(GroupId, EventId)>,
) -> Result<Json<AttendanceListResponse>, ApiError> {
    let attendances = app_state.attendance_store.list_for_event(event_id).await?;
    Ok(Json(AttendanceListResponse { attendances }))
}

/// Invite participants by email
///
/// POST /api/groups/:group_id/events/:event_id/manage/invitations
///
/// Existing rows keep their secret, so links already sent stay valid.
pub async fn invite_participants_handler(
    State(app_state): State<AppState>,
    Extension(caller): Extension<SessionClaims>,
    Path((group_id, event_id)): Path<(GroupId, EventId)>,
    Json(request): Json<InviteRequest>,
) -> Result<(StatusCode, Json<InvitationResponse>), ApiError> {
    if request.emails.is_empty() || request.emails.len() > MAX_INVITATIONS_PER_REQUEST {
        return Err(AppError::ValidationError(format!(
            "between 1 and {} addresses required",
            MAX_INVITATIONS_PER_REQUEST
        ))
        .into());
    }
    let emails = request
        .emails
        .iter()
        .map(|email| normalize_email(email))
        .collect::<Result<Vec<_>, _>>()?;

    let event = load_event(&app_state, event_id).await?;
    let origin = &app_state.config.public_origin;

    for email in &emails {
        let user = app_state.user_store.upsert_by_email(email).await?;
        let attendance = app_state
            .attendance_store
            .create_if_absent(event_id, user.id, &generate_secret())
            .await?;

        let text = invitation_text(origin, group_id, &event, &attendance.secret)?;
        dispatch_mail(
            app_state.mailer.clone(),
            MailMessage {
                to: vec![email.clone()],
                subject: format!("Will you attend {}?", event.name),
                text,
            },
        );
    }

    info!(
        event_id = %event_id,
        invited_by = %caller.user.id,
        count = emails.len(),
        "Participants invited"
    );
    Ok((StatusCode::CREATED, Json(InvitationResponse { invited: emails.len() })))
}

async fn load_event(app_state: &AppState, event_id: EventId) -> Result<EventRecord, AppError> {
    app_state
        .access_store
        .find_event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))
}

fn validate_comment(comment: Option<String>) -> Result<Option<String>, AppError> {
    match comment {
        Some(c) if c.chars().count() > MAX_COMMENT_CHARS => Err(AppError::ValidationError(
            format!("comment longer than {} characters", MAX_COMMENT_CHARS),
        )),
        other => Ok(other),
    }
}

fn verify_link(origin: &Url, token: &str) -> Result<Url, AppError> {
    let mut url = origin
        .join("auth/verify")
        .map_err(|e| AppError::ConfigurationError(format!("Invalid public origin: {}", e)))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

fn invitation_text(
    origin: &Url,
    group_id: GroupId,
    event: &EventRecord,
    secret: &str,
) -> Result<String, AppError> {
    let mut text = format!("You are invited to {}.\n\n", event.name);
    if let Some(ends_at) = event.registration_ends_at {
        text.push_str(&format!(
            "Please respond before {}.\n\n",
            ends_at.format("%Y-%m-%d %H:%M UTC")
        ));
    }
    for decision in LINK_DECISIONS {
        let link = build_attendance_link(origin, group_id, event.id, secret, decision)?;
        text.push_str(&format!("{}: {}\n", decision, link));
    }
    text.push_str(&format!(
        "\nReview or change your response: {}\n",
        build_status_link(origin, secret)?
    ));
    Ok(text)
}

/// Send mail in the background; failures are logged and never reach the caller
fn dispatch_mail(mailer: Arc<dyn Mailer + Send + Sync>, message: MailMessage) {
    tokio::spawn(async move {
        let recipients = message.to.len();
        if let Err(e) = mailer.send(message).await {
            warn!(error = %e, recipients = recipients, "Mail delivery failed");
        }
    });
}
