// Common test utilities: in-memory stores, a recording mailer and an app builder
#![allow(dead_code)]

use attendance_gate::api::{
    create_router, AccessStore, AppState, AttendanceStore, Config, CredentialStore, Mailer,
    UserStore,
};
use attendance_gate::auth::audit_logger::AuditLogger;
use attendance_gate::auth::gate::RequestGate;
use attendance_gate::auth::link::{ensure_registration_open, AttendanceLinks};
use attendance_gate::auth::permission::PermissionResolver;
use attendance_gate::auth::session::SessionCodec;
use attendance_gate::auth::ticket::EmailTickets;
use attendance_gate::core::errors::AppError;
use attendance_gate::core::models::*;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower::ServiceExt;

/// Expiring key-value store; `take` is atomic under the mutex
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    fail: bool,
}

impl MemoryCredentialStore {
    /// Store whose every operation fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn put_expiring(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::StateError("store down".to_string()));
        }
        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
        if self.fail {
            return Err(AppError::StateError("store down".to_string()));
        }
        let entry = self.entries.lock().unwrap().remove(key);
        Ok(entry
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value))
    }

    async fn ping(&self) -> Result<(), AppError> {
        if self.fail {
            Err(AppError::StateError("store down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct DbState {
    users: HashMap<UserId, User>,
    groups: HashMap<GroupId, GroupRecord>,
    events: HashMap<EventId, EventRecord>,
    attendances: HashMap<(EventId, UserId), Attendance>,
}

/// Relational store double; every mutation runs under one lock
#[derive(Default)]
pub struct MemoryDb {
    state: Mutex<DbState>,
}

impl MemoryDb {
    pub fn add_user(&self, email: &str) -> User {
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            name: User::default_name(email),
        };
        self.state.lock().unwrap().users.insert(user.id, user.clone());
        user
    }

    pub fn add_group(&self, owner: UserId, admins: Vec<UserId>) -> GroupRecord {
        let group = GroupRecord {
            id: GroupId::new(),
            name: "Choir".to_string(),
            owner_id: owner,
            admin_ids: admins,
        };
        self.state.lock().unwrap().groups.insert(group.id, group.clone());
        group
    }

    pub fn add_event(
        &self,
        group: GroupId,
        owner: UserId,
        admins: Vec<UserId>,
        registration_ends_at: Option<DateTime<Utc>>,
    ) -> EventRecord {
        let event = EventRecord {
            id: EventId::new(),
            group_id: group,
            name: "Rehearsal".to_string(),
            owner_id: owner,
            admin_ids: admins,
            registration_ends_at,
        };
        self.state.lock().unwrap().events.insert(event.id, event.clone());
        event
    }

    pub fn add_attendance(&self, event: EventId, user: UserId, secret: &str) -> Attendance {
        let attendance = Attendance {
            event_id: event,
            user_id: user,
            status: AttendanceStatus::Unanswered,
            comment: None,
            secret: secret.to_string(),
            updated_at: Utc::now(),
        };
        self.state
            .lock()
            .unwrap()
            .attendances
            .insert((event, user), attendance.clone());
        attendance
    }

    pub fn attendance(&self, event: EventId, user: UserId) -> Option<Attendance> {
        self.state.lock().unwrap().attendances.get(&(event, user)).cloned()
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        self.state
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
    }

    pub fn set_registration_end(&self, event: EventId, ends_at: Option<DateTime<Utc>>) {
        if let Some(e) = self.state.lock().unwrap().events.get_mut(&event) {
            e.registration_ends_at = ends_at;
        }
    }
}

fn apply(attendance: &mut Attendance, update: AttendanceUpdate, now: DateTime<Utc>) {
    attendance.status = update.status;
    if let Some(comment) = update.comment {
        attendance.comment = Some(comment);
    }
    if let Some(secret) = update.rotate_to {
        attendance.secret = secret;
    }
    attendance.updated_at = now;
}

#[async_trait::async_trait]
impl AccessStore for MemoryDb {
    async fn find_group(&self, group_id: GroupId) -> Result<Option<GroupRecord>, AppError> {
        Ok(self.state.lock().unwrap().groups.get(&group_id).cloned())
    }

    async fn find_event(&self, event_id: EventId) -> Result<Option<EventRecord>, AppError> {
        Ok(self.state.lock().unwrap().events.get(&event_id).cloned())
    }

    async fn list_group_events(&self, group_id: GroupId) -> Result<Vec<EventRecord>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn is_attendee(&self, event_id: EventId, user_id: UserId) -> Result<bool, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .attendances
            .contains_key(&(event_id, user_id)))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryDb {
    async fn upsert_by_email(&self, email: &str) -> Result<User, AppError> {
        if let Some(user) = self.user_by_email(email) {
            return Ok(user);
        }
        Ok(self.add_user(email))
    }
}

#[async_trait::async_trait]
impl AttendanceStore for MemoryDb {
    async fn find(&self, event_id: EventId, user_id: UserId) -> Result<Option<Attendance>, AppError> {
        Ok(self.attendance(event_id, user_id))
    }

    async fn find_by_secret(&self, secret: &str) -> Result<Option<LinkedAttendance>, AppError> {
        let state = self.state.lock().unwrap();
        let Some(attendance) = state.attendances.values().find(|a| a.secret == secret) else {
            return Ok(None);
        };
        Ok(state.events.get(&attendance.event_id).map(|event| LinkedAttendance {
            attendance: attendance.clone(),
            event: event.clone(),
        }))
    }

    async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Attendance>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .attendances
            .values()
            .filter(|a| a.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn create_if_absent(
        &self,
        event_id: EventId,
        user_id: UserId,
        secret: &str,
    ) -> Result<Attendance, AppError> {
        if let Some(existing) = self.attendance(event_id, user_id) {
            return Ok(existing);
        }
        Ok(self.add_attendance(event_id, user_id, secret))
    }

    async fn update_by_secret(
        &self,
        secret: &str,
        update: AttendanceUpdate,
        now: DateTime<Utc>,
    ) -> Result<LinkedAttendance, AppError> {
        let mut state = self.state.lock().unwrap();
        let key = state
            .attendances
            .iter()
            .find(|(_, a)| a.secret == secret)
            .map(|(key, _)| *key)
            .ok_or_else(|| AppError::NotFound("attendance".to_string()))?;
        let event = state
            .events
            .get(&key.0)
            .cloned()
            .ok_or_else(|| AppError::NotFound("event".to_string()))?;
        ensure_registration_open(event.registration_ends_at, now)?;

        let attendance = state
            .attendances
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound("attendance".to_string()))?;
        apply(attendance, update, now);
        Ok(LinkedAttendance {
            attendance: attendance.clone(),
            event,
        })
    }

    async fn update_own(
        &self,
        event_id: EventId,
        user_id: UserId,
        update: AttendanceUpdate,
        now: DateTime<Utc>,
    ) -> Result<Attendance, AppError> {
        let mut state = self.state.lock().unwrap();
        let event = state
            .events
            .get(&event_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("event".to_string()))?;
        if !state.attendances.contains_key(&(event_id, user_id)) {
            return Err(AppError::NotFound("attendance".to_string()));
        }
        ensure_registration_open(event.registration_ends_at, now)?;

        let attendance = state
            .attendances
            .get_mut(&(event_id, user_id))
            .ok_or_else(|| AppError::NotFound("attendance".to_string()))?;
        apply(attendance, update, now);
        Ok(attendance.clone())
    }
}

/// Mailer that keeps every message for inspection
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Mail is dispatched on a spawned task; poll until `count` messages arrived
    pub async fn wait_for(&self, count: usize) -> Vec<MailMessage> {
        for _ in 0..100 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: MailMessage) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

pub fn test_codec() -> Arc<SessionCodec> {
    let config = Config::test_config();
    Arc::new(SessionCodec::new(&config.session_secret, config.session_ttl_secs).unwrap())
}

/// Fully wired application over in-memory collaborators
pub struct TestApp {
    pub router: Router,
    pub db: Arc<MemoryDb>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub mailer: Arc<RecordingMailer>,
    pub codec: Arc<SessionCodec>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_credentials(MemoryCredentialStore::default())
    }

    pub fn with_credentials(credentials: MemoryCredentialStore) -> Self {
        let config = Arc::new(Config::test_config());
        let db = Arc::new(MemoryDb::default());
        let credentials = Arc::new(credentials);
        let mailer = Arc::new(RecordingMailer::default());
        let codec = test_codec();
        let audit_logger = Arc::new(AuditLogger::new(None));
        let resolver = Arc::new(PermissionResolver::new(db.clone()));

        let app_state = AppState {
            session_codec: codec.clone(),
            tickets: Arc::new(EmailTickets::new(credentials.clone(), config.email_ticket_ttl_secs)),
            resolver: resolver.clone(),
            links: Arc::new(AttendanceLinks::new(db.clone())),
            credential_store: credentials.clone(),
            access_store: db.clone(),
            user_store: db.clone(),
            attendance_store: db.clone(),
            mailer: mailer.clone(),
            audit_logger: audit_logger.clone(),
            config,
        };
        let gate = Arc::new(RequestGate::new(codec.clone(), resolver, audit_logger));

        Self {
            router: create_router(app_state, gate),
            db,
            credentials,
            mailer,
            codec,
        }
    }

    /// `Cookie` header value carrying a valid session for `user`
    pub fn cookie_for(&self, user: &User) -> String {
        let issued = self.codec.issue(&SessionUser::from(user)).unwrap();
        format!("session={}", issued.token)
    }
}

/// Owner, admin, attendee and outsider around one group and one event
pub struct Scenario {
    pub owner: User,
    pub group_admin: User,
    pub event_admin: User,
    pub attendee: User,
    pub outsider: User,
    pub group: GroupRecord,
    pub event: EventRecord,
    pub attendee_secret: String,
}

pub fn scenario(db: &MemoryDb) -> Scenario {
    let owner = db.add_user("owner@example.com");
    let group_admin = db.add_user("group-admin@example.com");
    let event_admin = db.add_user("event-admin@example.com");
    let attendee = db.add_user("attendee@example.com");
    let outsider = db.add_user("outsider@example.com");

    let group = db.add_group(owner.id, vec![group_admin.id]);
    let event = db.add_event(group.id, owner.id, vec![event_admin.id], None);
    let attendee_secret = "attendee-secret-1".to_string();
    db.add_attendance(event.id, attendee.id, &attendee_secret);

    Scenario {
        owner,
        group_admin,
        event_admin,
        attendee,
        outsider,
        group,
        event,
        attendee_secret,
    }
}

/// Run one request through a router and decode the JSON body (`Null` when empty)
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, headers, json)
}

pub fn request(method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
