// PostgreSQL-backed access, user and attendance storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgExecutor, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{AccessStore, AttendanceStore, UserStore};
use crate::auth::link::ensure_registration_open;
use crate::core::errors::AppError;
use crate::core::models::{
    Attendance, AttendanceUpdate, EventId, EventRecord, GroupId, GroupRecord, LinkedAttendance,
    User, UserId,
};

const GROUP_SELECT: &str = "SELECT g.id, g.name, g.owner_id,
        COALESCE(array_agg(a.user_id) FILTER (WHERE a.user_id IS NOT NULL), '{}') AS admin_ids
     FROM event_groups g
     LEFT JOIN group_administrators a ON a.group_id = g.id";

const EVENT_SELECT: &str = "SELECT e.id, e.group_id, e.name, e.owner_id, e.registration_ends_at,
        COALESCE(array_agg(a.user_id) FILTER (WHERE a.user_id IS NOT NULL), '{}') AS admin_ids
     FROM events e
     LEFT JOIN event_administrators a ON a.event_id = e.id";

const ATTENDANCE_COLUMNS: &str = "event_id, user_id, status, comment, secret, updated_at";

#[derive(FromRow)]
struct GroupRow {
    id: Uuid,
    name: String,
    owner_id: Uuid,
    admin_ids: Vec<Uuid>,
}

impl From<GroupRow> for GroupRecord {
    fn from(row: GroupRow) -> Self {
        Self {
            id: row.id.into(),
            name: row.name,
            owner_id: row.owner_id.into(),
            admin_ids: row.admin_ids.into_iter().map(UserId::from).collect(),
        }
    }
}

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    group_id: Uuid,
    name: String,
    owner_id: Uuid,
    registration_ends_at: Option<DateTime<Utc>>,
    admin_ids: Vec<Uuid>,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id.into(),
            group_id: row.group_id.into(),
            name: row.name,
            owner_id: row.owner_id.into(),
            admin_ids: row.admin_ids.into_iter().map(UserId::from).collect(),
            registration_ends_at: row.registration_ends_at,
        }
    }
}

#[derive(FromRow)]
struct AttendanceRow {
    event_id: Uuid,
    user_id: Uuid,
    status: String,
    comment: Option<String>,
    secret: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AttendanceRow> for Attendance {
    type Error = AppError;

    fn try_from(row: AttendanceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: row.event_id.into(),
            user_id: row.user_id.into(),
            status: row
                .status
                .parse()
                .map_err(|_| AppError::DatabaseError(format!("unknown attendance status '{}'", row.status)))?,
            comment: row.comment,
            secret: row.secret,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
}

/// Relational store for groups, events, users and attendance rows
pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Pool that opens connections on first use
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<PgPool, AppError> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(|e| AppError::ConfigurationError(format!("Invalid DATABASE_URL: {}", e)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.db_pool
    }

    /// Apply the migrations embedded from `migrations/`; already applied ones are skipped
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {}", e)))?;

        info!("Database migrations checked/applied");
        Ok(())
    }

    async fn fetch_event<'e, E>(executor: E, event_id: Uuid) -> Result<Option<EventRecord>, AppError>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, EventRow>(&format!("{} WHERE e.id = $1 GROUP BY e.id", EVENT_SELECT))
            .bind(event_id)
            .fetch_optional(executor)
            .await?;
        Ok(row.map(EventRecord::from))
    }

    async fn apply_update<'e, E>(
        executor: E,
        event_id: Uuid,
        user_id: Uuid,
        expected_secret: Option<&str>,
        update: &AttendanceUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Attendance>, AppError>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            "UPDATE attendances
             SET status = $1,
                 comment = COALESCE($2, comment),
                 secret = COALESCE($3, secret),
                 updated_at = $4
             WHERE event_id = $5 AND user_id = $6 AND ($7::TEXT IS NULL OR secret = $7)
             RETURNING {}",
            ATTENDANCE_COLUMNS
        ))
        .bind(update.status.as_str())
        .bind(&update.comment)
        .bind(&update.rotate_to)
        .bind(now)
        .bind(event_id)
        .bind(user_id)
        .bind(expected_secret)
        .fetch_optional(executor)
        .await?;
        row.map(Attendance::try_from).transpose()
    }
}

#[async_trait]
impl AccessStore for PgStore {
    async fn find_group(&self, group_id: GroupId) -> Result<Option<GroupRecord>, AppError> {
        let row = sqlx::query_as::<_, GroupRow>(&format!("{} WHERE g.id = $1 GROUP BY g.id", GROUP_SELECT))
            .bind(group_id.as_uuid())
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(GroupRecord::from))
    }

    async fn find_event(&self, event_id: EventId) -> Result<Option<EventRecord>, AppError> {
        Self::fetch_event(&self.db_pool, event_id.as_uuid()).await
    }

    async fn list_group_events(&self, group_id: GroupId) -> Result<Vec<EventRecord>, AppError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "{} WHERE e.group_id = $1 GROUP BY e.id ORDER BY e.registration_ends_at NULLS LAST, e.name",
            EVENT_SELECT
        ))
        .bind(group_id.as_uuid())
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

    async fn is_attendee(&self, event_id: EventId, user_id: UserId) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM attendances WHERE event_id = $1 AND user_id = $2)",
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&self.db_pool)
        .await?;
        Ok(exists)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.db_pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn upsert_by_email(&self, email: &str) -> Result<User, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (id, email, name) VALUES ($1, $2, $3)
             ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
             RETURNING id, email, name",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(User::default_name(email))
        .fetch_one(&self.db_pool)
        .await?;

        Ok(User {
            id: row.id.into(),
            email: row.email,
            name: row.name,
        })
    }
}

#[async_trait]
impl AttendanceStore for PgStore {
    async fn find(&self, event_id: EventId, user_id: UserId) -> Result<Option<Attendance>, AppError> {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {} FROM attendances WHERE event_id = $1 AND user_id = $2",
            ATTENDANCE_COLUMNS
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.db_pool)
        .await?;
        row.map(Attendance::try_from).transpose()
    }

    async fn find_by_secret(&self, secret: &str) -> Result<Option<LinkedAttendance>, AppError> {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {} FROM attendances WHERE secret = $1",
            ATTENDANCE_COLUMNS
        ))
        .bind(secret)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some(attendance) = row.map(Attendance::try_from).transpose()? else {
            return Ok(None);
        };
        let event = Self::fetch_event(&self.db_pool, attendance.event_id.as_uuid()).await?;
        Ok(event.map(|event| LinkedAttendance { attendance, event }))
    }

    async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Attendance>, AppError> {
        let rows = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {} FROM attendances WHERE event_id = $1 ORDER BY updated_at",
            ATTENDANCE_COLUMNS
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.db_pool)
        .await?;
        rows.into_iter().map(Attendance::try_from).collect()
    }

    async fn create_if_absent(
        &self,
        event_id: EventId,
        user_id: UserId,
        secret: &str,
    ) -> Result<Attendance, AppError> {
        sqlx::query(
            "INSERT INTO attendances (event_id, user_id, status, secret, updated_at)
             VALUES ($1, $2, 'UNANSWERED', $3, NOW())
             ON CONFLICT (event_id, user_id) DO NOTHING",
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(secret)
        .execute(&self.db_pool)
        .await?;

        self.find(event_id, user_id)
            .await?
            .ok_or_else(|| AppError::DatabaseError("attendance row vanished after insert".to_string()))
    }

    async fn update_by_secret(
        &self,
        secret: &str,
        update: AttendanceUpdate,
        now: DateTime<Utc>,
    ) -> Result<LinkedAttendance, AppError> {
        let mut tx = self.db_pool.begin().await?;

        // Blocks a concurrent holder of the same secret until we commit;
        // it then re-reads the rotated row and finds nothing.
        let locked: Option<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT event_id, user_id FROM attendances WHERE secret = $1 FOR UPDATE",
        )
        .bind(secret)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((event_id, user_id)) = locked else {
            debug!("Attendance secret did not resolve");
            return Err(AppError::NotFound("attendance".to_string()));
        };

        let event = Self::fetch_event(&mut *tx, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("event".to_string()))?;
        ensure_registration_open(event.registration_ends_at, now)?;

        let attendance = Self::apply_update(&mut *tx, event_id, user_id, Some(secret), &update, now)
            .await?
            .ok_or_else(|| AppError::NotFound("attendance".to_string()))?;

        tx.commit().await?;
        Ok(LinkedAttendance { attendance, event })
    }

    async fn update_own(
        &self,
        event_id: EventId,
        user_id: UserId,
        update: AttendanceUpdate,
        now: DateTime<Utc>,
    ) -> Result<Attendance, AppError> {
        let mut tx = self.db_pool.begin().await?;

        let locked: Option<(Uuid,)> = sqlx::query_as(
            "SELECT event_id FROM attendances WHERE event_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Err(AppError::NotFound("attendance".to_string()));
        }

        let event = Self::fetch_event(&mut *tx, event_id.as_uuid())
            .await?
            .ok_or_else(|| AppError::NotFound("event".to_string()))?;
        ensure_registration_open(event.registration_ends_at, now)?;

        let attendance = Self::apply_update(
            &mut *tx,
            event_id.as_uuid(),
            user_id.as_uuid(),
            None,
            &update,
            now,
        )
        .await?
        .ok_or_else(|| AppError::NotFound("attendance".to_string()))?;

        tx.commit().await?;
        Ok(attendance)
    }
}
