// Domain models shared by the token, permission and link components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core::errors::AppError;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| AppError::ValidationError(format!("invalid {}", stringify!($name))))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(UserId);
id_type!(GroupId);
id_type!(EventId);

/// Registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
}

impl User {
    /// Default display name for a freshly created user: the local part of the address
    pub fn default_name(email: &str) -> String {
        email.split('@').next().unwrap_or(email).to_string()
    }
}

/// Ownership and delegation facts for a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub owner_id: UserId,
    pub admin_ids: Vec<UserId>,
}

/// Ownership, delegation and deadline facts for an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub id: EventId,
    pub group_id: GroupId,
    pub name: String,
    pub owner_id: UserId,
    pub admin_ids: Vec<UserId>,
    pub registration_ends_at: Option<DateTime<Utc>>,
}

/// Response status of an attendance row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Presence,
    PresencePartially,
    Absence,
    #[default]
    Unanswered,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Presence => "PRESENCE",
            AttendanceStatus::PresencePartially => "PRESENCE_PARTIALLY",
            AttendanceStatus::Absence => "ABSENCE",
            AttendanceStatus::Unanswered => "UNANSWERED",
        }
    }

    /// Map a one-click link decision (`attend`, `partial`, `absent`) to a status
    pub fn from_decision(decision: &str) -> Result<Self, AppError> {
        match decision {
            "attend" => Ok(AttendanceStatus::Presence),
            "partial" => Ok(AttendanceStatus::PresencePartially),
            "absent" => Ok(AttendanceStatus::Absence),
            other => Err(AppError::ValidationError(format!("unknown decision '{}'", other))),
        }
    }

    /// The link decision that records this status, if one exists
    pub fn decision(&self) -> Option<&'static str> {
        match self {
            AttendanceStatus::Presence => Some("attend"),
            AttendanceStatus::PresencePartially => Some("partial"),
            AttendanceStatus::Absence => Some("absent"),
            AttendanceStatus::Unanswered => None,
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRESENCE" => Ok(AttendanceStatus::Presence),
            "PRESENCE_PARTIALLY" => Ok(AttendanceStatus::PresencePartially),
            "ABSENCE" => Ok(AttendanceStatus::Absence),
            "UNANSWERED" => Ok(AttendanceStatus::Unanswered),
            other => Err(AppError::ValidationError(format!("unknown status '{}'", other))),
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attendance row, unique per (event_id, user_id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attendance {
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: AttendanceStatus,
    pub comment: Option<String>,
    #[serde(skip_serializing)]
    pub secret: String,
    pub updated_at: DateTime<Utc>,
}

/// Attendance row together with the event it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedAttendance {
    pub attendance: Attendance,
    pub event: EventRecord,
}

/// Requested change to an attendance row
#[derive(Debug, Clone)]
pub struct AttendanceUpdate {
    pub status: AttendanceStatus,
    /// `None` leaves the stored comment untouched
    pub comment: Option<String>,
    /// Replacement secret; `None` keeps the current one
    pub rotate_to: Option<String>,
}

/// Identity carried inside a session credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionUser {
    pub id: UserId,
    pub email: String,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
        }
    }
}

/// Claims of a session credential (unix seconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionClaims {
    pub user: SessionUser,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

/// Outbound mail message handed to the delivery collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}
