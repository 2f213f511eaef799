use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(SessionStatus::Scheduled),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses lock the session against any further writes.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Scheduled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attendance {
    Present,
    Absent,
    Late,
}

impl Attendance {
    pub fn as_str(&self) -> &str {
        match self {
            Attendance::Present => "present",
            Attendance::Absent => "absent",
            Attendance::Late => "late",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "present" => Some(Attendance::Present),
            "absent" => Some(Attendance::Absent),
            "late" => Some(Attendance::Late),
            _ => None,
        }
    }
}

impl fmt::Display for Attendance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One scheduled teaching appointment. `ends_at` is exclusive: two sessions
/// touching at a boundary do not overlap.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Session {
    pub id: i64,
    pub teacher_id: i64,
    pub student_id: i64,
    pub student_name: String, // Denormalized for convenience
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub status: SessionStatus,
    pub programs: Vec<String>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbSession {
    pub id: Option<i64>,
    pub teacher_id: Option<i64>,
    pub student_id: Option<i64>,
    pub student_name: Option<String>,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    pub location: Option<String>,
    pub status: Option<String>,
}

impl From<DbSession> for Session {
    fn from(db: DbSession) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            teacher_id: db.teacher_id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            student_name: db.student_name.unwrap_or_default(),
            starts_at: to_utc(db.starts_at),
            ends_at: to_utc(db.ends_at),
            location: db.location,
            status: db
                .status
                .as_deref()
                .and_then(SessionStatus::from_str)
                .unwrap_or(SessionStatus::Scheduled),
            programs: Vec::new(),
        }
    }
}

/// The single attendance/progress record attached to a session. Unique on
/// `session_id`; a resubmission overwrites the previous row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionUpdate {
    pub id: i64,
    pub session_id: i64,
    pub attendance: Attendance,
    pub progress_score: Option<i64>,
    pub remarks: Option<String>,
    pub updated_by: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbSessionUpdate {
    pub id: Option<i64>,
    pub session_id: Option<i64>,
    pub attendance: Option<String>,
    pub progress_score: Option<i64>,
    pub remarks: Option<String>,
    pub updated_by: Option<i64>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbSessionUpdate> for SessionUpdate {
    fn from(db: DbSessionUpdate) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            session_id: db.session_id.unwrap_or_default(),
            attendance: db
                .attendance
                .as_deref()
                .and_then(Attendance::from_str)
                .unwrap_or(Attendance::Present),
            progress_score: db.progress_score,
            remarks: db.remarks,
            updated_by: db.updated_by.unwrap_or_default(),
            updated_at: to_utc(db.updated_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Program {
    pub id: i64,
    pub name: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbProgram {
    pub id: Option<i64>,
    pub name: Option<String>,
}

impl From<DbProgram> for Program {
    fn from(db: DbProgram) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Student {
    pub id: i64,
    pub full_name: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbStudent {
    pub id: Option<i64>,
    pub full_name: Option<String>,
}

impl From<DbStudent> for Student {
    fn from(db: DbStudent) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            full_name: db.full_name.unwrap_or_default(),
        }
    }
}

/// One row of a student's session history table: the session, its teacher,
/// and whatever update was recorded (if any), flattened for display.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionHistoryEntry {
    pub session_id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub teacher_name: String,
    pub attendance: Option<String>,
    pub progress_score: Option<i64>,
    pub remarks: Option<String>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSessionHistoryEntry {
    pub id: Option<i64>,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    pub status: Option<String>,
    pub teacher_name: Option<String>,
    pub attendance: Option<String>,
    pub progress_score: Option<i64>,
    pub remarks: Option<String>,
}

impl From<DbSessionHistoryEntry> for SessionHistoryEntry {
    fn from(db: DbSessionHistoryEntry) -> Self {
        Self {
            session_id: db.id.unwrap_or_default(),
            starts_at: to_utc(db.starts_at),
            ends_at: to_utc(db.ends_at),
            status: db
                .status
                .as_deref()
                .and_then(SessionStatus::from_str)
                .unwrap_or(SessionStatus::Scheduled),
            teacher_name: db.teacher_name.unwrap_or_default(),
            attendance: db.attendance,
            progress_score: db.progress_score,
            remarks: db.remarks,
        }
    }
}

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}
