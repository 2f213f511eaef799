use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{DbProfile, DbUserSession, Profile, UserSession};
use crate::error::AppError;
use crate::models::{
    Attendance, DbProgram, DbSession, DbSessionHistoryEntry, DbSessionUpdate, DbStudent, Program,
    Session, SessionHistoryEntry, SessionUpdate, Student,
};
use crate::schedule::overlaps;

const SESSION_COLUMNS: &str = "s.id, s.teacher_id, s.student_id, st.full_name AS student_name,
       s.starts_at, s.ends_at, s.location, s.status
 FROM sessions s
 JOIN students st ON st.id = s.student_id";

#[instrument(skip_all, fields(email, role))]
pub async fn create_profile(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
    full_name: &str,
    role: &str,
) -> Result<i64, AppError> {
    info!("Creating new profile");

    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM profiles WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Validation(format!(
            "Email '{}' is already registered",
            email
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query("INSERT INTO profiles (email, password, full_name, role) VALUES (?, ?, ?, ?)")
        .bind(email)
        .bind(hashed_password)
        .bind(full_name)
        .bind(role)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_profile(pool: &Pool<Sqlite>, id: i64) -> Result<Profile, AppError> {
    info!("Fetching profile by ID");
    let row = sqlx::query_as::<_, DbProfile>(
        "SELECT id, email, full_name, role FROM profiles WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(profile) => Ok(Profile::from(profile)),
        _ => Err(AppError::NotFound(format!(
            "Profile with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_profile_by_email(
    pool: &Pool<Sqlite>,
    email: &str,
) -> Result<Option<Profile>, AppError> {
    info!("Fetching profile by email");
    let row = sqlx::query_as::<_, DbProfile>(
        "SELECT id, email, full_name, role FROM profiles WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Profile::from))
}

#[instrument(skip_all, fields(email))]
pub async fn authenticate_profile(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<Profile>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query_as::<_, (i64, String)>("SELECT id, password FROM profiles WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    match row {
        Some((id, hash)) => match bcrypt::verify(password, &hash) {
            Ok(true) => Ok(Some(get_profile(pool, id).await?)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[instrument(skip(pool))]
pub async fn get_teacher_program_names(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
) -> Result<Vec<String>, AppError> {
    info!("Fetching program names for teacher");
    let names = sqlx::query_scalar::<_, String>(
        "SELECT p.name FROM teacher_programs tp
         JOIN programs p ON p.id = tp.program_id
         WHERE tp.teacher_id = ?
         ORDER BY p.name",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;

    Ok(names)
}

#[instrument(skip(pool))]
pub async fn assign_program_to_teacher(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
    program_id: i64,
) -> Result<(), AppError> {
    info!("Assigning program to teacher");
    sqlx::query("INSERT OR IGNORE INTO teacher_programs (teacher_id, program_id) VALUES (?, ?)")
        .bind(teacher_id)
        .bind(program_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument(skip(pool))]
pub async fn get_teachers(pool: &Pool<Sqlite>) -> Result<Vec<Profile>, AppError> {
    info!("Fetching teacher roster");
    let rows = sqlx::query_as::<_, DbProfile>(
        "SELECT id, email, full_name, role FROM profiles WHERE role = 'teacher' ORDER BY full_name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Profile::from).collect())
}

#[instrument(skip(pool))]
pub async fn create_student(pool: &Pool<Sqlite>, full_name: &str) -> Result<i64, AppError> {
    info!("Creating student");
    let res = sqlx::query("INSERT INTO students (full_name) VALUES (?)")
        .bind(full_name)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_students(pool: &Pool<Sqlite>) -> Result<Vec<Student>, AppError> {
    info!("Fetching student roster");
    let rows = sqlx::query_as::<_, DbStudent>("SELECT id, full_name FROM students ORDER BY full_name")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Student::from).collect())
}

#[instrument(skip(pool))]
pub async fn create_program(pool: &Pool<Sqlite>, name: &str) -> Result<i64, AppError> {
    info!("Creating program");
    let res = sqlx::query("INSERT INTO programs (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_programs(pool: &Pool<Sqlite>) -> Result<Vec<Program>, AppError> {
    info!("Fetching programs");
    let rows = sqlx::query_as::<_, DbProgram>("SELECT id, name FROM programs ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Program::from).collect())
}

#[instrument(skip(pool))]
pub async fn create_session(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
    student_id: i64,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    location: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating session");
    let res = sqlx::query(
        "INSERT INTO sessions (teacher_id, student_id, starts_at, ends_at, location, status)
         VALUES (?, ?, ?, ?, ?, 'scheduled')",
    )
    .bind(teacher_id)
    .bind(student_id)
    .bind(starts_at.naive_utc())
    .bind(ends_at.naive_utc())
    .bind(location)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn link_session_programs(
    pool: &Pool<Sqlite>,
    session_id: i64,
    program_ids: &[i64],
) -> Result<(), AppError> {
    info!("Linking programs to session");
    for program_id in program_ids {
        sqlx::query("INSERT INTO session_programs (session_id, program_id) VALUES (?, ?)")
            .bind(session_id)
            .bind(program_id)
            .execute(pool)
            .await?;
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clear_session_programs(pool: &Pool<Sqlite>, session_id: i64) -> Result<(), AppError> {
    info!("Clearing session program links");
    sqlx::query("DELETE FROM session_programs WHERE session_id = ?")
        .bind(session_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_session_program_names(
    pool: &Pool<Sqlite>,
    session_id: i64,
) -> Result<Vec<String>, AppError> {
    let names = sqlx::query_scalar::<_, String>(
        "SELECT p.name FROM session_programs sp
         JOIN programs p ON p.id = sp.program_id
         WHERE sp.session_id = ?
         ORDER BY p.name",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(names)
}

#[instrument(skip(pool))]
pub async fn get_session_program_ids(
    pool: &Pool<Sqlite>,
    session_id: i64,
) -> Result<Vec<i64>, AppError> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT program_id FROM session_programs WHERE session_id = ? ORDER BY program_id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

#[instrument(skip(pool))]
pub async fn get_session(pool: &Pool<Sqlite>, id: i64) -> Result<Session, AppError> {
    info!("Fetching session");
    let row = sqlx::query_as::<_, DbSession>(&format!(
        "SELECT {SESSION_COLUMNS} WHERE s.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let mut session = Session::from(row);
            session.programs = get_session_program_names(pool, session.id).await?;
            Ok(session)
        }
        _ => Err(AppError::NotFound(format!(
            "Session with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn get_sessions_for_teacher_between(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Session>, AppError> {
    info!("Fetching teacher sessions in range");
    let rows = sqlx::query_as::<_, DbSession>(&format!(
        "SELECT {SESSION_COLUMNS}
         WHERE s.teacher_id = ? AND s.starts_at >= ? AND s.starts_at < ?
         ORDER BY s.starts_at"
    ))
    .bind(teacher_id)
    .bind(from.naive_utc())
    .bind(to.naive_utc())
    .fetch_all(pool)
    .await?;

    collect_with_programs(pool, rows).await
}

#[instrument(skip(pool))]
pub async fn get_sessions_between(
    pool: &Pool<Sqlite>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Session>, AppError> {
    info!("Fetching sessions in range");
    let rows = sqlx::query_as::<_, DbSession>(&format!(
        "SELECT {SESSION_COLUMNS}
         WHERE s.starts_at >= ? AND s.starts_at < ?
         ORDER BY s.starts_at"
    ))
    .bind(from.naive_utc())
    .bind(to.naive_utc())
    .fetch_all(pool)
    .await?;

    collect_with_programs(pool, rows).await
}

async fn collect_with_programs(
    pool: &Pool<Sqlite>,
    rows: Vec<DbSession>,
) -> Result<Vec<Session>, AppError> {
    let mut sessions: Vec<Session> = rows.into_iter().map(Session::from).collect();
    for session in sessions.iter_mut() {
        session.programs = get_session_program_names(pool, session.id).await?;
    }
    Ok(sessions)
}

/// Linear half-open overlap scan over a teacher's committed bookings.
/// Cancelled sessions do not block their slot; `exclude` omits the session
/// being rescheduled so it never conflicts with itself.
#[instrument(skip(pool))]
pub async fn find_conflicts(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    exclude: Option<i64>,
) -> Result<Vec<i64>, AppError> {
    info!("Scanning for schedule conflicts");

    let rows = sqlx::query_as::<_, (i64, NaiveDateTime, NaiveDateTime)>(
        "SELECT id, starts_at, ends_at FROM sessions
         WHERE teacher_id = ? AND status != 'cancelled'",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;

    let conflicts = rows
        .into_iter()
        .filter(|(id, existing_start, existing_end)| {
            Some(*id) != exclude
                && overlaps(
                    starts_at,
                    ends_at,
                    existing_start.and_utc(),
                    existing_end.and_utc(),
                )
        })
        .map(|(id, _, _)| id)
        .collect();

    Ok(conflicts)
}

#[instrument(skip(pool))]
pub async fn reschedule_session(
    pool: &Pool<Sqlite>,
    id: i64,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    location: Option<&str>,
) -> Result<(), AppError> {
    info!("Rescheduling session");
    sqlx::query("UPDATE sessions SET starts_at = ?, ends_at = ?, location = ? WHERE id = ?")
        .bind(starts_at.naive_utc())
        .bind(ends_at.naive_utc())
        .bind(location)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// scheduled -> cancelled, conditional on the current status. Returns whether
/// a row changed; `false` means the session was already terminal.
#[instrument(skip(pool))]
pub async fn cancel_session(pool: &Pool<Sqlite>, id: i64) -> Result<bool, AppError> {
    info!("Cancelling session");
    let result =
        sqlx::query("UPDATE sessions SET status = 'cancelled' WHERE id = ? AND status = 'scheduled'")
            .bind(id)
            .execute(pool)
            .await?;

    Ok(result.rows_affected() > 0)
}

/// scheduled -> completed, conditional on the current status so a
/// concurrently cancelled session is never resurrected. Zero rows affected
/// is success (the transition already happened).
#[instrument(skip(pool))]
pub async fn complete_session_if_scheduled(
    pool: &Pool<Sqlite>,
    id: i64,
) -> Result<u64, AppError> {
    info!("Marking session completed");
    let result =
        sqlx::query("UPDATE sessions SET status = 'completed' WHERE id = ? AND status = 'scheduled'")
            .bind(id)
            .execute(pool)
            .await?;

    Ok(result.rows_affected())
}

/// Upsert keyed on `session_id`: a second submission overwrites the first.
#[instrument(skip(pool, remarks))]
pub async fn record_session_update(
    pool: &Pool<Sqlite>,
    session_id: i64,
    attendance: Attendance,
    progress_score: Option<i64>,
    remarks: Option<&str>,
    updated_by: i64,
) -> Result<(), AppError> {
    info!("Recording session update");
    let now = Utc::now().naive_utc();

    sqlx::query(
        "INSERT INTO session_updates (session_id, attendance, progress_score, remarks, updated_by, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(session_id) DO UPDATE SET
             attendance = excluded.attendance,
             progress_score = excluded.progress_score,
             remarks = excluded.remarks,
             updated_by = excluded.updated_by,
             updated_at = excluded.updated_at",
    )
    .bind(session_id)
    .bind(attendance.as_str())
    .bind(progress_score)
    .bind(remarks)
    .bind(updated_by)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_session_update(
    pool: &Pool<Sqlite>,
    session_id: i64,
) -> Result<Option<SessionUpdate>, AppError> {
    info!("Fetching session update");
    let row = sqlx::query_as::<_, DbSessionUpdate>(
        "SELECT id, session_id, attendance, progress_score, remarks, updated_by, updated_at
         FROM session_updates WHERE session_id = ?",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(SessionUpdate::from))
}

#[instrument(skip(pool))]
pub async fn get_student_history(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<SessionHistoryEntry>, AppError> {
    info!("Fetching student session history");
    let rows = sqlx::query_as::<_, DbSessionHistoryEntry>(
        "SELECT s.id, s.starts_at, s.ends_at, s.status, p.full_name AS teacher_name,
                u.attendance, u.progress_score, u.remarks
         FROM sessions s
         JOIN profiles p ON p.id = s.teacher_id
         LEFT JOIN session_updates u ON u.session_id = s.id
         WHERE s.student_id = ?
         ORDER BY s.starts_at DESC",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(SessionHistoryEntry::from).collect())
}
