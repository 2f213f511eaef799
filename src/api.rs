use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, Utc};
use rocket::FromForm;
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, Profile, UserSession};
use crate::db::{
    authenticate_profile, cancel_session, clear_session_programs, complete_session_if_scheduled,
    create_session, create_user_session, find_conflicts, get_programs, get_session,
    get_session_program_ids, get_session_update, get_sessions_between,
    get_sessions_for_teacher_between,
    get_student_history, get_students, get_teacher_program_names, get_teachers,
    invalidate_session, link_session_programs, record_session_update, reschedule_session,
};
use crate::error::AppError;
use crate::models::{
    Attendance, Program, Session, SessionHistoryEntry, SessionUpdate, Student,
};
use crate::schedule::{DayBucket, DaySlot, SlotWindow, day_grid, month_grid, week_grid};
use crate::validation::AppErrorExt;
use crate::validation::JsonValidateExt;
use crate::validation::PermissionCheckExt;
use crate::validation::ToValidationResponse;
use crate::validation::ValidationResponse;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "A valid email address is required"))]
    email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<ProfileData>,
    pub error: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ProfileData {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub programs: Vec<String>,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &rocket::http::CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    use rocket::http::{Cookie, SameSite};

    let validated = login.validate_custom()?;

    match authenticate_profile(db, &validated.email, &validated.password)
        .await
        .validate_custom()?
    {
        Some(profile) => {
            // Create session token
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(1);

            create_user_session(db, profile.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            let cookie = Cookie::build(("session_token", token))
                .same_site(SameSite::Lax)
                .http_only(true)
                .max_age(rocket::time::Duration::hours(1));
            cookies.add_private(cookie);

            cookies.add_private(
                Cookie::build(("user_id", profile.id.to_string()))
                    .same_site(SameSite::Lax)
                    .http_only(true)
                    .max_age(rocket::time::Duration::hours(1)),
            );

            cookies.add_private(
                Cookie::build(("user_role", profile.role.to_string()))
                    .same_site(SameSite::Lax)
                    .max_age(rocket::time::Duration::hours(1)),
            );

            let redirect_url = match profile.role.as_str() {
                "admin" => "/portal/admin".to_string(),
                _ => "/portal/day".to_string(),
            };

            let programs = get_teacher_program_names(db, profile.id)
                .await
                .validate_custom()?;

            Ok(Json(LoginResponse {
                success: true,
                user: Some(ProfileData {
                    id: profile.id,
                    email: profile.email,
                    full_name: profile.full_name,
                    role: profile.role.to_string(),
                    programs,
                }),
                error: None,
                redirect_url: Some(redirect_url),
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid email or password".to_string()),
            redirect_url: None,
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(
    cookies: &rocket::http::CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> rocket::response::Redirect {
    let token = cookies
        .get_private("session_token")
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        let _ = invalidate_session(db, &token).await;
    }

    cookies.remove_private(rocket::http::Cookie::build("session_token"));
    cookies.remove_private(rocket::http::Cookie::build("user_id"));
    cookies.remove_private(rocket::http::Cookie::build("user_role"));

    rocket::response::Redirect::to("/portal/login")
}

#[get("/me")]
pub async fn api_me(
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProfileData>, Status> {
    let programs = get_teacher_program_names(db, profile.id).await?;

    Ok(Json(ProfileData {
        id: profile.id,
        email: profile.email,
        full_name: profile.full_name,
        role: profile.role.to_string(),
        programs,
    }))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[derive(FromForm)]
pub struct DayQueryParams {
    date: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct DayGridResponse {
    pub date: NaiveDate,
    pub slots: Vec<DaySlot>,
}

/// The signed-in teacher's day, bucketed into the 30-minute slots of the
/// operating window. Defaults to the local calendar date.
#[get("/schedule/day?<params..>")]
pub async fn api_day_grid(
    params: DayQueryParams,
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<DayGridResponse>, Custom<Json<ValidationResponse>>> {
    profile
        .require_permission(Permission::ViewOwnSchedule)
        .validate_custom()?;

    let date = match params.date {
        Some(raw) => parse_date(&raw).validate_custom()?,
        None => Local::now().date_naive(),
    };

    let from = local_day_start(date).validate_custom()?;
    let to = local_day_start(date + Duration::days(1)).validate_custom()?;

    let sessions = get_sessions_for_teacher_between(db, profile.id, from, to)
        .await
        .validate_custom()?;

    let slots = day_grid(&sessions, date, SlotWindow::from_env(), &Local);

    Ok(Json(DayGridResponse { date, slots }))
}

#[derive(Serialize, Deserialize)]
pub struct WeekGridResponse {
    pub start: NaiveDate,
    pub days: Vec<DayBucket>,
}

/// The signed-in teacher's next seven local calendar days, today first.
#[get("/schedule/week")]
pub async fn api_week_grid(
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<WeekGridResponse>, Custom<Json<ValidationResponse>>> {
    profile
        .require_permission(Permission::ViewOwnSchedule)
        .validate_custom()?;

    let start = Local::now().date_naive();
    let from = local_day_start(start).validate_custom()?;
    let to = local_day_start(start + Duration::days(7)).validate_custom()?;

    let sessions = get_sessions_for_teacher_between(db, profile.id, from, to)
        .await
        .validate_custom()?;

    let days = week_grid(&sessions, start, &Local);

    Ok(Json(WeekGridResponse { start, days }))
}

#[derive(FromForm)]
pub struct MonthQueryParams {
    year: Option<i32>,
    month: Option<u32>,
}

#[derive(Serialize, Deserialize)]
pub struct MonthCellData {
    pub date: NaiveDate,
    pub in_month: bool,
    pub sessions: Vec<Session>,
    pub overflow: usize,
}

#[derive(Serialize, Deserialize)]
pub struct MonthGridResponse {
    pub year: i32,
    pub month: u32,
    pub cells: Vec<MonthCellData>,
}

const MONTH_CELL_PREVIEW: usize = 3;

/// The 42-cell calendar grid for a month. Cell previews are capped at three
/// sessions; `overflow` counts the rest.
#[get("/schedule/month?<params..>")]
pub async fn api_month_grid(
    params: MonthQueryParams,
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MonthGridResponse>, Custom<Json<ValidationResponse>>> {
    profile
        .require_permission(Permission::ViewMonthCalendar)
        .validate_custom()?;

    let today = Local::now().date_naive();
    let year = params.year.unwrap_or_else(|| today.year());
    let month = params.month.unwrap_or_else(|| today.month());

    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::Validation("Invalid year or month.".to_string()))
        .validate_custom()?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| AppError::Validation("Invalid year or month.".to_string()))
    .validate_custom()?;

    let from = local_day_start(first).validate_custom()?;
    let to = local_day_start(next_first).validate_custom()?;

    let sessions = get_sessions_between(db, from, to).await.validate_custom()?;

    let cells = month_grid(&sessions, year, month, &Local)
        .ok_or_else(|| AppError::Validation("Invalid year or month.".to_string()))
        .validate_custom()?;

    let cells = cells
        .into_iter()
        .map(|mut cell| {
            let total = cell.sessions.len();
            cell.sessions.truncate(MONTH_CELL_PREVIEW);
            MonthCellData {
                date: cell.date,
                in_month: cell.in_month,
                sessions: cell.sessions,
                overflow: total.saturating_sub(MONTH_CELL_PREVIEW),
            }
        })
        .collect();

    Ok(Json(MonthGridResponse { year, month, cells }))
}

#[derive(Serialize, Deserialize)]
pub struct SessionDetailResponse {
    pub session: Session,
    pub program_ids: Vec<i64>,
    pub update: Option<SessionUpdate>,
    pub locked: bool,
}

#[get("/session/<id>")]
pub async fn api_get_session(
    id: i64,
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SessionDetailResponse>, Status> {
    let session = get_session(db, id).await?;

    profile.require_session_access(session.teacher_id)?;

    let program_ids = get_session_program_ids(db, id).await?;
    let update = get_session_update(db, id).await?;
    let locked = session.status.is_terminal();

    Ok(Json(SessionDetailResponse {
        session,
        program_ids,
        update,
        locked,
    }))
}

#[derive(Deserialize, Validate, Clone)]
pub struct RecordUpdateRequest {
    attendance: String,
    #[validate(range(min = 0, max = 100, message = "Progress score must be between 0 and 100"))]
    progress_score: Option<i64>,
    remarks: Option<String>,
}

/// Records attendance/progress for a session and auto-completes it. The
/// upsert is keyed on the session, so a resubmission overwrites the previous
/// record; the status transition is conditional and only ever moves
/// scheduled -> completed.
#[put("/session/<id>/update", data = "<update>")]
pub async fn api_record_update(
    id: i64,
    update: Json<RecordUpdateRequest>,
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    profile
        .require_permission(Permission::RecordSessionUpdates)
        .validate_custom()?;

    let validated = update.validate_custom()?;

    let session = get_session(db, id).await.validate_custom()?;

    if session.teacher_id != profile.id {
        return Err(Status::Forbidden.to_validation_response());
    }

    if session.status.is_terminal() {
        return Err(AppError::Validation(format!(
            "Session is {} and cannot be edited.",
            session.status.as_str().to_uppercase()
        ))
        .to_validation_response());
    }

    let attendance = Attendance::from_str(&validated.attendance)
        .ok_or_else(|| {
            AppError::Validation(format!(
                "Unknown attendance value '{}'",
                validated.attendance
            ))
        })
        .validate_custom()?;

    record_session_update(
        db,
        id,
        attendance,
        validated.progress_score,
        validated.remarks.as_deref(),
        profile.id,
    )
    .await
    .validate_custom()?;

    complete_session_if_scheduled(db, id).await.validate_custom()?;

    Ok(Status::Ok)
}

#[derive(Deserialize, Validate, Clone)]
pub struct ScheduleSessionRequest {
    teacher_id: i64,
    student_id: i64,
    date: String,
    start_time: String,
    end_time: String,
    location: Option<String>,
    #[serde(default)]
    program_ids: Vec<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct ScheduleSessionResponse {
    pub id: i64,
    pub warning: Option<String>,
}

/// Admin scheduling: validates the candidate range, runs the conflict scan,
/// then inserts. A failed program-link insert leaves the session row in
/// place and is surfaced as a warning rather than rolled back.
#[post("/sessions", data = "<request>")]
pub async fn api_schedule_session(
    request: Json<ScheduleSessionRequest>,
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<ScheduleSessionResponse>>, Custom<Json<ValidationResponse>>> {
    profile
        .require_permission(Permission::ScheduleSessions)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let (starts_at, ends_at) =
        parse_session_range(&validated.date, &validated.start_time, &validated.end_time)
            .validate_custom()?;

    let conflicts = find_conflicts(db, validated.teacher_id, starts_at, ends_at, None)
        .await
        .validate_custom()?;

    if !conflicts.is_empty() {
        return Err(AppError::Conflict(
            "This teacher already has a session in that time slot.".to_string(),
        )
        .to_validation_response());
    }

    let session_id = create_session(
        db,
        validated.teacher_id,
        validated.student_id,
        starts_at,
        ends_at,
        validated.location.as_deref(),
    )
    .await
    .validate_custom()?;

    let warning = match link_session_programs(db, session_id, &validated.program_ids).await {
        Ok(()) => None,
        Err(err) => {
            err.log_and_record("Program links for new session");
            Some(format!(
                "Session saved, but the program links failed: {}",
                err
            ))
        }
    };

    Ok(Custom(
        Status::Created,
        Json(ScheduleSessionResponse {
            id: session_id,
            warning,
        }),
    ))
}

#[derive(Deserialize, Validate, Clone)]
pub struct EditSessionRequest {
    date: String,
    start_time: String,
    end_time: String,
    location: Option<String>,
    #[serde(default)]
    program_ids: Vec<i64>,
}

/// Admin edit/reschedule. Only scheduled sessions are editable; the new
/// range is re-validated against the no-overlap invariant, excluding the
/// session itself.
#[put("/session/<id>", data = "<request>")]
pub async fn api_edit_session(
    id: i64,
    request: Json<EditSessionRequest>,
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ScheduleSessionResponse>, Custom<Json<ValidationResponse>>> {
    profile
        .require_permission(Permission::EditAnySession)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let session = get_session(db, id).await.validate_custom()?;

    if session.status.is_terminal() {
        return Err(AppError::Validation(format!(
            "Session is {} and cannot be edited.",
            session.status.as_str().to_uppercase()
        ))
        .to_validation_response());
    }

    let (starts_at, ends_at) =
        parse_session_range(&validated.date, &validated.start_time, &validated.end_time)
            .validate_custom()?;

    let conflicts = find_conflicts(db, session.teacher_id, starts_at, ends_at, Some(id))
        .await
        .validate_custom()?;

    if !conflicts.is_empty() {
        return Err(AppError::Conflict(
            "This teacher already has a session in that time slot.".to_string(),
        )
        .to_validation_response());
    }

    reschedule_session(db, id, starts_at, ends_at, validated.location.as_deref())
        .await
        .validate_custom()?;

    clear_session_programs(db, id).await.validate_custom()?;

    let warning = match link_session_programs(db, id, &validated.program_ids).await {
        Ok(()) => None,
        Err(err) => {
            err.log_and_record("Program links for edited session");
            Some(format!(
                "Session updated, but the program links failed: {}",
                err
            ))
        }
    };

    Ok(Json(ScheduleSessionResponse { id, warning }))
}

/// Admin cancellation: scheduled -> cancelled, irreversible. The client asks
/// the user for confirmation; the endpoint enforces the state machine.
#[post("/session/<id>/cancel")]
pub async fn api_cancel_session(
    id: i64,
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    profile
        .require_permission(Permission::CancelSessions)
        .validate_custom()?;

    let session = get_session(db, id).await.validate_custom()?;

    if session.status.is_terminal() {
        return Err(AppError::Validation(
            "Only scheduled sessions can be cancelled.".to_string(),
        )
        .to_validation_response());
    }

    let cancelled = cancel_session(db, id).await.validate_custom()?;

    if !cancelled {
        // Lost the race against a concurrent completion or cancellation.
        return Err(AppError::Validation(
            "Only scheduled sessions can be cancelled.".to_string(),
        )
        .to_validation_response());
    }

    Ok(Status::Ok)
}

#[derive(FromForm)]
pub struct TeacherDayQueryParams {
    date: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct TeacherDayResponse {
    pub date: NaiveDate,
    pub sessions: Vec<Session>,
}

/// Flat (unbucketed) list of a teacher's sessions on a date, for the admin
/// scheduling screen.
#[get("/schedule/teacher/<teacher_id>/day?<params..>")]
pub async fn api_teacher_day(
    teacher_id: i64,
    params: TeacherDayQueryParams,
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<TeacherDayResponse>, Custom<Json<ValidationResponse>>> {
    profile
        .require_permission(Permission::ScheduleSessions)
        .validate_custom()?;

    let date = match params.date {
        Some(raw) => parse_date(&raw).validate_custom()?,
        None => Local::now().date_naive(),
    };

    let from = local_day_start(date).validate_custom()?;
    let to = local_day_start(date + Duration::days(1)).validate_custom()?;

    let sessions = get_sessions_for_teacher_between(db, teacher_id, from, to)
        .await
        .validate_custom()?;

    Ok(Json(TeacherDayResponse { date, sessions }))
}

#[get("/history/student/<id>")]
pub async fn api_student_history(
    id: i64,
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<SessionHistoryEntry>>, Status> {
    profile.require_permission(Permission::ViewStudentHistory)?;

    let history = get_student_history(db, id).await?;

    Ok(Json(history))
}

#[derive(Serialize, Deserialize)]
pub struct TeacherData {
    pub id: i64,
    pub full_name: String,
}

#[derive(Serialize, Deserialize)]
pub struct RosterResponse {
    pub teachers: Vec<TeacherData>,
    pub students: Vec<Student>,
    pub programs: Vec<Program>,
}

/// Dropdown data for the admin scheduling form, name-ordered.
#[get("/roster")]
pub async fn api_roster(
    profile: Profile,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<RosterResponse>, Status> {
    profile.require_permission(Permission::ViewRoster)?;

    let teachers = get_teachers(db)
        .await?
        .into_iter()
        .map(|t| TeacherData {
            id: t.id,
            full_name: t.full_name,
        })
        .collect();
    let students = get_students(db).await?;
    let programs = get_programs(db).await?;

    Ok(Json(RosterResponse {
        teachers,
        students,
        programs,
    }))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("Invalid date '{}'", raw)))
}

fn parse_time(raw: &str) -> Result<NaiveTime, AppError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| AppError::Validation(format!("Invalid time '{}'", raw)))
}

/// The instant the local calendar day begins. On a DST gap the earliest
/// existing local time is used.
fn local_day_start(date: NaiveDate) -> Result<DateTime<Utc>, AppError> {
    date.and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AppError::Validation(format!("Invalid date '{}'", date)))
}

/// Local date + wall-clock times -> UTC instants, validating end > start.
fn parse_session_range(
    date: &str,
    start_time: &str,
    end_time: &str,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let date = parse_date(date)?;
    let start = parse_time(start_time)?;
    let end = parse_time(end_time)?;

    let to_utc = |time: NaiveTime| {
        date.and_time(time)
            .and_local_timezone(Local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                AppError::Validation(format!("Time {} does not exist on {}", time, date))
            })
    };

    let starts_at = to_utc(start)?;
    let ends_at = to_utc(end)?;

    if ends_at <= starts_at {
        return Err(AppError::Validation(
            "End time must be after start time.".to_string(),
        ));
    }

    Ok((starts_at, ends_at))
}
