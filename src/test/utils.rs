#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::db::{
        assign_program_to_teacher, create_profile, create_program, create_session, create_student,
        link_session_programs,
    };
    use crate::error::AppError;
    use chrono::NaiveDateTime;
    use sqlx::{Pool, Sqlite, SqlitePool};
    use std::collections::HashMap;
    use std::sync::Once;
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        students: Vec<String>,
        programs: Vec<TestProgram>,
        sessions: Vec<TestSession>,
    }

    pub struct TestUser {
        pub email: String,
        pub full_name: String,
        pub role: Role,
    }

    pub struct TestProgram {
        pub name: String,
        pub teacher_email: Option<String>,
    }

    pub struct TestSession {
        pub teacher_email: String,
        pub student_name: String,
        pub starts_at: NaiveDateTime,
        pub ends_at: NaiveDateTime,
        pub location: Option<String>,
        pub status: Option<String>,
        pub program_names: Vec<String>,
    }

    /// Parses "YYYY-MM-DD HH:MM" as a naive UTC instant for fixtures.
    pub fn instant(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").expect("valid fixture instant")
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn teacher(mut self, email: &str, full_name: &str) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                full_name: full_name.to_string(),
                role: Role::Teacher,
            });
            self
        }

        pub fn admin(mut self, email: &str, full_name: &str) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                full_name: full_name.to_string(),
                role: Role::Admin,
            });
            self
        }

        pub fn student(mut self, full_name: &str) -> Self {
            self.students.push(full_name.to_string());
            self
        }

        pub fn program(mut self, name: &str, teacher_email: Option<&str>) -> Self {
            self.programs.push(TestProgram {
                name: name.to_string(),
                teacher_email: teacher_email.map(String::from),
            });
            self
        }

        pub fn session(
            mut self,
            teacher_email: &str,
            student_name: &str,
            starts_at: &str,
            ends_at: &str,
        ) -> Self {
            self.sessions.push(TestSession {
                teacher_email: teacher_email.to_string(),
                student_name: student_name.to_string(),
                starts_at: instant(starts_at),
                ends_at: instant(ends_at),
                location: None,
                status: None,
                program_names: Vec::new(),
            });
            self
        }

        pub fn session_with_status(
            mut self,
            teacher_email: &str,
            student_name: &str,
            starts_at: &str,
            ends_at: &str,
            status: &str,
        ) -> Self {
            self.sessions.push(TestSession {
                teacher_email: teacher_email.to_string(),
                student_name: student_name.to_string(),
                starts_at: instant(starts_at),
                ends_at: instant(ends_at),
                location: None,
                status: Some(status.to_string()),
                program_names: Vec::new(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            let pool = SqlitePool::connect("sqlite::memory:").await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut student_id_map: HashMap<String, i64> = HashMap::new();
            let mut program_id_map: HashMap<String, i64> = HashMap::new();
            let mut session_ids: Vec<i64> = Vec::new();

            for user in &self.users {
                let user_id = create_profile(
                    &pool,
                    &user.email,
                    STANDARD_PASSWORD,
                    &user.full_name,
                    user.role.as_str(),
                )
                .await?;

                user_id_map.insert(user.email.clone(), user_id);
            }

            for name in &self.students {
                let student_id = create_student(&pool, name).await?;
                student_id_map.insert(name.clone(), student_id);
            }

            for program in &self.programs {
                let program_id = create_program(&pool, &program.name).await?;
                program_id_map.insert(program.name.clone(), program_id);

                if let Some(email) = &program.teacher_email {
                    if let Some(teacher_id) = user_id_map.get(email) {
                        assign_program_to_teacher(&pool, *teacher_id, program_id).await?;
                    }
                }
            }

            for session in &self.sessions {
                let teacher_id = user_id_map
                    .get(&session.teacher_email)
                    .copied()
                    .expect("session fixture references a known teacher");
                let student_id = student_id_map
                    .get(&session.student_name)
                    .copied()
                    .expect("session fixture references a known student");

                let session_id = create_session(
                    &pool,
                    teacher_id,
                    student_id,
                    session.starts_at.and_utc(),
                    session.ends_at.and_utc(),
                    session.location.as_deref(),
                )
                .await?;

                if let Some(status) = &session.status {
                    sqlx::query("UPDATE sessions SET status = ? WHERE id = ?")
                        .bind(status)
                        .bind(session_id)
                        .execute(&pool)
                        .await?;
                }

                if !session.program_names.is_empty() {
                    let ids: Vec<i64> = session
                        .program_names
                        .iter()
                        .filter_map(|name| program_id_map.get(name).copied())
                        .collect();
                    link_session_programs(&pool, session_id, &ids).await?;
                }

                session_ids.push(session_id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                student_id_map,
                program_id_map,
                session_ids,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub student_id_map: HashMap<String, i64>,
        pub program_id_map: HashMap<String, i64>,
        pub session_ids: Vec<i64>,
    }

    impl TestDb {
        pub fn user_id(&self, email: &str) -> Option<i64> {
            self.user_id_map.get(email).copied()
        }

        pub fn student_id(&self, name: &str) -> Option<i64> {
            self.student_id_map.get(name).copied()
        }

        pub fn program_id(&self, name: &str) -> Option<i64> {
            self.program_id_map.get(name).copied()
        }

        pub fn session_id(&self, index: usize) -> i64 {
            self.session_ids[index]
        }

        pub async fn session_status(&self, session_id: i64) -> Result<String, sqlx::Error> {
            sqlx::query_scalar::<_, String>("SELECT status FROM sessions WHERE id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use rocket::http::{ContentType, Cookie};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};

    /// One teacher, one admin, one student, one program, one scheduled
    /// session well in the future.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .teacher("ana@portal.test", "Ana Teacher")
            .admin("admin@portal.test", "Portal Admin")
            .student("Maya Student")
            .program("Phonics", Some("ana@portal.test"))
            .session(
                "ana@portal.test",
                "Maya Student",
                "2030-06-01 10:00",
                "2030-06-01 10:30",
            )
            .build()
            .await
            .expect("Failed to build test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = crate::init_rocket(test_db.pool.clone()).await;

        // Untracked: tests juggle teacher and admin logins, so cookies are
        // always passed explicitly per request.
        let client = Client::untracked(rocket)
            .await
            .expect("Failed to create test client");

        (client, test_db)
    }

    pub async fn login_test_user(
        client: &Client,
        email: &str,
        password: &str,
    ) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": email,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        response
            .cookies()
            .iter()
            .map(|c| c.clone().into_owned())
            .collect()
    }

    pub async fn login_standard_teacher(client: &Client) -> Vec<Cookie<'static>> {
        login_test_user(client, "ana@portal.test", STANDARD_PASSWORD).await
    }

    pub async fn login_standard_admin(client: &Client) -> Vec<Cookie<'static>> {
        login_test_user(client, "admin@portal.test", STANDARD_PASSWORD).await
    }
}
