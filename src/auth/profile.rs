use rocket::http::Status;
use serde::Serialize;

use super::{Permission, Role};

#[derive(Debug, Serialize, Clone)]
pub struct Profile {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbProfile {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<String>,
}

impl From<DbProfile> for Profile {
    fn from(profile: DbProfile) -> Self {
        Self {
            id: profile.id.unwrap_or_default(),
            email: profile.email.unwrap_or_default(),
            full_name: profile.full_name.unwrap_or_default(),
            // Unknown role rows fall back to the least-privileged role.
            role: Role::from_str(&profile.role.unwrap_or_default()).unwrap_or(Role::Teacher),
        }
    }
}

impl Profile {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), Status> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                email = %self.email,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(Status::Forbidden)
        }
    }

    /// Ownership check for teacher-scoped session data: admins may touch any
    /// session, a teacher only their own.
    pub fn require_session_access(&self, session_teacher_id: i64) -> Result<(), Status> {
        if self.id == session_teacher_id || self.has_permission(Permission::EditAnySession) {
            Ok(())
        } else {
            tracing::warn!(
                email = %self.email,
                session_teacher_id = %session_teacher_id,
                "Ownership check failed"
            );
            Err(Status::Forbidden)
        }
    }
}
