use crate::error::{AttendanceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

/// Caller identity, passed explicitly into every permission-checked
/// operation: the account id, the role, and the resolved teacher/student id
/// where the account has one.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub role: Role,
    pub teacher_id: Option<i64>,
    pub student_id: Option<i64>,
}

impl AuthContext {
    pub fn admin(user_id: i64) -> Self {
        Self {
            user_id,
            role: Role::Admin,
            teacher_id: None,
            student_id: None,
        }
    }

    pub fn teacher(user_id: i64, teacher_id: i64) -> Self {
        Self {
            user_id,
            role: Role::Teacher,
            teacher_id: Some(teacher_id),
            student_id: None,
        }
    }

    pub fn student(user_id: i64, student_id: i64) -> Self {
        Self {
            user_id,
            role: Role::Student,
            teacher_id: None,
            student_id: Some(student_id),
        }
    }

    /// The caller's teacher id, or `PermissionDenied`.
    pub fn require_teacher(&self) -> Result<i64> {
        self.teacher_id
            .ok_or_else(|| AttendanceError::PermissionDenied("teacher account required".into()))
    }

    /// The caller's student id, or `Forbidden`.
    pub fn require_student(&self) -> Result<i64> {
        self.student_id
            .ok_or_else(|| AttendanceError::Forbidden("student account required".into()))
    }
}
