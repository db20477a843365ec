use async_trait::async_trait;
use chrono::NaiveDate;

use db::models::{attendance_request, attendance_warning};

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// Outbound notification sink. Calls are fire-and-forget: every call site
/// catches and logs a failure instead of propagating it.
#[async_trait]
pub trait AttendanceNotifier: Send + Sync {
    /// Tells absent/late students that a roll call marked them.
    async fn absence_notification(
        &self,
        user_ids: &[i64],
        course_name: &str,
        date: NaiveDate,
    ) -> Result<(), NotificationError>;

    /// Routes a freshly raised warning to whoever reviews them.
    async fn warning_notification(
        &self,
        warning: &attendance_warning::Model,
    ) -> Result<(), NotificationError>;

    /// Tells the responsible teacher a correction request was filed.
    async fn request_submitted(
        &self,
        request: &attendance_request::Model,
        teacher_user_id: i64,
    ) -> Result<(), NotificationError>;

    /// Tells the student how their correction request was decided.
    async fn approval_result(
        &self,
        request: &attendance_request::Model,
    ) -> Result<(), NotificationError>;
}

/// Default sink that only writes to the log. Real transports plug in behind
/// the same trait.
pub struct LogNotifier;

#[async_trait]
impl AttendanceNotifier for LogNotifier {
    async fn absence_notification(
        &self,
        user_ids: &[i64],
        course_name: &str,
        date: NaiveDate,
    ) -> Result<(), NotificationError> {
        log::info!(
            "absence notification: {} user(s), course={}, date={}",
            user_ids.len(),
            course_name,
            date
        );
        Ok(())
    }

    async fn warning_notification(
        &self,
        warning: &attendance_warning::Model,
    ) -> Result<(), NotificationError> {
        log::info!(
            "warning notification: id={}, type={}, level={}",
            warning.id,
            warning.warning_type,
            warning.level
        );
        Ok(())
    }

    async fn request_submitted(
        &self,
        request: &attendance_request::Model,
        teacher_user_id: i64,
    ) -> Result<(), NotificationError> {
        log::info!(
            "new {} request notification: id={}, teacher_user={}",
            request.request_type,
            request.id,
            teacher_user_id
        );
        Ok(())
    }

    async fn approval_result(
        &self,
        request: &attendance_request::Model,
    ) -> Result<(), NotificationError> {
        log::info!(
            "approval result notification: id={}, status={}",
            request.id,
            request.status
        );
        Ok(())
    }
}
