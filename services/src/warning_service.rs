use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set};

use db::models::attendance_detail::{self, AttendanceStatus};
use db::models::attendance_session::{self, SessionStatus};
use db::models::attendance_statistics::Model as Statistics;
use db::models::attendance_warning::{
    self, Model as Warning, TargetType, WarningStatus, WarningType,
};
use db::models::{course_offering, student, teacher};

use crate::config_service::{keys, AttendanceConfigService};
use crate::context::AuthContext;
use crate::error::{AttendanceError, Result};
use crate::notification::AttendanceNotifier;

/// Once a day, at a fixed cadence.
pub const DAILY_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// What a sweep run covered and how many per-item checks failed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepOutcome {
    pub checked: usize,
    pub failed: usize,
}

/// Evaluates aggregates and sessions against the configured thresholds and
/// raises idempotent warning records. Each check can be invoked on demand
/// and all of them run in the daily sweep.
pub struct AttendanceWarningService {
    db: DatabaseConnection,
    config: Arc<AttendanceConfigService>,
    notifier: Arc<dyn AttendanceNotifier>,
}

impl AttendanceWarningService {
    pub fn new(
        db: DatabaseConnection,
        config: Arc<AttendanceConfigService>,
        notifier: Arc<dyn AttendanceNotifier>,
    ) -> Self {
        Self {
            db,
            config,
            notifier,
        }
    }

    /// Flags a student whose absences crossed a threshold: severity 3 when
    /// absences reach the configured share of all classes, severity 2 at the
    /// configured absolute count.
    pub async fn check_student_absence(&self, student_id: i64, offering_id: i64) -> Result<()> {
        let Some(stats) =
            Statistics::find_by_student_and_offering(&self.db, student_id, offering_id).await?
        else {
            return Ok(());
        };
        if stats.absent_count == 0 || stats.total_classes == 0 {
            return Ok(());
        }

        let Some(student) = student::Model::find_by_id(&self.db, student_id).await? else {
            return Ok(());
        };
        let Some((_, course)) =
            course_offering::Model::find_with_course(&self.db, offering_id).await?
        else {
            return Ok(());
        };

        let absent_rate = stats.absent_count as f64 / stats.total_classes as f64;
        let rate_threshold = self.config.float(keys::ABSENT_RATE_THRESHOLD, 0.33).await?;
        let count_threshold = self.config.int(keys::ABSENT_THRESHOLD, 3).await?;

        let (level, message) = if absent_rate >= rate_threshold {
            (
                3,
                format!(
                    "Student {} has missed {} of {} classes of {} ({:.0}% of all classes)",
                    student.name,
                    stats.absent_count,
                    stats.total_classes,
                    course.name,
                    absent_rate * 100.0
                ),
            )
        } else if i64::from(stats.absent_count) >= count_threshold {
            (
                2,
                format!(
                    "Student {} has been absent {} times in {}",
                    student.name, stats.absent_count, course.name
                ),
            )
        } else {
            return Ok(());
        };

        let data = serde_json::json!({
            "absent_count": stats.absent_count,
            "total_classes": stats.total_classes,
            "absent_rate": absent_rate,
        })
        .to_string();

        self.create_if_absent(
            WarningType::StudentAbsent,
            TargetType::Student,
            student_id,
            &student.name,
            Some(offering_id),
            level,
            &message,
            Some(data),
        )
        .await
    }

    /// Flags an offering whose average attendance rate fell below the
    /// configured floor.
    pub async fn check_course_attendance_rate(&self, offering_id: i64) -> Result<()> {
        let stats = Statistics::find_by_offering(&self.db, offering_id).await?;
        if stats.is_empty() {
            return Ok(());
        }

        let avg_rate = stats
            .iter()
            .map(|s| s.attendance_rate.unwrap_or(0.0))
            .sum::<f64>()
            / stats.len() as f64;
        let threshold = self.config.float(keys::LOW_ATTENDANCE_RATE, 0.70).await? * 100.0;
        if avg_rate >= threshold {
            return Ok(());
        }

        let Some((_, course)) =
            course_offering::Model::find_with_course(&self.db, offering_id).await?
        else {
            return Ok(());
        };

        let message = format!(
            "Average attendance for {} is {:.2}%, below the {:.0}% floor",
            course.name, avg_rate, threshold
        );
        let data = serde_json::json!({
            "average_rate": avg_rate,
            "threshold": threshold,
        })
        .to_string();

        self.create_if_absent(
            WarningType::CourseLowRate,
            TargetType::Course,
            offering_id,
            &course.name,
            Some(offering_id),
            2,
            &message,
            Some(data),
        )
        .await
    }

    /// Flags a teacher with no submitted session in the trailing window.
    pub async fn check_teacher_activity(&self, teacher_id: i64) -> Result<()> {
        let days = self.config.int(keys::TEACHER_NO_ATTENDANCE_DAYS, 7).await?;
        let today = Utc::now().date_naive();
        let from = today - chrono::Duration::days(days);

        let recent = attendance_session::Model::count_submitted_by_teacher_in_range(
            &self.db, teacher_id, from, today,
        )
        .await?;
        if recent > 0 {
            return Ok(());
        }

        let Some(teacher) = teacher::Model::find_by_id(&self.db, teacher_id).await? else {
            return Ok(());
        };

        let message = format!(
            "Teacher {} has not submitted a roll call in the past {} days",
            teacher.name, days
        );
        self.create_if_absent(
            WarningType::TeacherNoAttendance,
            TargetType::Teacher,
            teacher_id,
            &teacher.name,
            None,
            1,
            &message,
            None,
        )
        .await
    }

    /// Impossible-state guard: a submitted session where more students
    /// checked in than were expected.
    pub async fn check_session_anomaly(&self, session_id: i64) -> Result<()> {
        let Some(session) = attendance_session::Model::find_by_id(&self.db, session_id).await?
        else {
            return Ok(());
        };
        if session.status != SessionStatus::Submitted {
            return Ok(());
        }

        let present = attendance_detail::Model::count_by_session_and_status(
            &self.db,
            session_id,
            AttendanceStatus::Present,
        )
        .await?;
        let late = attendance_detail::Model::count_by_session_and_status(
            &self.db,
            session_id,
            AttendanceStatus::Late,
        )
        .await?;
        let checked_in = present + late;

        if checked_in <= session.total_students as u64 {
            return Ok(());
        }

        let message = format!(
            "Session #{} recorded {} check-ins against {} expected students",
            session_id, checked_in, session.total_students
        );
        let data = serde_json::json!({
            "session_id": session_id,
            "checked_in": checked_in,
            "total_students": session.total_students,
        })
        .to_string();

        self.create_if_absent(
            WarningType::SessionAnomaly,
            TargetType::Session,
            session_id,
            &format!("attendance session #{session_id}"),
            Some(session.offering_id),
            3,
            &message,
            Some(data),
        )
        .await
    }

    /// Runs every check across every aggregate, offering, teacher and
    /// submitted session. Each item is its own failure boundary: an error is
    /// logged and the sweep moves on.
    pub async fn run_all_checks(&self) -> Result<SweepOutcome> {
        log::info!("attendance warning sweep started");
        let mut outcome = SweepOutcome::default();

        for stats in Statistics::find_all(&self.db).await? {
            outcome.checked += 1;
            if let Err(e) = self
                .check_student_absence(stats.student_id, stats.offering_id)
                .await
            {
                outcome.failed += 1;
                log::error!(
                    "absence check failed: student={}, offering={}, {e}",
                    stats.student_id,
                    stats.offering_id
                );
            }
        }

        for offering in course_offering::Model::find_all(&self.db).await? {
            outcome.checked += 1;
            if let Err(e) = self.check_course_attendance_rate(offering.id).await {
                outcome.failed += 1;
                log::error!("course rate check failed: offering={}, {e}", offering.id);
            }
        }

        for teacher in teacher::Entity::find().all(&self.db).await? {
            outcome.checked += 1;
            if let Err(e) = self.check_teacher_activity(teacher.id).await {
                outcome.failed += 1;
                log::error!("teacher activity check failed: teacher={}, {e}", teacher.id);
            }
        }

        for session in attendance_session::Model::find_all_submitted(&self.db).await? {
            outcome.checked += 1;
            if let Err(e) = self.check_session_anomaly(session.id).await {
                outcome.failed += 1;
                log::error!("session anomaly check failed: session={}, {e}", session.id);
            }
        }

        log::info!(
            "attendance warning sweep finished: checked={}, failed={}",
            outcome.checked,
            outcome.failed
        );
        Ok(outcome)
    }

    /// Marks a pending warning as handled, stamping resolver and comment.
    pub async fn handle(&self, ctx: &AuthContext, warning_id: i64, comment: &str) -> Result<()> {
        self.resolve(ctx, warning_id, WarningStatus::Handled, Some(comment))
            .await
    }

    /// Marks a pending warning as ignored.
    pub async fn ignore(&self, ctx: &AuthContext, warning_id: i64) -> Result<()> {
        self.resolve(ctx, warning_id, WarningStatus::Ignored, None).await
    }

    pub async fn warnings(&self, status: Option<WarningStatus>) -> Result<Vec<Warning>> {
        Ok(Warning::find_by_status(&self.db, status).await?)
    }

    async fn resolve(
        &self,
        ctx: &AuthContext,
        warning_id: i64,
        status: WarningStatus,
        comment: Option<&str>,
    ) -> Result<()> {
        let warning = Warning::find_by_id(&self.db, warning_id)
            .await?
            .ok_or(AttendanceError::WarningNotFound(warning_id))?;
        if warning.status != WarningStatus::Pending {
            return Err(AttendanceError::InvalidOperation(
                "warning has already been resolved".into(),
            ));
        }

        let mut active = warning.into_active_model();
        active.status = Set(status);
        active.handled_by = Set(Some(ctx.user_id));
        active.handled_at = Set(Some(Utc::now()));
        active.handle_comment = Set(comment.map(str::to_owned));
        active.update(&self.db).await?;

        log::info!("warning resolved: id={warning_id}, status={status}");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_if_absent(
        &self,
        warning_type: WarningType,
        target_type: TargetType,
        target_id: i64,
        target_name: &str,
        offering_id: Option<i64>,
        level: i32,
        message: &str,
        data: Option<String>,
    ) -> Result<()> {
        let exists = Warning::exists_pending(
            &self.db,
            warning_type,
            target_type,
            target_id,
            offering_id,
        )
        .await?;
        if exists {
            log::debug!(
                "pending warning already present: type={warning_type}, target={target_type}#{target_id}"
            );
            return Ok(());
        }

        let warning = attendance_warning::ActiveModel {
            warning_type: Set(warning_type),
            target_type: Set(target_type),
            target_id: Set(target_id),
            target_name: Set(target_name.to_owned()),
            offering_id: Set(offering_id),
            level: Set(level),
            message: Set(message.to_owned()),
            data: Set(data),
            status: Set(WarningStatus::Pending),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        log::info!(
            "warning created: id={}, type={warning_type}, target={target_type}#{target_id}, level={level}",
            warning.id
        );

        if let Err(e) = self.notifier.warning_notification(&warning).await {
            log::warn!("warning notification failed: id={}, {e}", warning.id);
        }
        Ok(())
    }
}

/// Spawns the daily sweep loop. The first tick fires immediately after
/// `every`, then on every further interval; a failed run is logged and the
/// loop keeps going.
pub fn spawn_daily_sweep(
    service: Arc<AttendanceWarningService>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately; skip it so
        // the sweep runs at the cadence, not at startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = service.run_all_checks().await {
                log::error!("attendance warning sweep failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::LogNotifier;
    use db::models::attendance_statistics;
    use db::test_utils::{enroll, seed_course, seed_offering, seed_student, seed_teacher, setup_test_db};

    struct Fixture {
        db: DatabaseConnection,
        service: AttendanceWarningService,
        offering_id: i64,
        teacher_id: i64,
        student_id: i64,
    }

    async fn fixture() -> Fixture {
        let db = setup_test_db().await;
        let config = Arc::new(AttendanceConfigService::new(db.clone()));
        config.initialize_defaults().await.unwrap();
        let service =
            AttendanceWarningService::new(db.clone(), config, Arc::new(LogNotifier));

        let teacher = seed_teacher(&db, "T001", "Dr. Nkosi", 1, 1).await;
        let course = seed_course(&db, "COS212", "Data Structures").await;
        let offering = seed_offering(&db, course.id, teacher.id, 1).await;
        let student = seed_student(&db, "u00000001", "Student 1", 100).await;
        enroll(&db, offering.id, student.id).await;

        Fixture {
            db,
            service,
            offering_id: offering.id,
            teacher_id: teacher.id,
            student_id: student.id,
        }
    }

    async fn seed_stats(
        db: &DatabaseConnection,
        student_id: i64,
        offering_id: i64,
        total: i32,
        present: i32,
        late: i32,
        absent: i32,
    ) {
        let rate = if total > 0 {
            Some((present + late) as f64 * 100.0 / total as f64)
        } else {
            None
        };
        attendance_statistics::ActiveModel {
            student_id: Set(student_id),
            offering_id: Set(offering_id),
            total_classes: Set(total),
            present_count: Set(present),
            late_count: Set(late),
            early_leave_count: Set(0),
            leave_count: Set(0),
            absent_count: Set(absent),
            attendance_rate: Set(rate),
            last_updated: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("seed statistics");
    }

    #[tokio::test]
    async fn few_absences_raise_nothing() {
        let f = fixture().await;
        seed_stats(&f.db, f.student_id, f.offering_id, 10, 8, 0, 2).await;

        f.service
            .check_student_absence(f.student_id, f.offering_id)
            .await
            .unwrap();
        assert!(f.service.warnings(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn absolute_count_raises_moderate_warning() {
        let f = fixture().await;
        // 3 of 10 classes: under the one-third share, at the count threshold.
        seed_stats(&f.db, f.student_id, f.offering_id, 10, 7, 0, 3).await;

        f.service
            .check_student_absence(f.student_id, f.offering_id)
            .await
            .unwrap();
        let warnings = f.service.warnings(None).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, 2);
        assert_eq!(warnings[0].warning_type, WarningType::StudentAbsent);
        assert_eq!(warnings[0].status, WarningStatus::Pending);
    }

    #[tokio::test]
    async fn absence_share_raises_severe_warning() {
        let f = fixture().await;
        // 4 of 12 classes: exactly one third.
        seed_stats(&f.db, f.student_id, f.offering_id, 12, 8, 0, 4).await;

        f.service
            .check_student_absence(f.student_id, f.offering_id)
            .await
            .unwrap();
        let warnings = f.service.warnings(None).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, 3);
        assert!(warnings[0].message.contains("33%"));
    }

    #[tokio::test]
    async fn warning_creation_is_idempotent() {
        let f = fixture().await;
        seed_stats(&f.db, f.student_id, f.offering_id, 10, 7, 0, 3).await;

        f.service
            .check_student_absence(f.student_id, f.offering_id)
            .await
            .unwrap();
        f.service
            .check_student_absence(f.student_id, f.offering_id)
            .await
            .unwrap();
        assert_eq!(f.service.warnings(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn low_course_average_raises_warning() {
        let f = fixture().await;
        let second = seed_student(&f.db, "u00000002", "Student 2", 101).await;
        enroll(&f.db, f.offering_id, second.id).await;
        // Rates 60% and 50%: average 55%, below the 70% floor.
        seed_stats(&f.db, f.student_id, f.offering_id, 10, 6, 0, 4).await;
        seed_stats(&f.db, second.id, f.offering_id, 10, 5, 0, 5).await;

        f.service
            .check_course_attendance_rate(f.offering_id)
            .await
            .unwrap();
        let warnings = f.service.warnings(Some(WarningStatus::Pending)).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].warning_type, WarningType::CourseLowRate);
        assert_eq!(warnings[0].level, 2);
    }

    #[tokio::test]
    async fn idle_teacher_is_flagged() {
        let f = fixture().await;
        f.service.check_teacher_activity(f.teacher_id).await.unwrap();

        let warnings = f.service.warnings(None).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].warning_type, WarningType::TeacherNoAttendance);
        assert_eq!(warnings[0].level, 1);
        assert_eq!(warnings[0].offering_id, None);
    }

    #[tokio::test]
    async fn active_teacher_is_not_flagged() {
        let f = fixture().await;
        let now = Utc::now();
        attendance_session::ActiveModel {
            offering_id: Set(f.offering_id),
            teacher_id: Set(f.teacher_id),
            session_date: Set(now.date_naive()),
            start_time: Set(now.time()),
            method: Set(db::models::attendance_session::AttendanceMethod::Manual),
            status: Set(SessionStatus::Submitted),
            total_students: Set(1),
            present_count: Set(1),
            late_count: Set(0),
            early_leave_count: Set(0),
            leave_count: Set(0),
            absent_count: Set(0),
            attendance_rate: Set(Some(100.0)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&f.db)
        .await
        .unwrap();

        f.service.check_teacher_activity(f.teacher_id).await.unwrap();
        assert!(f.service.warnings(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overfull_session_raises_anomaly() {
        let f = fixture().await;
        let now = Utc::now();
        let session = attendance_session::ActiveModel {
            offering_id: Set(f.offering_id),
            teacher_id: Set(f.teacher_id),
            session_date: Set(now.date_naive()),
            start_time: Set(now.time()),
            method: Set(db::models::attendance_session::AttendanceMethod::Manual),
            status: Set(SessionStatus::Submitted),
            total_students: Set(1),
            present_count: Set(1),
            late_count: Set(0),
            early_leave_count: Set(0),
            leave_count: Set(0),
            absent_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&f.db)
        .await
        .unwrap();

        let second = seed_student(&f.db, "u00000002", "Student 2", 101).await;
        for student_id in [f.student_id, second.id] {
            db::models::attendance_detail::ActiveModel {
                session_id: Set(session.id),
                student_id: Set(student_id),
                status: Set(AttendanceStatus::Present),
                is_makeup: Set(false),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(&f.db)
            .await
            .unwrap();
        }

        f.service.check_session_anomaly(session.id).await.unwrap();
        let warnings = f.service.warnings(None).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].warning_type, WarningType::SessionAnomaly);
        assert_eq!(warnings[0].level, 3);
    }

    #[tokio::test]
    async fn resolution_is_pending_only_and_terminal() {
        let f = fixture().await;
        seed_stats(&f.db, f.student_id, f.offering_id, 10, 7, 0, 3).await;
        f.service
            .check_student_absence(f.student_id, f.offering_id)
            .await
            .unwrap();
        let warning_id = f.service.warnings(None).await.unwrap()[0].id;

        let admin = AuthContext::admin(7);
        f.service
            .handle(&admin, warning_id, "spoke to the student")
            .await
            .unwrap();

        let warning = Warning::find_by_id(&f.db, warning_id).await.unwrap().unwrap();
        assert_eq!(warning.status, WarningStatus::Handled);
        assert_eq!(warning.handled_by, Some(7));
        assert!(warning.handled_at.is_some());

        let again = f.service.ignore(&admin, warning_id).await;
        assert!(matches!(again, Err(AttendanceError::InvalidOperation(_))));

        let missing = f.service.handle(&admin, 9999, "?").await;
        assert!(matches!(missing, Err(AttendanceError::WarningNotFound(9999))));
    }

    #[tokio::test]
    async fn sweep_visits_every_target() {
        let f = fixture().await;
        seed_stats(&f.db, f.student_id, f.offering_id, 12, 8, 0, 4).await;

        let outcome = f.service.run_all_checks().await.unwrap();
        assert_eq!(outcome.failed, 0);
        // One aggregate, one offering, one teacher, no submitted sessions.
        assert_eq!(outcome.checked, 3);

        let warnings = f.service.warnings(None).await.unwrap();
        // Severe absence + low course rate (33.33%) + idle teacher.
        assert_eq!(warnings.len(), 3);
    }
}
