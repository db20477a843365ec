use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set, TransactionTrait};

use db::models::attendance_detail::{self, AttendanceStatus};
use db::models::attendance_session::{self, AttendanceMethod, SessionStatus};
use db::models::{course_enrollment, course_offering, leave_request, student};

use crate::config_service::{keys, AttendanceConfigService};
use crate::context::AuthContext;
use crate::error::{AttendanceError, Result};
use crate::notification::AttendanceNotifier;
use crate::statistics_service::AttendanceStatisticsService;

/// Owns the lifecycle of roll-call sessions: start, manual recording,
/// submission (which freezes counts and feeds the aggregates) and
/// cancellation.
pub struct AttendanceSessionService {
    db: DatabaseConnection,
    statistics: Arc<AttendanceStatisticsService>,
    config: Arc<AttendanceConfigService>,
    notifier: Arc<dyn AttendanceNotifier>,
}

impl AttendanceSessionService {
    pub fn new(
        db: DatabaseConnection,
        statistics: Arc<AttendanceStatisticsService>,
        config: Arc<AttendanceConfigService>,
        notifier: Arc<dyn AttendanceNotifier>,
    ) -> Self {
        Self {
            db,
            statistics,
            config,
            notifier,
        }
    }

    /// Starts a roll call for one class meeting and seeds one detail per
    /// enrolled student: ABSENT by default, LEAVE when an approved leave
    /// request covers today.
    pub async fn start(
        &self,
        ctx: &AuthContext,
        offering_id: i64,
        method: AttendanceMethod,
    ) -> Result<attendance_session::Model> {
        let teacher_id = ctx.require_teacher()?;

        let offering = course_offering::Model::find_by_id(&self.db, offering_id)
            .await?
            .ok_or(AttendanceError::OfferingNotFound(offering_id))?;
        if offering.teacher_id != teacher_id {
            return Err(AttendanceError::PermissionDenied(
                "only the assigned teacher may run roll call for this offering".into(),
            ));
        }
        self.ensure_method_enabled(method).await?;

        let now = Utc::now();
        let today = now.date_naive();

        let txn = self.db.begin().await?;

        let session = attendance_session::ActiveModel {
            offering_id: Set(offering_id),
            teacher_id: Set(teacher_id),
            session_date: Set(today),
            start_time: Set(now.time()),
            method: Set(method),
            status: Set(SessionStatus::InProgress),
            total_students: Set(0),
            present_count: Set(0),
            late_count: Set(0),
            early_leave_count: Set(0),
            leave_count: Set(0),
            absent_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let student_ids = course_enrollment::Model::active_student_ids(&txn, offering_id).await?;
        let on_leave =
            leave_request::Model::approved_student_ids_on(&txn, &student_ids, today).await?;

        let mut leave_count = 0;
        let details: Vec<attendance_detail::ActiveModel> = student_ids
            .iter()
            .map(|&student_id| {
                let status = if on_leave.contains(&student_id) {
                    leave_count += 1;
                    AttendanceStatus::Leave
                } else {
                    AttendanceStatus::Absent
                };
                attendance_detail::ActiveModel {
                    session_id: Set(session.id),
                    student_id: Set(student_id),
                    status: Set(status),
                    is_makeup: Set(false),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
            })
            .collect();

        if !details.is_empty() {
            attendance_detail::Entity::insert_many(details).exec(&txn).await?;
        }

        let total = student_ids.len() as i32;
        let mut active = session.clone().into_active_model();
        active.total_students = Set(total);
        active.leave_count = Set(leave_count);
        active.absent_count = Set(total - leave_count);
        active.updated_at = Set(Utc::now());
        let session = active.update(&txn).await?;

        txn.commit().await?;

        log::info!(
            "attendance session started: id={}, offering={}, method={}, students={}",
            session.id,
            offering_id,
            method,
            total
        );
        Ok(session)
    }

    /// Marks one student with an explicit status (manual roll call or
    /// teacher override while the session is open).
    pub async fn record_one(
        &self,
        ctx: &AuthContext,
        session_id: i64,
        student_id: i64,
        status: AttendanceStatus,
        remark: Option<&str>,
    ) -> Result<attendance_detail::Model> {
        self.in_progress_session(ctx, session_id).await?;

        let detail =
            attendance_detail::Model::find_by_session_and_student(&self.db, session_id, student_id)
                .await?
                .ok_or(AttendanceError::StudentNotInCourse(student_id))?;

        let mut active = detail.into_active_model();
        active.status = Set(status);
        active.remark = Set(remark.map(str::to_owned));
        active.modified_by = Set(Some(ctx.user_id));
        active.updated_at = Set(Utc::now());
        Ok(active.update(&self.db).await?)
    }

    /// Marks a batch of students with the same status. Students without a
    /// detail row are skipped; returns how many rows were actually updated.
    pub async fn record_batch(
        &self,
        ctx: &AuthContext,
        session_id: i64,
        student_ids: &[i64],
        status: AttendanceStatus,
    ) -> Result<usize> {
        self.in_progress_session(ctx, session_id).await?;

        let details = attendance_detail::Model::find_by_session(&self.db, session_id).await?;
        let by_student: HashMap<i64, attendance_detail::Model> =
            details.into_iter().map(|d| (d.student_id, d)).collect();

        let mut updated = 0;
        for &student_id in student_ids {
            let Some(detail) = by_student.get(&student_id) else {
                continue;
            };
            let mut active = detail.clone().into_active_model();
            active.status = Set(status);
            active.modified_by = Set(Some(ctx.user_id));
            active.updated_at = Set(Utc::now());
            active.update(&self.db).await?;
            updated += 1;
        }

        log::info!(
            "batch roll call recorded: session={}, requested={}, updated={}",
            session_id,
            student_ids.len(),
            updated
        );
        Ok(updated)
    }

    /// Freezes the session: recomputes the per-status counts and the rate,
    /// transitions to SUBMITTED, folds the result into the aggregates (all in
    /// one transaction), then notifies absent and late students.
    pub async fn submit(
        &self,
        ctx: &AuthContext,
        session_id: i64,
    ) -> Result<attendance_session::Model> {
        let teacher_id = ctx.require_teacher()?;
        let session = attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(session_id))?;
        if session.teacher_id != teacher_id {
            return Err(AttendanceError::PermissionDenied(
                "only the session's teacher may submit it".into(),
            ));
        }
        match session.status {
            SessionStatus::Submitted => return Err(AttendanceError::AlreadySubmitted),
            SessionStatus::Cancelled => return Err(AttendanceError::NotInProgress),
            SessionStatus::InProgress => {}
        }

        let txn = self.db.begin().await?;

        let details = attendance_detail::Model::find_by_session(&txn, session_id).await?;
        let count_of = |status: AttendanceStatus| {
            details.iter().filter(|d| d.status == status).count() as i32
        };
        let present = count_of(AttendanceStatus::Present);
        let late = count_of(AttendanceStatus::Late);

        let mut active = session.clone().into_active_model();
        active.present_count = Set(present);
        active.late_count = Set(late);
        active.early_leave_count = Set(count_of(AttendanceStatus::EarlyLeave));
        active.leave_count = Set(count_of(AttendanceStatus::Leave));
        active.absent_count = Set(count_of(AttendanceStatus::Absent));
        if session.total_students > 0 {
            let rate = (present + late) as f64 * 100.0 / session.total_students as f64;
            active.attendance_rate = Set(Some((rate * 100.0).round() / 100.0));
        }
        active.status = Set(SessionStatus::Submitted);
        active.updated_at = Set(Utc::now());
        let session = active.update(&txn).await?;

        self.statistics
            .on_session_submitted(&txn, session.offering_id, &details)
            .await?;

        txn.commit().await?;
        self.statistics.invalidate_course(session.offering_id).await;

        self.notify_absentees(&session, &details).await;

        log::info!(
            "attendance session submitted: id={}, rate={:?}",
            session.id,
            session.attendance_rate
        );
        Ok(session)
    }

    /// Abandons an open session. Terminal; never touches statistics.
    pub async fn cancel(&self, ctx: &AuthContext, session_id: i64) -> Result<()> {
        let teacher_id = ctx.require_teacher()?;
        let session = attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(session_id))?;
        if session.teacher_id != teacher_id {
            return Err(AttendanceError::PermissionDenied(
                "only the session's teacher may cancel it".into(),
            ));
        }
        match session.status {
            SessionStatus::Submitted => return Err(AttendanceError::AlreadySubmitted),
            SessionStatus::Cancelled => return Err(AttendanceError::NotInProgress),
            SessionStatus::InProgress => {}
        }

        let mut active = session.into_active_model();
        active.status = Set(SessionStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await?;

        log::info!("attendance session cancelled: id={session_id}");
        Ok(())
    }

    /// Teacher-side correction of a single detail while the session is still
    /// open. Post-submit corrections go through the request workflow instead.
    pub async fn update_detail_status(
        &self,
        ctx: &AuthContext,
        detail_id: i64,
        status: AttendanceStatus,
        reason: &str,
    ) -> Result<attendance_detail::Model> {
        let teacher_id = ctx.require_teacher()?;

        let detail = attendance_detail::Model::find_by_id(&self.db, detail_id)
            .await?
            .ok_or(AttendanceError::DetailNotFound(detail_id))?;
        let session = attendance_session::Model::find_by_id(&self.db, detail.session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(detail.session_id))?;

        if session.teacher_id != teacher_id {
            return Err(AttendanceError::PermissionDenied(
                "only the session's teacher may correct its details".into(),
            ));
        }
        match session.status {
            SessionStatus::Submitted => return Err(AttendanceError::AlreadySubmitted),
            SessionStatus::Cancelled => return Err(AttendanceError::NotInProgress),
            SessionStatus::InProgress => {}
        }

        let mut active = detail.into_active_model();
        active.status = Set(status);
        active.modified_by = Set(Some(ctx.user_id));
        active.modify_reason = Set(Some(reason.to_owned()));
        active.updated_at = Set(Utc::now());
        Ok(active.update(&self.db).await?)
    }

    pub async fn session_with_details(
        &self,
        session_id: i64,
    ) -> Result<(attendance_session::Model, Vec<attendance_detail::Model>)> {
        let session = attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(session_id))?;
        let details = attendance_detail::Model::find_by_session(&self.db, session_id).await?;
        Ok((session, details))
    }

    /// A student's detail history across an offering's sessions.
    pub async fn student_history(
        &self,
        student_id: i64,
        offering_id: i64,
    ) -> Result<Vec<attendance_detail::Model>> {
        let sessions =
            attendance_session::Model::find_by_offering(&self.db, offering_id).await?;
        let session_ids: Vec<i64> = sessions.iter().map(|s| s.id).collect();
        let details = attendance_detail::Model::find_by_sessions(&self.db, &session_ids).await?;
        Ok(details
            .into_iter()
            .filter(|d| d.student_id == student_id)
            .collect())
    }

    pub async fn teacher_sessions(
        &self,
        teacher_id: i64,
    ) -> Result<Vec<attendance_session::Model>> {
        Ok(attendance_session::Model::find_by_teacher(&self.db, teacher_id).await?)
    }

    pub async fn offering_sessions(
        &self,
        offering_id: i64,
    ) -> Result<Vec<attendance_session::Model>> {
        Ok(attendance_session::Model::find_by_offering(&self.db, offering_id).await?)
    }

    /// The session, if it is open and owned by the calling teacher.
    async fn in_progress_session(
        &self,
        ctx: &AuthContext,
        session_id: i64,
    ) -> Result<attendance_session::Model> {
        let teacher_id = ctx.require_teacher()?;
        let session = attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(session_id))?;
        if session.teacher_id != teacher_id {
            return Err(AttendanceError::PermissionDenied(
                "only the session's teacher may record attendance".into(),
            ));
        }
        if !session.is_in_progress() {
            return Err(AttendanceError::NotInProgress);
        }
        Ok(session)
    }

    async fn ensure_method_enabled(&self, method: AttendanceMethod) -> Result<()> {
        let (key, label) = match method {
            AttendanceMethod::Manual => (keys::MANUAL_ENABLED, "manual roll call"),
            AttendanceMethod::Qrcode => (keys::QRCODE_ENABLED, "QR check-in"),
            AttendanceMethod::Location => (keys::LOCATION_ENABLED, "location check-in"),
        };
        if self.config.bool(key, true).await? {
            Ok(())
        } else {
            Err(AttendanceError::InvalidOperation(format!(
                "{label} is disabled"
            )))
        }
    }

    async fn notify_absentees(
        &self,
        session: &attendance_session::Model,
        details: &[attendance_detail::Model],
    ) {
        let flagged: Vec<i64> = details
            .iter()
            .filter(|d| matches!(d.status, AttendanceStatus::Absent | AttendanceStatus::Late))
            .map(|d| d.student_id)
            .collect();
        if flagged.is_empty() {
            return;
        }

        let students = match student::Model::find_in(&self.db, &flagged).await {
            Ok(students) => students,
            Err(e) => {
                log::warn!("absence notification lookup failed: session={}, {e}", session.id);
                return;
            }
        };
        let user_ids: Vec<i64> = students.iter().map(|s| s.user_id).collect();

        let course_name =
            match course_offering::Model::find_with_course(&self.db, session.offering_id).await {
                Ok(Some((_, course))) => course.name,
                Ok(None) => format!("offering #{}", session.offering_id),
                Err(e) => {
                    log::warn!("absence notification lookup failed: session={}, {e}", session.id);
                    return;
                }
            };

        if let Err(e) = self
            .notifier
            .absence_notification(&user_ids, &course_name, session.session_date)
            .await
        {
            log::warn!("absence notification failed: session={}, {e}", session.id);
        }
    }
}
