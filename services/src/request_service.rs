use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, IntoActiveModel, ModelTrait, Set, TransactionTrait,
};
use validator::Validate;

use db::models::attendance_detail::{self, AttendanceStatus};
use db::models::attendance_request::{self, Model as Request, RequestStatus, RequestType};
use db::models::{attendance_session, teacher};

use crate::context::AuthContext;
use crate::error::{AttendanceError, Result};
use crate::notification::AttendanceNotifier;
use crate::statistics_service::AttendanceStatisticsService;

/// Body of a makeup or appeal submission.
#[derive(Debug, Clone, Validate)]
pub struct CorrectionInput {
    #[validate(length(min = 1, message = "a reason is required"))]
    pub reason: String,
    pub attachment_url: Option<String>,
}

/// Post-hoc correction workflow: students file makeup/appeal requests
/// against one detail, the owning teacher decides them, and approvals
/// reconcile the aggregates.
pub struct AttendanceRequestService {
    db: DatabaseConnection,
    statistics: Arc<AttendanceStatisticsService>,
    notifier: Arc<dyn AttendanceNotifier>,
}

impl AttendanceRequestService {
    pub fn new(
        db: DatabaseConnection,
        statistics: Arc<AttendanceStatisticsService>,
        notifier: Arc<dyn AttendanceNotifier>,
    ) -> Self {
        Self {
            db,
            statistics,
            notifier,
        }
    }

    /// Request to retroactively mark a missed check-in as attended.
    pub async fn submit_makeup(
        &self,
        ctx: &AuthContext,
        detail_id: i64,
        input: CorrectionInput,
    ) -> Result<Request> {
        self.submit(ctx, detail_id, RequestType::Makeup, input).await
    }

    /// Request disputing an already-recorded status.
    pub async fn submit_appeal(
        &self,
        ctx: &AuthContext,
        detail_id: i64,
        input: CorrectionInput,
    ) -> Result<Request> {
        self.submit(ctx, detail_id, RequestType::Appeal, input).await
    }

    async fn submit(
        &self,
        ctx: &AuthContext,
        detail_id: i64,
        request_type: RequestType,
        input: CorrectionInput,
    ) -> Result<Request> {
        let student_id = ctx.require_student()?;
        input.validate()?;

        let detail = attendance_detail::Model::find_by_id(&self.db, detail_id)
            .await?
            .ok_or(AttendanceError::DetailNotFound(detail_id))?;
        if detail.student_id != student_id {
            return Err(AttendanceError::Forbidden(
                "requests may only target the student's own attendance record".into(),
            ));
        }

        if Request::exists_outstanding_for_detail(&self.db, detail_id).await? {
            return Err(AttendanceError::DataAlreadyExists(
                "an outstanding request already exists for this attendance record".into(),
            ));
        }

        let now = Utc::now();
        let request = attendance_request::ActiveModel {
            request_type: Set(request_type),
            student_id: Set(student_id),
            detail_id: Set(detail_id),
            reason: Set(input.reason),
            attachment_url: Set(input.attachment_url),
            status: Set(RequestStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        log::info!(
            "correction request submitted: id={}, type={}, detail={}",
            request.id,
            request_type,
            detail_id
        );
        self.notify_teacher(&request, detail.session_id).await;
        Ok(request)
    }

    /// Approves a pending request and reconciles the detail plus its
    /// aggregate in one transaction. Teacher-only, on own course.
    pub async fn approve(
        &self,
        ctx: &AuthContext,
        request_id: i64,
        comment: Option<&str>,
    ) -> Result<Request> {
        let (request, detail, session, teacher_id) =
            self.decidable_request(ctx, request_id).await?;

        let approver_name = teacher::Model::find_by_id(&self.db, teacher_id)
            .await?
            .map(|t| t.name);
        let now = Utc::now();
        let old_status = detail.status;

        let txn = self.db.begin().await?;

        let mut active = request.into_active_model();
        active.status = Set(RequestStatus::Approved);
        active.approver_id = Set(Some(teacher_id));
        active.approver_name = Set(approver_name);
        active.approval_comment = Set(comment.map(str::to_owned));
        active.approved_at = Set(Some(now));
        active.updated_at = Set(now);
        let request = active.update(&txn).await?;

        // Makeup marks the missed check-in as attended now; an accepted
        // appeal likewise clears the penalty to PRESENT.
        let mut detail_active = detail.into_active_model();
        detail_active.status = Set(AttendanceStatus::Present);
        if request.request_type == RequestType::Makeup {
            detail_active.is_makeup = Set(true);
            detail_active.checkin_time = Set(Some(now));
        }
        detail_active.modified_by = Set(Some(ctx.user_id));
        detail_active.modify_reason = Set(Some(match comment {
            Some(comment) => format!("request approved: {comment}"),
            None => "request approved".to_owned(),
        }));
        detail_active.updated_at = Set(now);
        let detail = detail_active.update(&txn).await?;

        self.statistics
            .on_correction_applied(
                &txn,
                detail.student_id,
                session.offering_id,
                old_status,
                AttendanceStatus::Present,
            )
            .await?;

        txn.commit().await?;
        self.statistics.invalidate_course(session.offering_id).await;

        log::info!(
            "correction request approved: id={}, type={}",
            request.id,
            request.request_type
        );
        self.notify_student(&request).await;
        Ok(request)
    }

    /// Rejects a pending request. No statistics effect.
    pub async fn reject(
        &self,
        ctx: &AuthContext,
        request_id: i64,
        reason: &str,
    ) -> Result<Request> {
        let (request, _detail, _session, teacher_id) =
            self.decidable_request(ctx, request_id).await?;

        let approver_name = teacher::Model::find_by_id(&self.db, teacher_id)
            .await?
            .map(|t| t.name);
        let now = Utc::now();

        let mut active = request.into_active_model();
        active.status = Set(RequestStatus::Rejected);
        active.approver_id = Set(Some(teacher_id));
        active.approver_name = Set(approver_name);
        active.approval_comment = Set(Some(reason.to_owned()));
        active.approved_at = Set(Some(now));
        active.updated_at = Set(now);
        let request = active.update(&self.db).await?;

        log::info!("correction request rejected: id={}", request.id);
        self.notify_student(&request).await;
        Ok(request)
    }

    /// Withdraws a pending request. Student-only, own requests only.
    pub async fn cancel(&self, ctx: &AuthContext, request_id: i64) -> Result<()> {
        let student_id = ctx.require_student()?;

        let request = Request::find_by_id(&self.db, request_id)
            .await?
            .ok_or(AttendanceError::RequestNotFound(request_id))?;
        if request.student_id != student_id {
            return Err(AttendanceError::Forbidden(
                "only the requesting student may withdraw a request".into(),
            ));
        }
        if request.status != RequestStatus::Pending {
            return Err(AttendanceError::InvalidOperation(
                "only pending requests can be withdrawn".into(),
            ));
        }

        request.delete(&self.db).await?;
        log::info!("correction request withdrawn: id={request_id}");
        Ok(())
    }

    pub async fn student_requests(
        &self,
        student_id: i64,
        status: Option<RequestStatus>,
    ) -> Result<Vec<Request>> {
        Ok(Request::find_by_student(&self.db, student_id, status).await?)
    }

    /// Requests targeting details of the teacher's sessions, optionally
    /// filtered by status.
    pub async fn teacher_requests(
        &self,
        teacher_id: i64,
        status: Option<RequestStatus>,
    ) -> Result<Vec<Request>> {
        let sessions = attendance_session::Model::find_by_teacher(&self.db, teacher_id).await?;
        let session_ids: Vec<i64> = sessions.iter().map(|s| s.id).collect();
        let details = attendance_detail::Model::find_by_sessions(&self.db, &session_ids).await?;
        let detail_ids: Vec<i64> = details.iter().map(|d| d.id).collect();
        Ok(Request::find_by_details(&self.db, &detail_ids, status).await?)
    }

    pub async fn pending_for_teacher(&self, teacher_id: i64) -> Result<Vec<Request>> {
        self.teacher_requests(teacher_id, Some(RequestStatus::Pending))
            .await
    }

    /// Loads a pending request and proves the caller owns the course behind
    /// its target detail.
    async fn decidable_request(
        &self,
        ctx: &AuthContext,
        request_id: i64,
    ) -> Result<(
        Request,
        attendance_detail::Model,
        attendance_session::Model,
        i64,
    )> {
        let teacher_id = ctx.require_teacher()?;

        let request = Request::find_by_id(&self.db, request_id)
            .await?
            .ok_or(AttendanceError::RequestNotFound(request_id))?;
        let detail = attendance_detail::Model::find_by_id(&self.db, request.detail_id)
            .await?
            .ok_or(AttendanceError::DetailNotFound(request.detail_id))?;
        let session = attendance_session::Model::find_by_id(&self.db, detail.session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(detail.session_id))?;

        if session.teacher_id != teacher_id {
            return Err(AttendanceError::PermissionDenied(
                "only the course's teacher may decide this request".into(),
            ));
        }
        if request.status != RequestStatus::Pending {
            return Err(AttendanceError::RequestAlreadyProcessed);
        }

        Ok((request, detail, session, teacher_id))
    }

    async fn notify_teacher(&self, request: &Request, session_id: i64) {
        let teacher_user = async {
            let session = attendance_session::Model::find_by_id(&self.db, session_id).await?;
            match session {
                Some(session) => teacher::Model::find_by_id(&self.db, session.teacher_id).await,
                None => Ok(None),
            }
        };
        match teacher_user.await {
            Ok(Some(teacher)) => {
                if let Err(e) = self.notifier.request_submitted(request, teacher.user_id).await {
                    log::warn!("request notification failed: id={}, {e}", request.id);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("request notification lookup failed: id={}, {e}", request.id),
        }
    }

    async fn notify_student(&self, request: &Request) {
        if let Err(e) = self.notifier.approval_result(request).await {
            log::warn!("approval result notification failed: id={}, {e}", request.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_service::AttendanceConfigService;
    use crate::notification::LogNotifier;
    use crate::session_service::AttendanceSessionService;
    use db::models::attendance_session::AttendanceMethod;
    use db::test_utils::{enroll, seed_course, seed_offering, seed_student, seed_teacher, setup_test_db};
    use std::time::Duration;

    struct Fixture {
        db: DatabaseConnection,
        service: AttendanceRequestService,
        statistics: Arc<AttendanceStatisticsService>,
        teacher_ctx: AuthContext,
        student_ctx: AuthContext,
        offering_id: i64,
        student_id: i64,
        detail_id: i64,
    }

    /// Seeds one submitted session with one absent student and returns the
    /// pieces correction tests need.
    async fn fixture() -> Fixture {
        let db = setup_test_db().await;
        let config = Arc::new(AttendanceConfigService::new(db.clone()));
        config.initialize_defaults().await.unwrap();
        let statistics = Arc::new(AttendanceStatisticsService::new(
            db.clone(),
            Duration::from_secs(60),
        ));
        let sessions = AttendanceSessionService::new(
            db.clone(),
            statistics.clone(),
            config,
            Arc::new(LogNotifier),
        );

        let teacher = seed_teacher(&db, "T001", "Dr. Nkosi", 1, 1).await;
        let course = seed_course(&db, "COS212", "Data Structures").await;
        let offering = seed_offering(&db, course.id, teacher.id, 1).await;
        let student = seed_student(&db, "u00000001", "Student 1", 100).await;
        enroll(&db, offering.id, student.id).await;

        let teacher_ctx = AuthContext::teacher(1, teacher.id);
        let session = sessions
            .start(&teacher_ctx, offering.id, AttendanceMethod::Manual)
            .await
            .unwrap();
        sessions.submit(&teacher_ctx, session.id).await.unwrap();

        let detail = attendance_detail::Model::find_by_session_and_student(
            &db, session.id, student.id,
        )
        .await
        .unwrap()
        .unwrap();

        Fixture {
            service: AttendanceRequestService::new(
                db.clone(),
                statistics.clone(),
                Arc::new(LogNotifier),
            ),
            db,
            statistics,
            teacher_ctx,
            student_ctx: AuthContext::student(100, student.id),
            offering_id: offering.id,
            student_id: student.id,
            detail_id: detail.id,
        }
    }

    fn input(reason: &str) -> CorrectionInput {
        CorrectionInput {
            reason: reason.to_owned(),
            attachment_url: None,
        }
    }

    #[tokio::test]
    async fn submission_requires_a_reason_and_ownership() {
        let f = fixture().await;

        let empty = f
            .service
            .submit_makeup(&f.student_ctx, f.detail_id, input(""))
            .await;
        assert!(matches!(empty, Err(AttendanceError::Validation(_))));

        let intruder = AuthContext::student(101, f.student_id + 1);
        let foreign = f
            .service
            .submit_makeup(&intruder, f.detail_id, input("was ill"))
            .await;
        assert!(matches!(foreign, Err(AttendanceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn one_outstanding_request_per_detail() {
        let f = fixture().await;
        f.service
            .submit_makeup(&f.student_ctx, f.detail_id, input("was ill"))
            .await
            .unwrap();

        let second = f
            .service
            .submit_appeal(&f.student_ctx, f.detail_id, input("still ill"))
            .await;
        assert!(matches!(second, Err(AttendanceError::DataAlreadyExists(_))));
    }

    #[tokio::test]
    async fn approved_makeup_reconciles_the_aggregate() {
        let f = fixture().await;
        let before = f
            .statistics
            .student_summary(f.student_id, f.offering_id)
            .await
            .unwrap();
        assert_eq!(before.absent_count, 1);
        assert_eq!(before.present_count, 0);

        let request = f
            .service
            .submit_makeup(&f.student_ctx, f.detail_id, input("was ill"))
            .await
            .unwrap();
        let approved = f
            .service
            .approve(&f.teacher_ctx, request.id, Some("doctor's note seen"))
            .await
            .unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.approver_name.as_deref(), Some("Dr. Nkosi"));

        let detail = attendance_detail::Model::find_by_id(&f.db, f.detail_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(detail.status, AttendanceStatus::Present);
        assert!(detail.is_makeup);
        assert!(detail.checkin_time.is_some());

        let after = f
            .statistics
            .student_summary(f.student_id, f.offering_id)
            .await
            .unwrap();
        assert_eq!(after.absent_count, 0);
        assert_eq!(after.present_count, 1);
        assert_eq!(after.total_classes, before.total_classes);
        assert_eq!(after.attendance_rate, Some(100.0));
    }

    #[tokio::test]
    async fn decisions_are_terminal() {
        let f = fixture().await;
        let request = f
            .service
            .submit_makeup(&f.student_ctx, f.detail_id, input("was ill"))
            .await
            .unwrap();
        f.service
            .approve(&f.teacher_ctx, request.id, None)
            .await
            .unwrap();

        let again = f.service.approve(&f.teacher_ctx, request.id, None).await;
        assert!(matches!(again, Err(AttendanceError::RequestAlreadyProcessed)));

        let reject = f.service.reject(&f.teacher_ctx, request.id, "no").await;
        assert!(matches!(reject, Err(AttendanceError::RequestAlreadyProcessed)));
    }

    #[tokio::test]
    async fn rejection_leaves_statistics_alone() {
        let f = fixture().await;
        let request = f
            .service
            .submit_appeal(&f.student_ctx, f.detail_id, input("marker error"))
            .await
            .unwrap();
        f.service
            .reject(&f.teacher_ctx, request.id, "no evidence")
            .await
            .unwrap();

        let summary = f
            .statistics
            .student_summary(f.student_id, f.offering_id)
            .await
            .unwrap();
        assert_eq!(summary.absent_count, 1);
        assert_eq!(summary.present_count, 0);
    }

    #[tokio::test]
    async fn only_the_owning_teacher_decides() {
        let f = fixture().await;
        let request = f
            .service
            .submit_makeup(&f.student_ctx, f.detail_id, input("was ill"))
            .await
            .unwrap();

        let other = seed_teacher(&f.db, "T002", "Dr. Patel", 2, 1).await;
        let result = f
            .service
            .approve(&AuthContext::teacher(2, other.id), request.id, None)
            .await;
        assert!(matches!(result, Err(AttendanceError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn withdrawal_only_while_pending() {
        let f = fixture().await;
        let request = f
            .service
            .submit_makeup(&f.student_ctx, f.detail_id, input("was ill"))
            .await
            .unwrap();
        f.service.cancel(&f.student_ctx, request.id).await.unwrap();
        assert!(f
            .service
            .student_requests(f.student_id, None)
            .await
            .unwrap()
            .is_empty());

        let request = f
            .service
            .submit_makeup(&f.student_ctx, f.detail_id, input("was ill"))
            .await
            .unwrap();
        f.service
            .approve(&f.teacher_ctx, request.id, None)
            .await
            .unwrap();
        let late_cancel = f.service.cancel(&f.student_ctx, request.id).await;
        assert!(matches!(late_cancel, Err(AttendanceError::InvalidOperation(_))));
    }
}
