use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel, Set};
use uuid::Uuid;

use db::models::attendance_detail;
use db::models::attendance_session::{self, AttendanceMethod};

use crate::cache::TtlCache;
use crate::config_service::{keys, AttendanceConfigService};
use crate::context::AuthContext;
use crate::error::{AttendanceError, Result};

/// Default lifetime of a QR token and of its registry entries.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// QR-code check-in: opaque short-lived tokens held in a TTL registry, one
/// live token per session, with the token and its expiry also persisted on
/// the session row.
pub struct QrCodeAttendanceService {
    db: DatabaseConnection,
    config: Arc<AttendanceConfigService>,
    token_to_session: TtlCache<String, i64>,
    session_to_token: TtlCache<i64, String>,
}

impl QrCodeAttendanceService {
    pub fn new(
        db: DatabaseConnection,
        config: Arc<AttendanceConfigService>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            db,
            config,
            token_to_session: TtlCache::new(token_ttl),
            session_to_token: TtlCache::new(token_ttl),
        }
    }

    /// Issues a fresh token for an open QR session, revoking any live
    /// predecessor. Teacher-only.
    pub async fn generate_token(&self, ctx: &AuthContext, session_id: i64) -> Result<String> {
        let teacher_id = ctx.require_teacher()?;

        let session = attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(session_id))?;
        if session.teacher_id != teacher_id {
            return Err(AttendanceError::PermissionDenied(
                "only the session's teacher may issue QR tokens".into(),
            ));
        }
        if !session.is_in_progress() {
            return Err(AttendanceError::NotInProgress);
        }
        if session.method != AttendanceMethod::Qrcode {
            return Err(AttendanceError::InvalidOperation(
                "this session does not use QR check-in".into(),
            ));
        }

        // One live token per session: revoke the predecessor first.
        if let Some(old_token) = self.session_to_token.get(&session_id).await {
            self.token_to_session.invalidate(&old_token).await;
        }

        let token = Uuid::new_v4().simple().to_string();
        let expire_minutes = self.config.int(keys::QRCODE_EXPIRE_MINUTES, 5).await?;
        let expires_at = Utc::now() + chrono::Duration::minutes(expire_minutes);

        let mut active = session.into_active_model();
        active.qr_token = Set(Some(token.clone()));
        active.qr_expires_at = Set(Some(expires_at));
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await?;

        self.token_to_session.insert(token.clone(), session_id).await;
        self.session_to_token.insert(session_id, token.clone()).await;

        log::info!("QR token issued: session={session_id}, expires_at={expires_at}");
        Ok(token)
    }

    /// A token is valid while it is in the registry, not past its persisted
    /// expiry, and its session is still open.
    pub async fn validate_token(&self, token: &str) -> Result<bool> {
        let Some(session_id) = self.token_to_session.get(&token.to_owned()).await else {
            log::debug!("QR token not in registry");
            return Ok(false);
        };

        let Some(session) = attendance_session::Model::find_by_id(&self.db, session_id).await?
        else {
            self.token_to_session.invalidate(&token.to_owned()).await;
            return Ok(false);
        };

        match session.qr_expires_at {
            Some(expires_at) if expires_at > Utc::now() => {}
            _ => {
                self.token_to_session.invalidate(&token.to_owned()).await;
                log::debug!("QR token expired: session={session_id}");
                return Ok(false);
            }
        }

        if session.qr_token.as_deref() != Some(token) {
            // A newer token superseded this one.
            return Ok(false);
        }

        Ok(session.is_in_progress())
    }

    /// Student check-in against a live token: classifies the instant and
    /// records it, rejecting duplicates.
    pub async fn check_in(
        &self,
        ctx: &AuthContext,
        token: &str,
    ) -> Result<attendance_detail::Model> {
        let student_id = ctx.require_student()?;

        if !self.validate_token(token).await? {
            return Err(AttendanceError::QrCodeExpired);
        }
        let session_id = self
            .token_to_session
            .get(&token.to_owned())
            .await
            .ok_or(AttendanceError::QrCodeExpired)?;
        let session = attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(session_id))?;

        let detail = attendance_detail::Model::find_by_session_and_student(
            &self.db, session_id, student_id,
        )
        .await?
        .ok_or(AttendanceError::StudentNotInCourse(student_id))?;
        if detail.checkin_time.is_some() {
            return Err(AttendanceError::DuplicateCheckin);
        }

        let windows = self.config.checkin_windows().await?;
        let now = Utc::now();
        let status = windows.classify(now.time(), session.start_time)?;

        if !attendance_detail::Model::mark_checkin(&self.db, detail.id, status, now, None).await? {
            return Err(AttendanceError::DuplicateCheckin);
        }

        let detail = attendance_detail::Model::find_by_id(&self.db, detail.id)
            .await?
            .ok_or(AttendanceError::DetailNotFound(detail.id))?;
        log::info!(
            "QR check-in recorded: session={session_id}, student={student_id}, status={}",
            detail.status
        );
        Ok(detail)
    }

    /// Proactively revokes a session's live token, in the registry and on
    /// the session row.
    pub async fn invalidate(&self, session_id: i64) -> Result<()> {
        if let Some(token) = self.session_to_token.get(&session_id).await {
            self.token_to_session.invalidate(&token).await;
            self.session_to_token.invalidate(&session_id).await;
        }

        if let Some(session) = attendance_session::Model::find_by_id(&self.db, session_id).await? {
            if session.qr_token.is_some() {
                let mut active = session.into_active_model();
                active.qr_token = Set(None);
                active.qr_expires_at = Set(None);
                active.updated_at = Set(Utc::now());
                active.update(&self.db).await?;
            }
        }

        log::info!("QR token invalidated: session={session_id}");
        Ok(())
    }

    /// Revoke-and-reissue in one step.
    pub async fn refresh(&self, ctx: &AuthContext, session_id: i64) -> Result<String> {
        self.invalidate(session_id).await?;
        self.generate_token(ctx, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::LogNotifier;
    use crate::session_service::AttendanceSessionService;
    use crate::statistics_service::AttendanceStatisticsService;
    use db::test_utils::{enroll, seed_course, seed_offering, seed_student, seed_teacher, setup_test_db};

    struct Fixture {
        service: QrCodeAttendanceService,
        session_id: i64,
        teacher_ctx: AuthContext,
        student_ctx: AuthContext,
    }

    async fn fixture(method: AttendanceMethod, token_ttl: Duration) -> Fixture {
        let db = setup_test_db().await;
        let config = Arc::new(AttendanceConfigService::new(db.clone()));
        config.initialize_defaults().await.unwrap();
        let statistics = Arc::new(AttendanceStatisticsService::new(
            db.clone(),
            Duration::from_secs(60),
        ));
        let sessions = AttendanceSessionService::new(
            db.clone(),
            statistics,
            config.clone(),
            Arc::new(LogNotifier),
        );

        let teacher = seed_teacher(&db, "T001", "Dr. Nkosi", 1, 1).await;
        let course = seed_course(&db, "COS212", "Data Structures").await;
        let offering = seed_offering(&db, course.id, teacher.id, 1).await;
        let student = seed_student(&db, "u00000001", "Student 1", 100).await;
        enroll(&db, offering.id, student.id).await;

        let teacher_ctx = AuthContext::teacher(1, teacher.id);
        let session = sessions.start(&teacher_ctx, offering.id, method).await.unwrap();

        Fixture {
            service: QrCodeAttendanceService::new(db, config, token_ttl),
            session_id: session.id,
            teacher_ctx,
            student_ctx: AuthContext::student(100, student.id),
        }
    }

    #[tokio::test]
    async fn issued_token_accepts_a_check_in() {
        let f = fixture(AttendanceMethod::Qrcode, DEFAULT_TOKEN_TTL).await;
        let token = f
            .service
            .generate_token(&f.teacher_ctx, f.session_id)
            .await
            .unwrap();
        assert!(f.service.validate_token(&token).await.unwrap());

        let detail = f.service.check_in(&f.student_ctx, &token).await.unwrap();
        assert!(detail.checkin_time.is_some());

        let duplicate = f.service.check_in(&f.student_ctx, &token).await;
        assert!(matches!(duplicate, Err(AttendanceError::DuplicateCheckin)));
    }

    #[tokio::test]
    async fn expired_token_rejects_check_in() {
        let f = fixture(AttendanceMethod::Qrcode, Duration::ZERO).await;
        let token = f
            .service
            .generate_token(&f.teacher_ctx, f.session_id)
            .await
            .unwrap();

        assert!(!f.service.validate_token(&token).await.unwrap());
        let result = f.service.check_in(&f.student_ctx, &token).await;
        assert!(matches!(result, Err(AttendanceError::QrCodeExpired)));
    }

    #[tokio::test]
    async fn reissuing_revokes_the_previous_token() {
        let f = fixture(AttendanceMethod::Qrcode, DEFAULT_TOKEN_TTL).await;
        let first = f
            .service
            .generate_token(&f.teacher_ctx, f.session_id)
            .await
            .unwrap();
        let second = f
            .service
            .generate_token(&f.teacher_ctx, f.session_id)
            .await
            .unwrap();
        assert_ne!(first, second);

        assert!(!f.service.validate_token(&first).await.unwrap());
        assert!(f.service.validate_token(&second).await.unwrap());
    }

    #[tokio::test]
    async fn invalidate_clears_registry_and_session_row() {
        let f = fixture(AttendanceMethod::Qrcode, DEFAULT_TOKEN_TTL).await;
        let token = f
            .service
            .generate_token(&f.teacher_ctx, f.session_id)
            .await
            .unwrap();

        f.service.invalidate(f.session_id).await.unwrap();
        assert!(!f.service.validate_token(&token).await.unwrap());

        let result = f.service.check_in(&f.student_ctx, &token).await;
        assert!(matches!(result, Err(AttendanceError::QrCodeExpired)));
    }

    #[tokio::test]
    async fn token_issue_requires_a_qr_session() {
        let f = fixture(AttendanceMethod::Manual, DEFAULT_TOKEN_TTL).await;
        let result = f.service.generate_token(&f.teacher_ctx, f.session_id).await;
        assert!(matches!(result, Err(AttendanceError::InvalidOperation(_))));
    }
}
