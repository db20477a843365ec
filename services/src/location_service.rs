use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel, Set};
use validator::Validate;

use db::models::attendance_detail;
use db::models::attendance_session::{self, AttendanceMethod};

use crate::config_service::{keys, AttendanceConfigService};
use crate::context::AuthContext;
use crate::error::{AttendanceError, Result};
use crate::geo;

/// Geofence definition submitted by the teacher.
#[derive(Debug, Clone, Validate)]
pub struct GeofenceInput {
    #[validate(range(min = -90.0, max = 90.0, message = "latitude must be within [-90, 90]"))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "longitude must be within [-180, 180]"))]
    pub longitude: f64,
    /// Defaults to the configured radius when not given.
    #[validate(range(min = 1, message = "radius must be positive"))]
    pub radius_m: Option<i32>,
}

/// Geolocation check-in: a circular geofence per session, great-circle
/// distance validation, and the shared time-window classification.
pub struct LocationAttendanceService {
    db: DatabaseConnection,
    config: Arc<AttendanceConfigService>,
}

impl LocationAttendanceService {
    pub fn new(db: DatabaseConnection, config: Arc<AttendanceConfigService>) -> Self {
        Self { db, config }
    }

    /// Sets the allowed check-in area for an open location session.
    /// Teacher-only.
    pub async fn set_geofence(
        &self,
        ctx: &AuthContext,
        session_id: i64,
        input: GeofenceInput,
    ) -> Result<attendance_session::Model> {
        let teacher_id = ctx.require_teacher()?;
        input.validate()?;

        let session = attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(session_id))?;
        if session.teacher_id != teacher_id {
            return Err(AttendanceError::PermissionDenied(
                "only the session's teacher may set the geofence".into(),
            ));
        }
        if !session.is_in_progress() {
            return Err(AttendanceError::NotInProgress);
        }
        if session.method != AttendanceMethod::Location {
            return Err(AttendanceError::InvalidOperation(
                "this session does not use location check-in".into(),
            ));
        }

        let radius = match input.radius_m {
            Some(radius) => radius,
            None => self.default_radius().await?,
        };

        let mut active = session.into_active_model();
        active.latitude = Set(Some(input.latitude));
        active.longitude = Set(Some(input.longitude));
        active.geofence_radius = Set(Some(radius));
        active.updated_at = Set(Utc::now());
        let session = active.update(&self.db).await?;

        log::info!(
            "geofence set: session={}, center=({}, {}), radius={}m",
            session.id,
            input.latitude,
            input.longitude,
            radius
        );
        Ok(session)
    }

    /// Student check-in with submitted coordinates: must fall inside the
    /// geofence, then the instant is classified and recorded together with
    /// the coordinates.
    pub async fn check_in(
        &self,
        ctx: &AuthContext,
        session_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<attendance_detail::Model> {
        let student_id = ctx.require_student()?;
        geo::validate_coordinates(latitude, longitude)?;

        let session = attendance_session::Model::find_by_id(&self.db, session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(session_id))?;
        if !session.is_in_progress() {
            return Err(AttendanceError::NotInProgress);
        }
        if session.method != AttendanceMethod::Location {
            return Err(AttendanceError::InvalidOperation(
                "this session does not use location check-in".into(),
            ));
        }
        let (Some(center_lat), Some(center_lon)) = (session.latitude, session.longitude) else {
            return Err(AttendanceError::InvalidOperation(
                "the geofence has not been set yet".into(),
            ));
        };

        let detail = attendance_detail::Model::find_by_session_and_student(
            &self.db, session_id, student_id,
        )
        .await?
        .ok_or(AttendanceError::StudentNotInCourse(student_id))?;
        if detail.checkin_time.is_some() {
            return Err(AttendanceError::DuplicateCheckin);
        }

        let radius = match session.geofence_radius {
            Some(radius) => radius,
            None => self.default_radius().await?,
        };
        let distance = geo::haversine_distance_m(center_lat, center_lon, latitude, longitude);
        if distance > radius as f64 {
            return Err(AttendanceError::LocationOutOfRange {
                distance_m: distance,
                radius_m: radius,
            });
        }

        let windows = self.config.checkin_windows().await?;
        let now = Utc::now();
        let status = windows.classify(now.time(), session.start_time)?;

        if !attendance_detail::Model::mark_checkin(
            &self.db,
            detail.id,
            status,
            now,
            Some((latitude, longitude)),
        )
        .await?
        {
            return Err(AttendanceError::DuplicateCheckin);
        }

        let detail = attendance_detail::Model::find_by_id(&self.db, detail.id)
            .await?
            .ok_or(AttendanceError::DetailNotFound(detail.id))?;
        log::info!(
            "location check-in recorded: session={session_id}, student={student_id}, status={}, distance={distance:.0}m",
            detail.status
        );
        Ok(detail)
    }

    /// Distance in meters between two validated coordinate pairs.
    pub fn distance_between(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Result<f64> {
        geo::validate_coordinates(lat1, lon1)?;
        geo::validate_coordinates(lat2, lon2)?;
        Ok(geo::haversine_distance_m(lat1, lon1, lat2, lon2))
    }

    async fn default_radius(&self) -> Result<i32> {
        Ok(self.config.int(keys::GEOFENCE_RADIUS, 100).await? as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::LogNotifier;
    use crate::session_service::AttendanceSessionService;
    use crate::statistics_service::AttendanceStatisticsService;
    use db::models::attendance_detail::AttendanceStatus;
    use db::test_utils::{enroll, seed_course, seed_offering, seed_student, seed_teacher, setup_test_db};
    use std::time::Duration;

    struct Fixture {
        service: LocationAttendanceService,
        session_id: i64,
        teacher_ctx: AuthContext,
        student_ctx: AuthContext,
    }

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
        let session = sessions
            .start(&teacher_ctx, offering.id, AttendanceMethod::Location)
            .await
            .unwrap();

        Fixture {
            service: LocationAttendanceService::new(db, config),
            session_id: session.id,
            teacher_ctx,
            student_ctx: AuthContext::student(100, student.id),
        }
    }

    #[tokio::test]
    async fn check_in_requires_a_geofence() {
        let f = fixture().await;
        let result = f
            .service
            .check_in(&f.student_ctx, f.session_id, -25.7545, 28.2314)
            .await;
        assert!(matches!(result, Err(AttendanceError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn check_in_inside_the_fence_records_coordinates() {
        let f = fixture().await;
        f.service
            .set_geofence(
                &f.teacher_ctx,
                f.session_id,
                GeofenceInput {
                    latitude: -25.7545,
                    longitude: 28.2314,
                    radius_m: Some(150),
                },
            )
            .await
            .unwrap();

        // ~30 m north of the center.
        let detail = f
            .service
            .check_in(&f.student_ctx, f.session_id, -25.75423, 28.2314)
            .await
            .unwrap();
        assert_eq!(detail.status, AttendanceStatus::Present);
        assert!(detail.checkin_time.is_some());
        assert_eq!(detail.checkin_latitude, Some(-25.75423));
        assert_eq!(detail.checkin_longitude, Some(28.2314));
    }

    #[tokio::test]
    async fn check_in_outside_the_fence_is_rejected() {
        let f = fixture().await;
        f.service
            .set_geofence(
                &f.teacher_ctx,
                f.session_id,
                GeofenceInput {
                    latitude: -25.7545,
                    longitude: 28.2314,
                    radius_m: Some(100),
                },
            )
            .await
            .unwrap();

        // ~1.1 km away.
        let result = f
            .service
            .check_in(&f.student_ctx, f.session_id, -25.7645, 28.2314)
            .await;
        match result {
            Err(AttendanceError::LocationOutOfRange { distance_m, radius_m }) => {
                assert_eq!(radius_m, 100);
                assert!(distance_m > 1000.0);
            }
            other => panic!("expected LocationOutOfRange, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn geofence_rejects_invalid_coordinates() {
        let f = fixture().await;
        let result = f
            .service
            .set_geofence(
                &f.teacher_ctx,
                f.session_id,
                GeofenceInput {
                    latitude: 95.0,
                    longitude: 28.2314,
                    radius_m: None,
                },
            )
            .await;
        assert!(matches!(result, Err(AttendanceError::Validation(_))));
    }

    #[tokio::test]
    async fn duplicate_location_check_in_is_rejected() {
        let f = fixture().await;
        f.service
            .set_geofence(
                &f.teacher_ctx,
                f.session_id,
                GeofenceInput {
                    latitude: -25.7545,
                    longitude: 28.2314,
                    radius_m: None,
                },
            )
            .await
            .unwrap();

        f.service
            .check_in(&f.student_ctx, f.session_id, -25.7545, 28.2314)
            .await
            .unwrap();
        let second = f
            .service
            .check_in(&f.student_ctx, f.session_id, -25.7545, 28.2314)
            .await;
        assert!(matches!(second, Err(AttendanceError::DuplicateCheckin)));
    }
}
