use std::collections::HashMap;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, Set,
};
use serde::Serialize;

use db::models::attendance_detail::{self, AttendanceStatus};
use db::models::attendance_session::{self, SessionStatus};
use db::models::attendance_statistics::{self, Model as Statistics};
use db::models::{course, course_offering, teacher};

use crate::cache::TtlCache;
use crate::error::Result;

/// Aggregate across all students of one offering.
#[derive(Debug, Clone, Serialize)]
pub struct CourseAttendanceSummary {
    pub offering_id: i64,
    pub total_students: i64,
    pub total_classes: i32,
    pub avg_attendance_rate: f64,
    pub present_rate: f64,
    pub late_rate: f64,
    pub absent_rate: f64,
    pub total_present: i64,
    pub total_late: i64,
    pub total_early_leave: i64,
    pub total_leave: i64,
    pub total_absent: i64,
}

/// One student's running totals in one offering.
#[derive(Debug, Clone, Serialize)]
pub struct StudentAttendanceSummary {
    pub student_id: i64,
    pub offering_id: i64,
    pub total_classes: i32,
    pub present_count: i32,
    pub late_count: i32,
    pub early_leave_count: i32,
    pub leave_count: i32,
    pub absent_count: i32,
    pub attendance_rate: Option<f64>,
}

/// One row per offering a student attended during a semester.
#[derive(Debug, Clone, Serialize)]
pub struct SemesterCourseSummary {
    pub offering_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub total_classes: i32,
    pub present_count: i32,
    pub late_count: i32,
    pub absent_count: i32,
    pub attendance_rate: Option<f64>,
}

/// Submitted-session totals across a department's teachers in a date range.
#[derive(Debug, Clone, Serialize)]
pub struct DepartmentAttendanceSummary {
    pub department_id: i64,
    pub total_sessions: usize,
    pub total_students: i64,
    pub total_present: i64,
    pub total_late: i64,
    pub total_absent: i64,
    pub avg_attendance_rate: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Submitted-session totals of one teacher, optionally date-ranged.
#[derive(Debug, Clone, Serialize)]
pub struct TeacherAttendanceSummary {
    pub teacher_id: i64,
    pub total_sessions: usize,
    pub total_students: i64,
    pub avg_attendance_rate: f64,
}

/// One submitted session on the offering's attendance-rate timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub session_date: NaiveDate,
    pub start_time: NaiveTime,
    pub attendance_rate: Option<f64>,
    pub present_count: i32,
    pub total_students: i32,
}

/// Maintains the per-(student, offering) aggregates and answers the read
/// queries over them. Course summaries are cached with a short TTL keyed by
/// offering id; writers evict the key they touch.
pub struct AttendanceStatisticsService {
    db: DatabaseConnection,
    course_cache: TtlCache<i64, CourseAttendanceSummary>,
}

impl AttendanceStatisticsService {
    pub fn new(db: DatabaseConnection, cache_ttl: Duration) -> Self {
        Self {
            db,
            course_cache: TtlCache::new(cache_ttl),
        }
    }

    /// Folds a submitted session into the aggregates: one class held, one
    /// status counter per detail. Runs on the caller's connection so submit
    /// can keep it inside its transaction.
    pub async fn on_session_submitted<C>(
        &self,
        db: &C,
        offering_id: i64,
        details: &[attendance_detail::Model],
    ) -> Result<()>
    where
        C: ConnectionTrait,
    {
        for detail in details {
            let existing =
                Statistics::find_by_student_and_offering(db, detail.student_id, offering_id)
                    .await?;

            match existing {
                Some(mut stats) => {
                    stats.total_classes += 1;
                    stats.apply(detail.status, 1);
                    stats.recompute_rate();

                    let mut active = stats.clone().into_active_model();
                    active.total_classes = Set(stats.total_classes);
                    active.present_count = Set(stats.present_count);
                    active.late_count = Set(stats.late_count);
                    active.early_leave_count = Set(stats.early_leave_count);
                    active.leave_count = Set(stats.leave_count);
                    active.absent_count = Set(stats.absent_count);
                    active.attendance_rate = Set(stats.attendance_rate);
                    active.last_updated = Set(Utc::now());
                    active.update(db).await?;
                }
                None => {
                    let mut stats = Statistics::empty(detail.student_id, offering_id);
                    stats.total_classes = 1;
                    stats.apply(detail.status, 1);
                    stats.recompute_rate();

                    attendance_statistics::ActiveModel {
                        student_id: Set(stats.student_id),
                        offering_id: Set(stats.offering_id),
                        total_classes: Set(stats.total_classes),
                        present_count: Set(stats.present_count),
                        late_count: Set(stats.late_count),
                        early_leave_count: Set(stats.early_leave_count),
                        leave_count: Set(stats.leave_count),
                        absent_count: Set(stats.absent_count),
                        attendance_rate: Set(stats.attendance_rate),
                        last_updated: Set(Utc::now()),
                        ..Default::default()
                    }
                    .insert(db)
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Net-zero reconciliation after an approved correction: the old status
    /// counter goes down (floored at 0), the new one goes up, the total class
    /// count stays put.
    pub async fn on_correction_applied<C>(
        &self,
        db: &C,
        student_id: i64,
        offering_id: i64,
        old_status: AttendanceStatus,
        new_status: AttendanceStatus,
    ) -> Result<()>
    where
        C: ConnectionTrait,
    {
        let Some(mut stats) =
            Statistics::find_by_student_and_offering(db, student_id, offering_id).await?
        else {
            // No aggregate yet means no submitted session touched this pair.
            return Ok(());
        };

        stats.apply(old_status, -1);
        stats.apply(new_status, 1);
        stats.recompute_rate();

        let mut active = stats.clone().into_active_model();
        active.present_count = Set(stats.present_count);
        active.late_count = Set(stats.late_count);
        active.early_leave_count = Set(stats.early_leave_count);
        active.leave_count = Set(stats.leave_count);
        active.absent_count = Set(stats.absent_count);
        active.attendance_rate = Set(stats.attendance_rate);
        active.last_updated = Set(Utc::now());
        active.update(db).await?;

        Ok(())
    }

    /// Drops the cached course summary after a write touched the offering.
    pub async fn invalidate_course(&self, offering_id: i64) {
        self.course_cache.invalidate(&offering_id).await;
    }

    pub async fn course_summary(&self, offering_id: i64) -> Result<CourseAttendanceSummary> {
        if let Some(cached) = self.course_cache.get(&offering_id).await {
            log::debug!("course summary served from cache: offering={offering_id}");
            return Ok(cached);
        }

        let stats = Statistics::find_by_offering(&self.db, offering_id).await?;

        let total_students = stats.len() as i64;
        let total_classes = stats.iter().map(|s| s.total_classes).max().unwrap_or(0);
        let total_present: i64 = stats.iter().map(|s| s.present_count as i64).sum();
        let total_late: i64 = stats.iter().map(|s| s.late_count as i64).sum();
        let total_early_leave: i64 = stats.iter().map(|s| s.early_leave_count as i64).sum();
        let total_leave: i64 = stats.iter().map(|s| s.leave_count as i64).sum();
        let total_absent: i64 = stats.iter().map(|s| s.absent_count as i64).sum();

        let avg_attendance_rate = if stats.is_empty() {
            0.0
        } else {
            stats
                .iter()
                .map(|s| s.attendance_rate.unwrap_or(0.0))
                .sum::<f64>()
                / stats.len() as f64
        };

        let total_records = total_students * total_classes as i64;
        let share = |count: i64| {
            if total_records > 0 {
                round2(count as f64 * 100.0 / total_records as f64)
            } else {
                0.0
            }
        };

        let summary = CourseAttendanceSummary {
            offering_id,
            total_students,
            total_classes,
            avg_attendance_rate: round2(avg_attendance_rate),
            present_rate: share(total_present),
            late_rate: share(total_late),
            absent_rate: share(total_absent),
            total_present,
            total_late,
            total_early_leave,
            total_leave,
            total_absent,
        };

        self.course_cache.insert(offering_id, summary.clone()).await;
        Ok(summary)
    }

    pub async fn student_summary(
        &self,
        student_id: i64,
        offering_id: i64,
    ) -> Result<StudentAttendanceSummary> {
        let stats = Statistics::find_by_student_and_offering(&self.db, student_id, offering_id)
            .await?
            .unwrap_or_else(|| Statistics::empty(student_id, offering_id));

        Ok(StudentAttendanceSummary {
            student_id,
            offering_id,
            total_classes: stats.total_classes,
            present_count: stats.present_count,
            late_count: stats.late_count,
            early_leave_count: stats.early_leave_count,
            leave_count: stats.leave_count,
            absent_count: stats.absent_count,
            attendance_rate: stats.attendance_rate,
        })
    }

    /// One row per offering the student has aggregates for in the semester,
    /// with course names resolved eagerly.
    pub async fn student_semester_summary(
        &self,
        student_id: i64,
        semester_id: i64,
    ) -> Result<Vec<SemesterCourseSummary>> {
        let stats = Statistics::find_by_student(&self.db, student_id).await?;
        if stats.is_empty() {
            return Ok(Vec::new());
        }

        let offering_ids: Vec<i64> = stats.iter().map(|s| s.offering_id).collect();
        let offerings: HashMap<i64, course_offering::Model> =
            course_offering::Entity::find()
                .filter(course_offering::Column::Id.is_in(offering_ids))
                .filter(course_offering::Column::SemesterId.eq(semester_id))
                .all(&self.db)
                .await?
                .into_iter()
                .map(|o| (o.id, o))
                .collect();

        let course_ids: Vec<i64> = offerings.values().map(|o| o.course_id).collect();
        let courses: HashMap<i64, course::Model> = course::Entity::find()
            .filter(course::Column::Id.is_in(course_ids))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let mut rows = Vec::new();
        for stat in stats {
            let Some(offering) = offerings.get(&stat.offering_id) else {
                continue; // different semester
            };
            let Some(course) = courses.get(&offering.course_id) else {
                continue;
            };
            rows.push(SemesterCourseSummary {
                offering_id: stat.offering_id,
                course_code: course.code.clone(),
                course_name: course.name.clone(),
                total_classes: stat.total_classes,
                present_count: stat.present_count,
                late_count: stat.late_count,
                absent_count: stat.absent_count,
                attendance_rate: stat.attendance_rate,
            });
        }
        Ok(rows)
    }

    /// Sums submitted sessions held by the department's teachers inside the
    /// inclusive date range.
    pub async fn department_summary(
        &self,
        department_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<DepartmentAttendanceSummary> {
        let teachers = teacher::Model::find_by_department(&self.db, department_id).await?;

        let mut sessions = Vec::new();
        for teacher in &teachers {
            sessions.extend(
                attendance_session::Model::find_submitted_by_teacher_in_range(
                    &self.db, teacher.id, start_date, end_date,
                )
                .await?,
            );
        }

        Ok(DepartmentAttendanceSummary {
            department_id,
            total_sessions: sessions.len(),
            total_students: sessions.iter().map(|s| s.total_students as i64).sum(),
            total_present: sessions.iter().map(|s| s.present_count as i64).sum(),
            total_late: sessions.iter().map(|s| s.late_count as i64).sum(),
            total_absent: sessions.iter().map(|s| s.absent_count as i64).sum(),
            avg_attendance_rate: round2(average_rate(&sessions)),
            start_date,
            end_date,
        })
    }

    pub async fn teacher_summary(
        &self,
        teacher_id: i64,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<TeacherAttendanceSummary> {
        let sessions = match range {
            Some((from, to)) => {
                attendance_session::Model::find_submitted_by_teacher_in_range(
                    &self.db, teacher_id, from, to,
                )
                .await?
            }
            None => attendance_session::Model::find_by_teacher(&self.db, teacher_id)
                .await?
                .into_iter()
                .filter(|s| s.status == SessionStatus::Submitted)
                .collect(),
        };

        Ok(TeacherAttendanceSummary {
            teacher_id,
            total_sessions: sessions.len(),
            total_students: sessions.iter().map(|s| s.total_students as i64).sum(),
            avg_attendance_rate: round2(average_rate(&sessions)),
        })
    }

    /// Attendance-rate trend across an offering's submitted sessions, in
    /// chronological order.
    pub async fn offering_trend(&self, offering_id: i64) -> Result<Vec<TrendPoint>> {
        let sessions = attendance_session::Model::find_by_offering(&self.db, offering_id).await?;

        Ok(sessions
            .into_iter()
            .filter(|s| s.status == SessionStatus::Submitted)
            .map(|s| TrendPoint {
                session_date: s.session_date,
                start_time: s.start_time,
                attendance_rate: s.attendance_rate,
                present_count: s.present_count,
                total_students: s.total_students,
            })
            .collect())
    }
}

fn average_rate(sessions: &[attendance_session::Model]) -> f64 {
    let rates: Vec<f64> = sessions.iter().filter_map(|s| s.attendance_rate).collect();
    if rates.is_empty() {
        0.0
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::test_utils::{seed_course, seed_offering, seed_student, seed_teacher, setup_test_db};
    use sea_orm::DatabaseConnection;

    async fn seed_aggregate(
        db: &DatabaseConnection,
        student_id: i64,
        offering_id: i64,
        total: i32,
        present: i32,
        absent: i32,
    ) {
        let mut stats = Statistics::empty(student_id, offering_id);
        stats.total_classes = total;
        stats.present_count = present;
        stats.absent_count = absent;
        stats.recompute_rate();

        attendance_statistics::ActiveModel {
            student_id: Set(student_id),
            offering_id: Set(offering_id),
            total_classes: Set(stats.total_classes),
            present_count: Set(stats.present_count),
            late_count: Set(0),
            early_leave_count: Set(0),
            leave_count: Set(0),
            absent_count: Set(stats.absent_count),
            attendance_rate: Set(stats.attendance_rate),
            last_updated: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("seed aggregate");
    }

    #[tokio::test]
    async fn course_summary_aggregates_and_caches() {
        let db = setup_test_db().await;
        let teacher = seed_teacher(&db, "T001", "Dr. Nkosi", 1, 1).await;
        let course = seed_course(&db, "COS212", "Data Structures").await;
        let offering = seed_offering(&db, course.id, teacher.id, 1).await;
        let a = seed_student(&db, "u00000001", "Student 1", 100).await;
        let b = seed_student(&db, "u00000002", "Student 2", 101).await;

        seed_aggregate(&db, a.id, offering.id, 10, 9, 1).await;
        seed_aggregate(&db, b.id, offering.id, 10, 7, 3).await;

        let service =
            AttendanceStatisticsService::new(db.clone(), Duration::from_secs(60));
        let summary = service.course_summary(offering.id).await.unwrap();
        assert_eq!(summary.total_students, 2);
        assert_eq!(summary.total_classes, 10);
        assert_eq!(summary.total_present, 16);
        assert_eq!(summary.total_absent, 4);
        assert_eq!(summary.avg_attendance_rate, 80.0);
        assert_eq!(summary.present_rate, 80.0);
        assert_eq!(summary.absent_rate, 20.0);

        // A new aggregate is invisible until the cached entry is evicted.
        let c = seed_student(&db, "u00000003", "Student 3", 102).await;
        seed_aggregate(&db, c.id, offering.id, 10, 10, 0).await;
        assert_eq!(
            service.course_summary(offering.id).await.unwrap().total_students,
            2
        );
        service.invalidate_course(offering.id).await;
        assert_eq!(
            service.course_summary(offering.id).await.unwrap().total_students,
            3
        );
    }

    #[tokio::test]
    async fn semester_summary_filters_by_semester() {
        let db = setup_test_db().await;
        let teacher = seed_teacher(&db, "T001", "Dr. Nkosi", 1, 1).await;
        let course = seed_course(&db, "COS212", "Data Structures").await;
        let this_semester = seed_offering(&db, course.id, teacher.id, 1).await;
        let other_semester = seed_offering(&db, course.id, teacher.id, 2).await;
        let student = seed_student(&db, "u00000001", "Student 1", 100).await;

        seed_aggregate(&db, student.id, this_semester.id, 10, 9, 1).await;
        seed_aggregate(&db, student.id, other_semester.id, 5, 5, 0).await;

        let service =
            AttendanceStatisticsService::new(db.clone(), Duration::from_secs(60));
        let rows = service
            .student_semester_summary(student.id, 1)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].offering_id, this_semester.id);
        assert_eq!(rows[0].course_code, "COS212");
        assert_eq!(rows[0].attendance_rate, Some(90.0));
    }

    #[tokio::test]
    async fn correction_without_aggregate_is_a_no_op() {
        let db = setup_test_db().await;
        let service = AttendanceStatisticsService::new(db.clone(), Duration::from_secs(60));
        service
            .on_correction_applied(&db, 1, 1, AttendanceStatus::Absent, AttendanceStatus::Present)
            .await
            .unwrap();
        let summary = service.student_summary(1, 1).await.unwrap();
        assert_eq!(summary.total_classes, 0);
        assert_eq!(summary.present_count, 0);
    }
}
