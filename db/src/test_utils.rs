use chrono::{NaiveDate, Utc};
use migration::Migrator;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;

use crate::models::course_enrollment::EnrollmentStatus;
use crate::models::leave_request::LeaveStatus;
use crate::models::{course, course_enrollment, course_offering, leave_request, student, teacher};

pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory db");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}

pub async fn seed_teacher(
    db: &DatabaseConnection,
    teacher_no: &str,
    name: &str,
    user_id: i64,
    department_id: i64,
) -> teacher::Model {
    teacher::ActiveModel {
        teacher_no: Set(teacher_no.to_owned()),
        name: Set(name.to_owned()),
        user_id: Set(user_id),
        department_id: Set(department_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed teacher")
}

pub async fn seed_student(
    db: &DatabaseConnection,
    student_no: &str,
    name: &str,
    user_id: i64,
) -> student::Model {
    student::ActiveModel {
        student_no: Set(student_no.to_owned()),
        name: Set(name.to_owned()),
        user_id: Set(user_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed student")
}

pub async fn seed_course(db: &DatabaseConnection, code: &str, name: &str) -> course::Model {
    course::ActiveModel {
        code: Set(code.to_owned()),
        name: Set(name.to_owned()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed course")
}

pub async fn seed_offering(
    db: &DatabaseConnection,
    course_id: i64,
    teacher_id: i64,
    semester_id: i64,
) -> course_offering::Model {
    course_offering::ActiveModel {
        course_id: Set(course_id),
        teacher_id: Set(teacher_id),
        semester_id: Set(semester_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed offering")
}

pub async fn enroll(
    db: &DatabaseConnection,
    offering_id: i64,
    student_id: i64,
) -> course_enrollment::Model {
    course_enrollment::ActiveModel {
        offering_id: Set(offering_id),
        student_id: Set(student_id),
        status: Set(EnrollmentStatus::Selected),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed enrollment")
}

pub async fn seed_approved_leave(
    db: &DatabaseConnection,
    student_id: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> leave_request::Model {
    leave_request::ActiveModel {
        student_id: Set(student_id),
        start_date: Set(start_date),
        end_date: Set(end_date),
        status: Set(LeaveStatus::Approved),
        reason: Set(Some("family matter".to_owned())),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed leave request")
}
