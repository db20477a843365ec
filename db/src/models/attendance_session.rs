use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{PaginatorTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One roll-call event for one class meeting of one course offering.
///
/// Mutable only while in progress; counts and rate are frozen at submit and
/// the row is never reopened once submitted or cancelled.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub offering_id: i64,
    pub teacher_id: i64,
    pub session_date: NaiveDate,
    pub start_time: NaiveTime,
    pub method: AttendanceMethod,
    pub status: SessionStatus,
    pub total_students: i32,
    pub present_count: i32,
    pub late_count: i32,
    pub early_leave_count: i32,
    pub leave_count: i32,
    pub absent_count: i32,
    pub attendance_rate: Option<f64>,
    /// Geofence center, set only for location sessions.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geofence_radius: Option<i32>,
    /// Live QR token, mirrored in the token registry cache.
    pub qr_token: Option<String>,
    pub qr_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "attendance_method")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AttendanceMethod {
    #[sea_orm(string_value = "manual")]
    Manual,

    #[sea_orm(string_value = "qrcode")]
    Qrcode,

    #[sea_orm(string_value = "location")]
    Location,
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "session_status")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SessionStatus {
    #[sea_orm(string_value = "in_progress")]
    InProgress,

    #[sea_orm(string_value = "submitted")]
    Submitted,

    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::course_offering::Entity",
        from = "Column::OfferingId",
        to = "super::course_offering::Column::Id"
    )]
    Offering,
    #[sea_orm(
        belongs_to = "super::teacher::Entity",
        from = "Column::TeacherId",
        to = "super::teacher::Column::Id"
    )]
    Teacher,
    #[sea_orm(has_many = "super::attendance_detail::Entity")]
    Details,
}

impl Related<super::course_offering::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Offering.def()
    }
}

impl Related<super::teacher::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Teacher.def()
    }
}

impl Related<super::attendance_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Details.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    #[inline]
    pub fn is_in_progress(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    pub async fn find_by_id<C>(db: &C, id: i64) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find_by_id(id).one(db).await
    }

    pub async fn find_by_teacher<C>(db: &C, teacher_id: i64) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::TeacherId.eq(teacher_id))
            .order_by_desc(Column::SessionDate)
            .order_by_desc(Column::StartTime)
            .all(db)
            .await
    }

    pub async fn find_by_offering<C>(db: &C, offering_id: i64) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::OfferingId.eq(offering_id))
            .order_by_asc(Column::SessionDate)
            .order_by_asc(Column::StartTime)
            .all(db)
            .await
    }

    /// Submitted sessions of one teacher with a session date inside the
    /// inclusive range.
    pub async fn find_submitted_by_teacher_in_range<C>(
        db: &C,
        teacher_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::TeacherId.eq(teacher_id))
            .filter(Column::Status.eq(SessionStatus::Submitted))
            .filter(Column::SessionDate.gte(from))
            .filter(Column::SessionDate.lte(to))
            .all(db)
            .await
    }

    pub async fn count_submitted_by_teacher_in_range<C>(
        db: &C,
        teacher_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u64, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::TeacherId.eq(teacher_id))
            .filter(Column::Status.eq(SessionStatus::Submitted))
            .filter(Column::SessionDate.gte(from))
            .filter(Column::SessionDate.lte(to))
            .count(db)
            .await
    }

    pub async fn find_all_submitted<C>(db: &C) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::Status.eq(SessionStatus::Submitted))
            .all(db)
            .await
    }
}
