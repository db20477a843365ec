use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{PaginatorTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A flagged attendance anomaly awaiting teacher/admin review. Never deleted;
/// the only transitions are pending -> handled and pending -> ignored.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_warnings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub warning_type: WarningType,
    pub target_type: TargetType,
    pub target_id: i64,
    pub target_name: String,
    pub offering_id: Option<i64>,
    /// 1 = notice, 2 = moderate, 3 = severe.
    pub level: i32,
    pub message: String,
    /// Serialized supporting data (JSON).
    pub data: Option<String>,
    pub status: WarningStatus,
    pub handled_by: Option<i64>,
    pub handled_at: Option<DateTime<Utc>>,
    pub handle_comment: Option<String>,
    pub created_at: DateTime<Utc>,
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
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "warning_type")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum WarningType {
    #[sea_orm(string_value = "student_absent")]
    StudentAbsent,

    #[sea_orm(string_value = "course_low_rate")]
    CourseLowRate,

    #[sea_orm(string_value = "teacher_no_attendance")]
    TeacherNoAttendance,

    #[sea_orm(string_value = "session_anomaly")]
    SessionAnomaly,
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
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "warning_target_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TargetType {
    #[sea_orm(string_value = "student")]
    Student,

    #[sea_orm(string_value = "course")]
    Course,

    #[sea_orm(string_value = "teacher")]
    Teacher,

    #[sea_orm(string_value = "session")]
    Session,
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
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "warning_status")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WarningStatus {
    #[sea_orm(string_value = "pending")]
    Pending,

    #[sea_orm(string_value = "handled")]
    Handled,

    #[sea_orm(string_value = "ignored")]
    Ignored,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::course_offering::Entity",
        from = "Column::OfferingId",
        to = "super::course_offering::Column::Id"
    )]
    Offering,
}

impl Related<super::course_offering::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Offering.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn find_by_id<C>(db: &C, id: i64) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find_by_id(id).one(db).await
    }

    /// Idempotence probe: is there already a pending warning for the same
    /// (type, target, offering) tuple?
    pub async fn exists_pending<C>(
        db: &C,
        warning_type: WarningType,
        target_type: TargetType,
        target_id: i64,
        offering_id: Option<i64>,
    ) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut query = Entity::find()
            .filter(Column::WarningType.eq(warning_type))
            .filter(Column::TargetType.eq(target_type))
            .filter(Column::TargetId.eq(target_id))
            .filter(Column::Status.eq(WarningStatus::Pending));

        query = match offering_id {
            Some(id) => query.filter(Column::OfferingId.eq(id)),
            None => query.filter(Column::OfferingId.is_null()),
        };

        Ok(query.count(db).await? > 0)
    }

    pub async fn find_by_status<C>(
        db: &C,
        status: Option<WarningStatus>,
    ) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut query = Entity::find().order_by_desc(Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }
        query.all(db).await
    }
}
