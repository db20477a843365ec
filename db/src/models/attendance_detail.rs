use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::PaginatorTrait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One student's attendance record within a session. Seeded in bulk when the
/// session starts; only the current state is kept, corrections overwrite it
/// together with the modifier and a reason.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_details")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub status: AttendanceStatus,
    pub checkin_time: Option<DateTime<Utc>>,
    pub checkin_latitude: Option<f64>,
    pub checkin_longitude: Option<f64>,
    pub remark: Option<String>,
    pub is_makeup: bool,
    pub modified_by: Option<i64>,
    pub modify_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "attendance_status")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AttendanceStatus {
    #[sea_orm(string_value = "present")]
    Present,

    #[sea_orm(string_value = "late")]
    Late,

    #[sea_orm(string_value = "early_leave")]
    EarlyLeave,

    #[sea_orm(string_value = "leave")]
    Leave,

    #[sea_orm(string_value = "absent")]
    Absent,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_session::Entity",
        from = "Column::SessionId",
        to = "super::attendance_session::Column::Id"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,
}

impl Related<super::attendance_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
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

    pub async fn find_by_session<C>(db: &C, session_id: i64) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .all(db)
            .await
    }

    pub async fn find_by_session_and_student<C>(
        db: &C,
        session_id: i64,
        student_id: i64,
    ) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::StudentId.eq(student_id))
            .one(db)
            .await
    }

    pub async fn find_by_sessions<C>(db: &C, session_ids: &[i64]) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        if session_ids.is_empty() {
            return Ok(Vec::new());
        }
        Entity::find()
            .filter(Column::SessionId.is_in(session_ids.iter().copied()))
            .all(db)
            .await
    }

    /// Records a check-in if and only if none has been recorded yet.
    ///
    /// The `checkin_time IS NULL` guard makes the read-modify-write a single
    /// conditional update, so two racing check-ins for the same student
    /// resolve to exactly one winner. Returns false when the guard failed.
    pub async fn mark_checkin<C>(
        db: &C,
        detail_id: i64,
        status: AttendanceStatus,
        checkin_time: DateTime<Utc>,
        coordinates: Option<(f64, f64)>,
    ) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status))
            .col_expr(Column::CheckinTime, Expr::value(checkin_time))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(detail_id))
            .filter(Column::CheckinTime.is_null());

        if let Some((lat, lon)) = coordinates {
            update = update
                .col_expr(Column::CheckinLatitude, Expr::value(lat))
                .col_expr(Column::CheckinLongitude, Expr::value(lon));
        }

        let result = update.exec(db).await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn count_by_session_and_status<C>(
        db: &C,
        session_id: i64,
        status: AttendanceStatus,
    ) -> Result<u64, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::Status.eq(status))
            .count(db)
            .await
    }
}
