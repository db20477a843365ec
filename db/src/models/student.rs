use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// A student as seen by the attendance engine. Master-data maintenance
/// happens elsewhere; this table is read-only here.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "students")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Unique student number.
    pub student_no: String,
    pub name: String,
    /// Account id used for notifications.
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::course_enrollment::Entity")]
    Enrollments,
    #[sea_orm(has_many = "super::attendance_detail::Entity")]
    AttendanceDetails,
}

impl Related<super::course_enrollment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Enrollments.def()
    }
}

impl Related<super::attendance_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AttendanceDetails.def()
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

    pub async fn find_in<C>(db: &C, ids: &[i64]) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Entity::find()
            .filter(Column::Id.is_in(ids.iter().copied()))
            .all(db)
            .await
    }
}
