use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "course_enrollments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub offering_id: i64,
    pub student_id: i64,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, PartialEq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "enrollment_status")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EnrollmentStatus {
    #[sea_orm(string_value = "selected")]
    Selected,

    #[sea_orm(string_value = "dropped")]
    Dropped,
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
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,
}

impl Related<super::course_offering::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Offering.def()
    }
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Ids of the currently enrolled, non-dropped students of an offering.
    pub async fn active_student_ids<C>(db: &C, offering_id: i64) -> Result<Vec<i64>, DbErr>
    where
        C: ConnectionTrait,
    {
        let rows = Entity::find()
            .filter(Column::OfferingId.eq(offering_id))
            .filter(Column::Status.eq(EnrollmentStatus::Selected))
            .all(db)
            .await?;
        Ok(rows.into_iter().map(|e| e.student_id).collect())
    }
}
