use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{Display, EnumString};

/// Student leave requests, consumed read-only: only approved requests whose
/// date range covers the roll-call date matter here.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "leave_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub student_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: LeaveStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, PartialEq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "leave_status")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LeaveStatus {
    #[sea_orm(string_value = "pending")]
    Pending,

    #[sea_orm(string_value = "approved")]
    Approved,

    #[sea_orm(string_value = "rejected")]
    Rejected,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Of the given students, those with an approved leave covering `date`.
    pub async fn approved_student_ids_on<C>(
        db: &C,
        student_ids: &[i64],
        date: NaiveDate,
    ) -> Result<HashSet<i64>, DbErr>
    where
        C: ConnectionTrait,
    {
        if student_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = Entity::find()
            .filter(Column::StudentId.is_in(student_ids.iter().copied()))
            .filter(Column::Status.eq(LeaveStatus::Approved))
            .filter(Column::StartDate.lte(date))
            .filter(Column::EndDate.gte(date))
            .all(db)
            .await?;

        Ok(rows.into_iter().map(|r| r.student_id).collect())
    }
}
