use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{PaginatorTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A student-submitted correction request (makeup or appeal) against exactly
/// one attendance detail. At most one pending-or-approved request may exist
/// per detail; approval and rejection are terminal.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub request_type: RequestType,
    pub student_id: i64,
    pub detail_id: i64,
    pub reason: String,
    pub attachment_url: Option<String>,
    pub status: RequestStatus,
    pub approver_id: Option<i64>,
    pub approver_name: Option<String>,
    pub approval_comment: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
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
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "request_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RequestType {
    #[sea_orm(string_value = "makeup")]
    Makeup,

    #[sea_orm(string_value = "appeal")]
    Appeal,
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
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "request_status")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RequestStatus {
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
    #[sea_orm(
        belongs_to = "super::attendance_detail::Entity",
        from = "Column::DetailId",
        to = "super::attendance_detail::Column::Id"
    )]
    Detail,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl Related<super::attendance_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Detail.def()
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

    /// Uniqueness probe: a detail may carry at most one outstanding
    /// (pending or approved) request.
    pub async fn exists_outstanding_for_detail<C>(db: &C, detail_id: i64) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let count = Entity::find()
            .filter(Column::DetailId.eq(detail_id))
            .filter(Column::Status.is_in([RequestStatus::Pending, RequestStatus::Approved]))
            .count(db)
            .await?;
        Ok(count > 0)
    }

    pub async fn find_by_student<C>(
        db: &C,
        student_id: i64,
        status: Option<RequestStatus>,
    ) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut query = Entity::find()
            .filter(Column::StudentId.eq(student_id))
            .order_by_desc(Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }
        query.all(db).await
    }

    pub async fn find_by_details<C>(
        db: &C,
        detail_ids: &[i64],
        status: Option<RequestStatus>,
    ) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        if detail_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = Entity::find()
            .filter(Column::DetailId.is_in(detail_ids.iter().copied()))
            .order_by_desc(Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }
        query.all(db).await
    }
}
