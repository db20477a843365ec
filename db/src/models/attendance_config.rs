use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::PaginatorTrait;

/// Runtime-tunable attendance thresholds. System-protected entries are
/// seeded at bootstrap and cannot be deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_configs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub config_key: String,
    pub config_value: String,
    /// Type tag for display purposes: INTEGER, DOUBLE or BOOLEAN.
    pub config_type: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        panic!("No RelationDef implemented")
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn find_by_key<C>(db: &C, key: &str) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::ConfigKey.eq(key))
            .one(db)
            .await
    }

    pub async fn exists_by_key<C>(db: &C, key: &str) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let count = Entity::find()
            .filter(Column::ConfigKey.eq(key))
            .count(db)
            .await?;
        Ok(count > 0)
    }

    pub async fn find_all<C>(db: &C) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find().all(db).await
    }
}
