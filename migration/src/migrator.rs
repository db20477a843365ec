use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202601150001_create_academic_base::Migration),
            Box::new(migrations::m202601150002_create_attendance_sessions::Migration),
            Box::new(migrations::m202601150003_create_attendance_tracking::Migration),
            Box::new(migrations::m202601150004_create_attendance_configs::Migration),
        ]
    }
}
