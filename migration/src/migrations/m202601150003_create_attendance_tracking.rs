use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202601150003_create_attendance_tracking"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // attendance_statistics
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("attendance_statistics"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("student_id"))
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("offering_id"))
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("total_classes"))
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Alias::new("present_count"))
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Alias::new("late_count"))
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Alias::new("early_leave_count"))
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Alias::new("leave_count"))
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Alias::new("absent_count"))
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Alias::new("attendance_rate"))
                            .double()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("last_updated"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_att_stats_student")
                            .from(Alias::new("attendance_statistics"), Alias::new("student_id"))
                            .to(Alias::new("students"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_att_stats_offering")
                            .from(Alias::new("attendance_statistics"), Alias::new("offering_id"))
                            .to(Alias::new("course_offerings"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .index(
                        Index::create()
                            .col(Alias::new("student_id"))
                            .col(Alias::new("offering_id"))
                            .unique(),
                    )
                    .to_owned(),
            )
            .await?;

        // attendance_warnings
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("attendance_warnings"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("warning_type"))
                            .string_len(30)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("target_type"))
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("target_id"))
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("target_name")).string().not_null())
                    .col(
                        ColumnDef::new(Alias::new("offering_id"))
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(Alias::new("level")).integer().not_null())
                    .col(ColumnDef::new(Alias::new("message")).string().not_null())
                    .col(ColumnDef::new(Alias::new("data")).text().null())
                    .col(
                        ColumnDef::new(Alias::new("status"))
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Alias::new("handled_by")).big_integer().null())
                    .col(ColumnDef::new(Alias::new("handled_at")).timestamp().null())
                    .col(ColumnDef::new(Alias::new("handle_comment")).string().null())
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_att_warning_pending_probe")
                    .table(Alias::new("attendance_warnings"))
                    .col(Alias::new("warning_type"))
                    .col(Alias::new("target_type"))
                    .col(Alias::new("target_id"))
                    .col(Alias::new("status"))
                    .to_owned(),
            )
            .await?;

        // attendance_requests
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("attendance_requests"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("request_type"))
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("student_id"))
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("detail_id"))
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("reason")).string().not_null())
                    .col(ColumnDef::new(Alias::new("attachment_url")).string().null())
                    .col(
                        ColumnDef::new(Alias::new("status"))
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Alias::new("approver_id")).big_integer().null())
                    .col(ColumnDef::new(Alias::new("approver_name")).string().null())
                    .col(
                        ColumnDef::new(Alias::new("approval_comment"))
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(Alias::new("approved_at")).timestamp().null())
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .col(
                        ColumnDef::new(Alias::new("updated_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_att_request_student")
                            .from(Alias::new("attendance_requests"), Alias::new("student_id"))
                            .to(Alias::new("students"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_att_request_detail")
                            .from(Alias::new("attendance_requests"), Alias::new("detail_id"))
                            .to(Alias::new("attendance_details"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_att_request_detail_status")
                    .table(Alias::new("attendance_requests"))
                    .col(Alias::new("detail_id"))
                    .col(Alias::new("status"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [
            "attendance_requests",
            "attendance_warnings",
            "attendance_statistics",
        ] {
            manager
                .drop_table(Table::drop().table(Alias::new(table)).to_owned())
                .await?;
        }
        Ok(())
    }
}
