use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

use super::attendance_detail::AttendanceStatus;

/// Rolling per-student-per-offering attendance totals, maintained across all
/// submitted sessions and reconciled when corrections are approved.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_statistics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub student_id: i64,
    pub offering_id: i64,
    pub total_classes: i32,
    pub present_count: i32,
    pub late_count: i32,
    pub early_leave_count: i32,
    pub leave_count: i32,
    pub absent_count: i32,
    pub attendance_rate: Option<f64>,
    pub last_updated: DateTime<Utc>,
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
        belongs_to = "super::course_offering::Entity",
        from = "Column::OfferingId",
        to = "super::course_offering::Column::Id"
    )]
    Offering,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl Related<super::course_offering::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Offering.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Fresh zeroed aggregate for a (student, offering) pair.
    pub fn empty(student_id: i64, offering_id: i64) -> Self {
        Self {
            id: 0,
            student_id,
            offering_id,
            total_classes: 0,
            present_count: 0,
            late_count: 0,
            early_leave_count: 0,
            leave_count: 0,
            absent_count: 0,
            attendance_rate: None,
            last_updated: Utc::now(),
        }
    }

    /// Adjusts the counter belonging to `status` by `delta`, flooring at 0.
    /// One mapping serves both the increment and the decrement path.
    pub fn apply(&mut self, status: AttendanceStatus, delta: i32) {
        let slot = match status {
            AttendanceStatus::Present => &mut self.present_count,
            AttendanceStatus::Late => &mut self.late_count,
            AttendanceStatus::EarlyLeave => &mut self.early_leave_count,
            AttendanceStatus::Leave => &mut self.leave_count,
            AttendanceStatus::Absent => &mut self.absent_count,
        };
        *slot = (*slot + delta).max(0);
    }

    /// Attendance rate = (present + late) / total, in percent, 2 decimals.
    pub fn recompute_rate(&mut self) {
        if self.total_classes > 0 {
            let rate =
                (self.present_count + self.late_count) as f64 * 100.0 / self.total_classes as f64;
            self.attendance_rate = Some((rate * 100.0).round() / 100.0);
        }
    }

    pub async fn find_by_student_and_offering<C>(
        db: &C,
        student_id: i64,
        offering_id: i64,
    ) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::StudentId.eq(student_id))
            .filter(Column::OfferingId.eq(offering_id))
            .one(db)
            .await
    }

    pub async fn find_by_offering<C>(db: &C, offering_id: i64) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::OfferingId.eq(offering_id))
            .all(db)
            .await
    }

    pub async fn find_by_student<C>(db: &C, student_id: i64) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::StudentId.eq(student_id))
            .all(db)
            .await
    }

    pub async fn find_all<C>(db: &C) -> Result<Vec<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find().all(db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_floors_at_zero() {
        let mut stats = Model::empty(1, 1);
        stats.apply(AttendanceStatus::Absent, -1);
        assert_eq!(stats.absent_count, 0);

        stats.apply(AttendanceStatus::Absent, 1);
        stats.apply(AttendanceStatus::Absent, 1);
        assert_eq!(stats.absent_count, 2);
    }

    #[test]
    fn rate_counts_present_and_late() {
        let mut stats = Model::empty(1, 1);
        stats.total_classes = 3;
        stats.apply(AttendanceStatus::Present, 1);
        stats.apply(AttendanceStatus::Late, 1);
        stats.apply(AttendanceStatus::Absent, 1);
        stats.recompute_rate();
        assert_eq!(stats.attendance_rate, Some(66.67));
    }

    #[test]
    fn rate_left_unset_without_classes() {
        let mut stats = Model::empty(1, 1);
        stats.recompute_rate();
        assert_eq!(stats.attendance_rate, None);
    }
}
