pub mod m202601150001_create_academic_base;
pub mod m202601150002_create_attendance_sessions;
pub mod m202601150003_create_attendance_tracking;
pub mod m202601150004_create_attendance_configs;
