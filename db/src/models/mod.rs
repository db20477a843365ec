pub mod attendance_config;
pub mod attendance_detail;
pub mod attendance_request;
pub mod attendance_session;
pub mod attendance_statistics;
pub mod attendance_warning;
pub mod course;
pub mod course_enrollment;
pub mod course_offering;
pub mod leave_request;
pub mod student;
pub mod teacher;

pub use attendance_config::Entity as AttendanceConfig;
pub use attendance_detail::Entity as AttendanceDetail;
pub use attendance_request::Entity as AttendanceRequest;
pub use attendance_session::Entity as AttendanceSession;
pub use attendance_statistics::Entity as AttendanceStatistics;
pub use attendance_warning::Entity as AttendanceWarning;
pub use course::Entity as Course;
pub use course_enrollment::Entity as CourseEnrollment;
pub use course_offering::Entity as CourseOffering;
pub use leave_request::Entity as LeaveRequest;
pub use student::Entity as Student;
pub use teacher::Entity as Teacher;
