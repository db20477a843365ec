pub mod cache;
pub mod classify;
pub mod config_service;
pub mod context;
pub mod error;
pub mod geo;
pub mod location_service;
pub mod notification;
pub mod qrcode_service;
pub mod request_service;
pub mod session_service;
pub mod statistics_service;
pub mod warning_service;

pub use config_service::AttendanceConfigService;
pub use context::AuthContext;
pub use error::{AttendanceError, Result};
pub use location_service::LocationAttendanceService;
pub use notification::{AttendanceNotifier, LogNotifier};
pub use qrcode_service::QrCodeAttendanceService;
pub use request_service::AttendanceRequestService;
pub use session_service::AttendanceSessionService;
pub use statistics_service::AttendanceStatisticsService;
pub use warning_service::{spawn_daily_sweep, AttendanceWarningService};
