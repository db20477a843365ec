use sea_orm::DbErr;

pub type Result<T, E = AttendanceError> = std::result::Result<T, E>;

/// Errors raised by the attendance engine.
///
/// Validation and state errors surface synchronously to the caller; the API
/// layer is responsible for mapping them to user-facing responses.
#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("course offering {0} not found")]
    OfferingNotFound(i64),

    #[error("attendance session {0} not found")]
    SessionNotFound(i64),

    #[error("attendance session is not in progress")]
    NotInProgress,

    #[error("attendance session already submitted")]
    AlreadySubmitted,

    #[error("student {0} is not on the session roster")]
    StudentNotInCourse(i64),

    #[error("student has already checked in")]
    DuplicateCheckin,

    #[error("QR token missing, expired, or session closed")]
    QrCodeExpired,

    #[error("location is {distance_m:.0} m from the geofence center, outside the {radius_m} m radius")]
    LocationOutOfRange { distance_m: f64, radius_m: i32 },

    #[error("check-in attempted before the allowed window opened")]
    CheckinTooEarly,

    #[error("check-in window has closed")]
    CheckinTooLate,

    #[error("{0}")]
    DataAlreadyExists(String),

    #[error("attendance detail {0} not found")]
    DetailNotFound(i64),

    #[error("correction request {0} not found")]
    RequestNotFound(i64),

    #[error("correction request already processed")]
    RequestAlreadyProcessed,

    #[error("warning {0} not found")]
    WarningNotFound(i64),

    #[error("config key {0} not found")]
    ConfigNotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid input: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for AttendanceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AttendanceError::Validation(errors.to_string())
    }
}
