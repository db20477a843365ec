use chrono::{Duration, NaiveTime};

use db::models::attendance_detail::AttendanceStatus;

use crate::error::{AttendanceError, Result};

/// Time windows, in minutes relative to the scheduled start, that decide how
/// a check-in instant is classified.
#[derive(Debug, Clone, Copy)]
pub struct CheckinWindows {
    /// How early before the start a check-in is accepted.
    pub early_checkin_minutes: i64,
    /// Grace period after the start; later arrivals count as late.
    pub late_threshold_minutes: i64,
    /// Hard cutoff after the start; later attempts are rejected.
    pub max_late_minutes: i64,
}

impl Default for CheckinWindows {
    fn default() -> Self {
        Self {
            early_checkin_minutes: 5,
            late_threshold_minutes: 5,
            max_late_minutes: 15,
        }
    }
}

impl CheckinWindows {
    /// Classifies a check-in instant against the scheduled start time.
    ///
    /// Strictly before (start - early) rejects as too early; strictly after
    /// (start + max) rejects as too late; strictly after (start + grace) is
    /// LATE; everything else is PRESENT. The boundaries themselves are
    /// accepted into the milder bucket.
    pub fn classify(&self, checkin: NaiveTime, start: NaiveTime) -> Result<AttendanceStatus> {
        let early_allowed = start - Duration::minutes(self.early_checkin_minutes);
        let late_threshold = start + Duration::minutes(self.late_threshold_minutes);
        let max_late = start + Duration::minutes(self.max_late_minutes);

        if checkin < early_allowed {
            Err(AttendanceError::CheckinTooEarly)
        } else if checkin > max_late {
            Err(AttendanceError::CheckinTooLate)
        } else if checkin > late_threshold {
            Ok(AttendanceStatus::Late)
        } else {
            Ok(AttendanceStatus::Present)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn early_within_window_is_present() {
        let windows = CheckinWindows::default();
        assert_eq!(
            windows.classify(t(9, 56), t(10, 0)).unwrap(),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn after_grace_is_late() {
        let windows = CheckinWindows::default();
        assert_eq!(
            windows.classify(t(10, 6), t(10, 0)).unwrap(),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn past_cutoff_is_rejected() {
        let windows = CheckinWindows::default();
        assert!(matches!(
            windows.classify(t(10, 16), t(10, 0)),
            Err(AttendanceError::CheckinTooLate)
        ));
    }

    #[test]
    fn too_early_is_rejected() {
        let windows = CheckinWindows::default();
        assert!(matches!(
            windows.classify(t(9, 54), t(10, 0)),
            Err(AttendanceError::CheckinTooEarly)
        ));
    }

    #[test]
    fn boundaries_take_the_milder_bucket() {
        let windows = CheckinWindows::default();
        // Exactly at the early bound and at the grace bound: present.
        assert_eq!(
            windows.classify(t(9, 55), t(10, 0)).unwrap(),
            AttendanceStatus::Present
        );
        assert_eq!(
            windows.classify(t(10, 5), t(10, 0)).unwrap(),
            AttendanceStatus::Present
        );
        // Exactly at the cutoff: still accepted, as late.
        assert_eq!(
            windows.classify(t(10, 15), t(10, 0)).unwrap(),
            AttendanceStatus::Late
        );
    }
}
