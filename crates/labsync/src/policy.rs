//! Attendance decision policy.
//!
//! Pure classification of a mark against the session's scheduled start:
//! on time within 30 minutes, late up to 60, absent beyond that. Both the
//! row-mark flow and the scan/search flow call through here so a student
//! can never get a different answer depending on which surface marked them.

use chrono::NaiveDateTime;

use crate::model::AttendanceStatus;

/// Minutes after session start within which a mark counts as present.
pub const PRESENT_WITHIN_MINUTES: i64 = 30;

/// Minutes after session start within which a mark counts as late.
pub const LATE_WITHIN_MINUTES: i64 = 60;

/// Decide the attendance status for a mark at `now` against a session
/// starting at `session_start`.
///
/// Boundaries are inclusive on the early side: exactly 30 minutes late is
/// `Present`, exactly 60 is `Late`. Arriving before the session starts is
/// `Present`. Deterministic, no side effects.
#[must_use]
pub fn decide(now: NaiveDateTime, session_start: NaiveDateTime) -> AttendanceStatus {
    let late_seconds = (now - session_start).num_seconds();

    if late_seconds > LATE_WITHIN_MINUTES * 60 {
        AttendanceStatus::Absent
    } else if late_seconds > PRESENT_WITHIN_MINUTES * 60 {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_on_time_is_present() {
        assert_eq!(decide(start(), start()), AttendanceStatus::Present);
        assert_eq!(
            decide(start() + Duration::minutes(10), start()),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn test_early_arrival_is_present() {
        assert_eq!(
            decide(start() - Duration::minutes(20), start()),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn test_exactly_thirty_minutes_is_present() {
        assert_eq!(
            decide(start() + Duration::minutes(30), start()),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn test_just_past_thirty_is_late() {
        assert_eq!(
            decide(start() + Duration::minutes(30) + Duration::seconds(1), start()),
            AttendanceStatus::Late
        );
        assert_eq!(
            decide(start() + Duration::minutes(45), start()),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn test_exactly_sixty_minutes_is_late() {
        assert_eq!(
            decide(start() + Duration::minutes(60), start()),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn test_past_sixty_is_absent() {
        assert_eq!(
            decide(start() + Duration::minutes(60) + Duration::seconds(1), start()),
            AttendanceStatus::Absent
        );
        assert_eq!(
            decide(start() + Duration::hours(3), start()),
            AttendanceStatus::Absent
        );
    }

    #[test]
    fn test_deterministic() {
        let now = start() + Duration::minutes(42);
        assert_eq!(decide(now, start()), decide(now, start()));
    }
}
