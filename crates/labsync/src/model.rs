//! Core domain types for labsync.
//!
//! This module defines the cached lab-session shape, the per-student
//! attendance records inside it, the queued offline mutations, and the
//! serde mirror of the backend's raw attendance rows.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Legacy class-group sentinel the backend uses to tag make-up sessions.
///
/// The dedicated `is_make_up_session` flag is authoritative; this sentinel
/// is still honored for data that only carries the group id.
pub const MAKEUP_GROUP: &str = "MAKEUP";

/// A student's attendance state within one lab session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttendanceStatus {
    /// Not yet marked.
    #[default]
    Pending,
    /// Marked within 30 minutes of session start.
    Present,
    /// Marked between 30 and 60 minutes after session start.
    Late,
    /// Excused by staff; assigned server-side only, never locally.
    Excused,
    /// Marked more than 60 minutes after session start, or never arrived.
    Absent,
}

impl AttendanceStatus {
    /// Parse a backend status string.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown status strings.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Present" => Ok(Self::Present),
            "Late" => Ok(Self::Late),
            "Excused" => Ok(Self::Excused),
            "Absent" => Ok(Self::Absent),
            other => Err(Error::invalid_record(format!(
                "unknown attendance status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Present => write!(f, "Present"),
            Self::Late => write!(f, "Late"),
            Self::Excused => write!(f, "Excused"),
            Self::Absent => write!(f, "Absent"),
        }
    }
}

/// One student's attendance record within one lab session.
///
/// Identity is `(session_id, student_id)`; `attendance_id` is the
/// server-assigned correlation id used when submitting a mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentAttendance {
    /// The student's institutional id.
    pub student_id: String,
    /// The student's full name.
    pub name: String,
    /// Current attendance status.
    pub status: AttendanceStatus,
    /// Back-reference to the owning session (not ownership).
    pub session_id: String,
    /// Server-assigned id for attendance mutations.
    pub attendance_id: String,
}

/// One scheduled lab occurrence, with its enrolled students.
///
/// The session id is globally unique and encodes
/// `MODULE-GROUP-LAB-ROOM-WEEK-DAY-YYYY-MM-DD-HHMM-HHMM`. Students are kept
/// in backend arrival order; the engine always replaces the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabSession {
    /// Globally unique session id.
    pub session_id: String,
    /// Semester this session belongs to.
    pub semester_id: String,
    /// Whether this is a make-up session (dedicated flag from the backend).
    pub is_make_up_session: bool,
    /// Lab name, e.g. `SWLAB1`.
    pub lab_name: String,
    /// Room number within the lab.
    pub room: u16,
    /// Module code, e.g. `CZ1234`.
    pub module_code: String,
    /// Class group id; `"MAKEUP"` is a legacy make-up sentinel.
    pub class_group_id: String,
    /// Calendar date of the session.
    pub date: NaiveDate,
    /// Scheduled start, local kiosk clock.
    pub start_time: NaiveTime,
    /// Scheduled end, local kiosk clock.
    pub end_time: NaiveTime,
    /// Enrolled students in backend arrival order.
    pub students: Vec<StudentAttendance>,
}

impl LabSession {
    /// The session's scheduled `[start, end]` window as local date-times.
    #[must_use]
    pub fn window(&self) -> (NaiveDateTime, NaiveDateTime) {
        (self.date.and_time(self.start_time), self.date.and_time(self.end_time))
    }

    /// Whether the session's scheduled window contains the given instant.
    ///
    /// Callers asking for "current" sessions pass `now + lookahead`; a
    /// session whose end falls inside the lookahead is already over.
    #[must_use]
    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        let (start, end) = self.window();
        start <= instant && instant <= end
    }

    /// Whether this session is a make-up session.
    ///
    /// Honors both the dedicated flag and the legacy `"MAKEUP"` group-id
    /// sentinel; older backend rows only carry the sentinel.
    #[must_use]
    pub fn is_makeup(&self) -> bool {
        self.is_make_up_session || self.class_group_id == MAKEUP_GROUP
    }

    /// Find a student by id, case-insensitively.
    #[must_use]
    pub fn find_student(&self, student_id: &str) -> Option<&StudentAttendance> {
        self.students
            .iter()
            .find(|s| s.student_id.eq_ignore_ascii_case(student_id))
    }

    /// Seat number for a student: their 1-based position in the roster.
    #[must_use]
    pub fn seat_of(&self, student_id: &str) -> Option<u16> {
        self.students
            .iter()
            .position(|s| s.student_id.eq_ignore_ascii_case(student_id))
            .map(|index| u16::try_from(index + 1).unwrap_or(u16::MAX))
    }

    /// Return a copy of this session with one student's status replaced.
    ///
    /// This is a pure transform: the receiver is untouched and the caller
    /// decides when to commit the returned value to the store, so
    /// concurrent readers never observe a half-updated session.
    #[must_use]
    pub fn with_student_status(
        &self,
        student_id: &str,
        status: AttendanceStatus,
    ) -> Self {
        let mut updated = self.clone();
        for student in &mut updated.students {
            if student.student_id.eq_ignore_ascii_case(student_id) {
                student.status = status;
            }
        }
        updated
    }
}

/// The kind of a queued offline mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    /// An attendance mark awaiting backend confirmation.
    MarkAttendance,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MarkAttendance => write!(f, "markAttendance"),
        }
    }
}

impl MutationKind {
    /// Parse a stored kind string.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown kinds.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "markAttendance" => Ok(Self::MarkAttendance),
            other => Err(Error::invalid_record(format!(
                "unknown mutation kind: {other}"
            ))),
        }
    }
}

/// A queued, not-yet-confirmed attendance mutation.
///
/// Created when a remote write fails; removed only after the backend
/// confirms the replay. Replay order is FIFO by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Store-assigned monotonic sequence id (`None` until enqueued).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// What kind of mutation this is.
    pub kind: MutationKind,
    /// Server-assigned attendance id the mutation targets.
    pub attendance_id: String,
    /// The status to submit.
    pub status: AttendanceStatus,
}

impl PendingMutation {
    /// Create a new, not-yet-enqueued attendance mark.
    #[must_use]
    pub fn mark_attendance(attendance_id: impl Into<String>, status: AttendanceStatus) -> Self {
        Self {
            id: None,
            kind: MutationKind::MarkAttendance,
            attendance_id: attendance_id.into(),
            status,
        }
    }
}

/// A recently marked student, kept for kiosk display and recall.
///
/// Keyed by student id; the last mark wins. Not on the correctness-critical
/// path but kept consistent with the session's `StudentAttendance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedStudent {
    /// The student's institutional id.
    pub student_id: String,
    /// The student's full name.
    pub name: String,
    /// Room the student was marked in.
    pub room: u16,
    /// Seat number: the student's 1-based position in the session roster
    /// at the time of the mark.
    pub seat: u16,
    /// The status they were marked with.
    pub status: AttendanceStatus,
}

/// A flat attendance row as returned by the backend.
///
/// One row per `(session, student)` pair; ingest groups rows by session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAttendanceRow {
    /// The owning session's id.
    #[serde(rename = "lab_SessionID")]
    pub lab_session_id: String,
    /// Semester id.
    #[serde(rename = "semester_ID")]
    pub semester_id: String,
    /// Dedicated make-up flag.
    #[serde(rename = "isMakeUpSession")]
    pub is_make_up_session: bool,
    /// Nested session scheduling details.
    #[serde(rename = "labsession")]
    pub session: RawSessionDetails,
    /// The student this row describes.
    pub student: RawStudentRef,
    /// Attendance status string.
    pub status: String,
    /// Server-assigned attendance id.
    #[serde(rename = "attendance_ID")]
    pub attendance_id: String,
}

/// Nested scheduling details of a raw attendance row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSessionDetails {
    /// Lab reference.
    #[serde(rename = "labID")]
    pub lab: RawLabRef,
    /// Class-group reference.
    #[serde(rename = "classGroupID")]
    pub class_group: RawClassGroupRef,
    /// Session date, `YYYY-MM-DD`.
    pub date: String,
    /// Session start, `HH:MM[:SS]`.
    #[serde(rename = "startTime")]
    pub start_time: String,
    /// Session end, `HH:MM[:SS]`.
    #[serde(rename = "endTime")]
    pub end_time: String,
}

/// Lab identification within a raw row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLabRef {
    /// Lab name.
    #[serde(rename = "labName")]
    pub lab_name: String,
    /// Room number.
    pub room: u16,
}

/// Class-group identification within a raw row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawClassGroupRef {
    /// Module code.
    #[serde(rename = "moduleCode")]
    pub module_code: String,
    /// Class-group id.
    #[serde(rename = "classGroupID")]
    pub class_group_id: String,
}

/// Student identification within a raw row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStudentRef {
    /// The student's institutional id.
    #[serde(rename = "student_ID")]
    pub student_id: String,
    /// The student's full name.
    #[serde(rename = "fullName")]
    pub full_name: String,
}

impl RawAttendanceRow {
    /// Validate the identifying fields and status of this row.
    ///
    /// # Errors
    ///
    /// Returns a validation error when a required id is empty, a date or
    /// time fails to parse, or the status string is unknown. Ingest skips
    /// such rows without aborting the batch.
    pub fn validate(&self) -> Result<()> {
        if self.lab_session_id.trim().is_empty() {
            return Err(Error::invalid_record("empty lab session id"));
        }
        if self.student.student_id.trim().is_empty() {
            return Err(Error::invalid_record("empty student id"));
        }
        if self.attendance_id.trim().is_empty() {
            return Err(Error::invalid_record("empty attendance id"));
        }
        AttendanceStatus::parse(&self.status)?;
        parse_wire_date(&self.session.date)?;
        parse_wire_time(&self.session.start_time)?;
        parse_wire_time(&self.session.end_time)?;
        Ok(())
    }

    /// Build the session shell this row belongs to (no students yet).
    ///
    /// # Errors
    ///
    /// Returns a validation error when the scheduling fields fail to parse.
    pub fn to_session_shell(&self) -> Result<LabSession> {
        Ok(LabSession {
            session_id: self.lab_session_id.clone(),
            semester_id: self.semester_id.clone(),
            is_make_up_session: self.is_make_up_session,
            lab_name: self.session.lab.lab_name.clone(),
            room: self.session.lab.room,
            module_code: self.session.class_group.module_code.clone(),
            class_group_id: self.session.class_group.class_group_id.clone(),
            date: parse_wire_date(&self.session.date)?,
            start_time: parse_wire_time(&self.session.start_time)?,
            end_time: parse_wire_time(&self.session.end_time)?,
            students: Vec::new(),
        })
    }

    /// Build the student entry this row describes.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the status string is unknown.
    pub fn to_student(&self) -> Result<StudentAttendance> {
        Ok(StudentAttendance {
            student_id: self.student.student_id.clone(),
            name: self.student.full_name.clone(),
            status: AttendanceStatus::parse(&self.status)?,
            session_id: self.lab_session_id.clone(),
            attendance_id: self.attendance_id.clone(),
        })
    }
}

/// Parse a wire-format date (`YYYY-MM-DD`).
fn parse_wire_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::invalid_record(format!("bad date {s:?}: {e}")))
}

/// Parse a wire-format clock time (`HH:MM:SS` or `HH:MM`).
fn parse_wire_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| Error::invalid_record(format!("bad time {s:?}: {e}")))
}

/// Extract the scheduled start instant encoded in a session id.
///
/// Session ids are colon-free, dash-delimited:
/// `MODULE-GROUP-LAB-ROOM-WEEK-DAY-YYYY-MM-DD-HHMM-HHMM`. The decision
/// policy uses this start instant rather than the cached session fields,
/// so a mark can be classified even before the session is cached.
///
/// # Errors
///
/// Returns a validation error when the id does not have exactly eleven
/// dash-delimited fields or the date/time fields fail to parse.
pub fn session_start_from_id(session_id: &str) -> Result<NaiveDateTime> {
    let parts: Vec<&str> = session_id.split('-').collect();
    if parts.len() != 11 {
        return Err(Error::invalid_session_id(
            session_id,
            format!("expected 11 dash-delimited fields, got {}", parts.len()),
        ));
    }

    let date_str = format!("{}-{}-{}", parts[6], parts[7], parts[8]);
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| Error::invalid_session_id(session_id, format!("bad date: {e}")))?;

    let start = parts[9];
    let time = NaiveTime::parse_from_str(start, "%H%M")
        .map_err(|e| Error::invalid_session_id(session_id, format!("bad start time: {e}")))?;

    Ok(date.and_time(time))
}
