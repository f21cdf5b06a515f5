//! The attendance sync engine.
//!
//! The engine owns the local store and the remote client and mediates every
//! operation between them: ingesting fetched rows into the session cache,
//! answering "what is running now" queries, marking students with the
//! decision policy applied, queueing marks that cannot reach the backend,
//! and draining that queue when connectivity returns.
//!
//! Marks are optimistic: the local cache is updated immediately and the
//! backend write is either confirmed inline or queued for replay. The queue
//! is drained strictly in FIFO order and at most one drain runs at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::auth::TerminalIdentity;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    session_start_from_id, AttendanceStatus, LabSession, MarkedStudent, PendingMutation,
    RawAttendanceRow,
};
use crate::policy;
use crate::remote::RemoteApi;
use crate::storage::Store;

/// Outcome of a queue drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain was already in progress; nothing was done.
    AlreadyRunning,
    /// The drain ran to its stopping point.
    Completed {
        /// Mutations confirmed by the backend and removed from the queue.
        submitted: usize,
        /// Mutations still queued when the drain stopped.
        remaining: usize,
    },
}

/// Outcome of a mark operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The student was marked.
    Marked {
        /// The status the decision policy assigned.
        status: AttendanceStatus,
        /// Whether the backend write was queued instead of confirmed inline.
        queued: bool,
    },
    /// The student already had a non-pending status; nothing was changed.
    AlreadyMarked {
        /// The status already on record.
        status: AttendanceStatus,
    },
    /// The student is not in any current session.
    NotFound,
}

/// Summary of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshReport {
    /// Rooms fetched successfully.
    pub rooms_fetched: usize,
    /// Rooms whose fetch failed.
    pub rooms_failed: usize,
    /// Sessions written to the cache this cycle.
    pub sessions_cached: usize,
    /// Whether the backend was unreachable at the end of the cycle.
    pub offline: bool,
}

/// The attendance sync engine.
pub struct Engine {
    store: Mutex<Store>,
    remote: Arc<dyn RemoteApi>,
    identity: TerminalIdentity,
    config: Config,
    drain_in_progress: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Clears the drain flag when the drain exits, early returns included.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    /// Create an engine for the given terminal.
    ///
    /// # Errors
    ///
    /// Returns an authorization error when the identity is not in the
    /// configured lab roster.
    pub fn new(
        store: Store,
        remote: Arc<dyn RemoteApi>,
        identity: TerminalIdentity,
        config: Config,
    ) -> Result<Self> {
        identity.authorize(&config)?;

        Ok(Self {
            store: Mutex::new(store),
            remote,
            identity,
            config,
            drain_in_progress: AtomicBool::new(false),
        })
    }

    /// The terminal identity this engine serves.
    #[must_use]
    pub fn identity(&self) -> &TerminalIdentity {
        &self.identity
    }

    /// Wipe all local state: cache, replay queue, and recent marks.
    ///
    /// Used when the terminal identity changes; queued marks belong to the
    /// old identity's sessions and must not replay under the new one.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub fn reset_local_state(&self) -> Result<()> {
        self.store().clear_all()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        // A poisoned lock only means a panic mid-query; the data itself is
        // transactional, so carry on with the inner value.
        self.store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // === Ingest ===

    /// Group raw backend rows into sessions and write them to the cache.
    ///
    /// Rows are grouped by session id in first-appearance order; rows that
    /// fail validation are skipped with a warning rather than aborting the
    /// batch. Returns the number of sessions written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn ingest(&self, rows: &[RawAttendanceRow]) -> Result<usize> {
        let sessions = group_rows(rows);
        let count = sessions.len();
        self.store().put_sessions(&sessions)?;
        debug!("Ingested {} rows into {} sessions", rows.len(), count);
        Ok(count)
    }

    // === Queries ===

    /// Sessions currently running (or starting within the lookahead) at
    /// `now`, make-up sessions ordered last.
    ///
    /// A session is current when its scheduled window contains
    /// `now + lookahead`; a session ending inside the lookahead is already
    /// winding down and no longer current. Within the regular and make-up
    /// partitions the stable cache order is preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn current_sessions(&self, now: NaiveDateTime) -> Result<Vec<LabSession>> {
        let horizon = now + self.config.lookahead();
        let mut sessions: Vec<LabSession> = self
            .store()
            .all_sessions()?
            .into_iter()
            .filter(|s| s.contains(horizon))
            .collect();

        // Stable partition keeps cache order within each group
        sessions.sort_by_key(LabSession::is_makeup);
        Ok(sessions)
    }

    /// All cached sessions in stable cache order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn cached_sessions(&self) -> Result<Vec<LabSession>> {
        self.store().all_sessions()
    }

    /// Recently marked students, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn marked_students(&self) -> Result<Vec<MarkedStudent>> {
        self.store().marked_students()
    }

    /// Queued mutations awaiting replay, in replay order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn pending_mutations(&self) -> Result<Vec<PendingMutation>> {
        self.store().pending_mutations()
    }

    // === Marking ===

    /// Mark a student in a specific session at `now`.
    ///
    /// The decision policy classifies the mark against the session's
    /// scheduled start. The cache is updated immediately; the backend write
    /// is confirmed inline or, on a network failure, queued for replay.
    ///
    /// # Errors
    ///
    /// Returns an authorization error when the session does not belong to
    /// this terminal's lab room, a validation error when the session is
    /// not cached, or a storage error.
    pub async fn mark_student(
        &self,
        session_id: &str,
        student_id: &str,
        now: NaiveDateTime,
    ) -> Result<MarkOutcome> {
        let session = self
            .store()
            .get_session(session_id)?
            .ok_or_else(|| Error::invalid_record(format!("unknown session {session_id}")))?;

        if !self.identity.can_access(&session.lab_name, session.room) {
            return Err(Error::unauthorized(format!(
                "session {session_id} belongs to {} room {}",
                session.lab_name, session.room
            )));
        }

        let Some(student) = session.find_student(student_id) else {
            return Ok(MarkOutcome::NotFound);
        };

        if student.status != AttendanceStatus::Pending {
            return Ok(MarkOutcome::AlreadyMarked {
                status: student.status,
            });
        }

        // The id encodes the scheduled start; the cached fields are the
        // fallback for ids that do not parse.
        let start = session_start_from_id(session_id).unwrap_or_else(|_| session.window().0);
        let status = policy::decide(now, start);

        let attendance_id = student.attendance_id.clone();
        let student_id_owned = student.student_id.clone();
        let student_name = student.name.clone();
        let seat = session.seat_of(&student_id_owned).unwrap_or_default();

        let queued = match self.remote.submit_attendance(&attendance_id, status).await {
            Ok(()) => false,
            Err(e) if e.is_network() => {
                info!(
                    "Backend unreachable, queueing mark for {}: {}",
                    student_id_owned, e
                );
                self.store()
                    .enqueue_mutation(&PendingMutation::mark_attendance(&attendance_id, status))?;
                true
            }
            Err(e) => return Err(e),
        };

        // Optimistic local update so the kiosk reflects the mark at once
        let updated = session.with_student_status(&student_id_owned, status);
        let store = self.store();
        store.put_session(&updated)?;
        store.put_marked_student(&MarkedStudent {
            student_id: student_id_owned.clone(),
            name: student_name,
            room: session.room,
            seat,
            status,
        })?;
        drop(store);

        info!(
            "Marked {} as {} in {}{}",
            student_id_owned,
            status,
            session_id,
            if queued { " (queued)" } else { "" }
        );
        Ok(MarkOutcome::Marked { status, queued })
    }

    /// Mark a student located only by their id, scanning current sessions.
    ///
    /// The first current session containing the student is used. A student
    /// found only with a non-pending status reports [`MarkOutcome::AlreadyMarked`].
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Engine::mark_student`].
    pub async fn mark_by_identifier(
        &self,
        student_id: &str,
        now: NaiveDateTime,
    ) -> Result<MarkOutcome> {
        // Scanner input arrives with stray whitespace
        let student_id = student_id.trim();
        let sessions = self.current_sessions(now)?;

        let mut already: Option<AttendanceStatus> = None;
        for session in &sessions {
            if let Some(student) = session.find_student(student_id) {
                if student.status == AttendanceStatus::Pending {
                    return self.mark_student(&session.session_id, student_id, now).await;
                }
                already.get_or_insert(student.status);
            }
        }

        match already {
            Some(status) => Ok(MarkOutcome::AlreadyMarked { status }),
            None => Ok(MarkOutcome::NotFound),
        }
    }

    // === Queue drain ===

    /// Replay the queued mutations against the backend, FIFO.
    ///
    /// At most one drain runs at a time; an overlapping call reports
    /// [`DrainOutcome::AlreadyRunning`]. A mutation is deleted only once the
    /// backend confirms it; any failed submit, rejected or unreachable,
    /// stops the drain and leaves the rest queued for the next attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub async fn drain_queue(&self) -> Result<DrainOutcome> {
        if self
            .drain_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress, skipping");
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.drain_in_progress);

        let queue = self.store().pending_mutations()?;
        if queue.is_empty() {
            return Ok(DrainOutcome::Completed {
                submitted: 0,
                remaining: 0,
            });
        }

        info!("Draining {} queued mutations", queue.len());
        let mut submitted = 0;
        let mut remaining = queue.len();

        for mutation in queue {
            let result = self
                .remote
                .submit_attendance(&mutation.attendance_id, mutation.status)
                .await;

            match result {
                Ok(()) => {
                    if let Some(id) = mutation.id {
                        self.store().delete_mutation(id)?;
                    }
                    submitted += 1;
                    remaining -= 1;
                }
                Err(e) if e.is_network() => {
                    info!("Drain stopped, submit failed: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(DrainOutcome::Completed {
            submitted,
            remaining,
        })
    }

    // === Refresh ===

    /// Fetch sessions for every room of this terminal's lab and ingest them.
    ///
    /// The fetch window starts `fetch_margin` before `now` so sessions
    /// already under way are included. Per-room failures are counted, not
    /// fatal; the cycle is offline when the backend was unreachable at the
    /// end of it.
    ///
    /// # Errors
    ///
    /// Returns an error if a store write fails. Network failures are
    /// reported through the returned [`RefreshReport`] instead.
    pub async fn refresh(&self, now: NaiveDateTime) -> Result<RefreshReport> {
        let rooms: Vec<u16> = self
            .config
            .rooms_for(&self.identity.lab_name)
            .map(<[u16]>::to_vec)
            .unwrap_or_default();

        let from = now - self.config.fetch_margin();
        let mut report = RefreshReport::default();

        for room in rooms {
            match self
                .remote
                .fetch_sessions(&self.identity.lab_name, room, from)
                .await
            {
                Ok(rows) => {
                    report.sessions_cached += self.ingest(&rows)?;
                    report.rooms_fetched += 1;
                }
                Err(e) if e.is_network() => {
                    warn!(
                        "Fetch failed for {} room {}: {}",
                        self.identity.lab_name, room, e
                    );
                    report.rooms_failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        report.offline = !self.remote.is_online();
        Ok(report)
    }

    /// Store statistics for status reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn stats(&self) -> Result<crate::storage::StoreStats> {
        self.store().stats()
    }
}

/// Group raw rows into sessions by session id, first-appearance order.
///
/// Invalid rows are skipped with a warning.
fn group_rows(rows: &[RawAttendanceRow]) -> Vec<LabSession> {
    let mut order: Vec<String> = Vec::new();
    let mut sessions: std::collections::HashMap<String, LabSession> =
        std::collections::HashMap::new();

    for row in rows {
        if let Err(e) = row.validate() {
            warn!("Skipping invalid attendance row: {}", e);
            continue;
        }

        let entry = match sessions.entry(row.lab_session_id.clone()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(v) => {
                // validate() already vetted the scheduling fields
                let Ok(shell) = row.to_session_shell() else {
                    continue;
                };
                order.push(row.lab_session_id.clone());
                v.insert(shell)
            }
        };

        if let Ok(student) = row.to_student() {
            entry.students.push(student);
        }
    }

    order
        .into_iter()
        .filter_map(|id| sessions.remove(&id))
        .collect()
}
