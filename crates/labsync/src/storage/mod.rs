//! Storage layer for labsync.
//!
//! This module provides `SQLite`-based persistent storage for the session
//! cache, the offline mutation queue, and the recently-marked-students
//! table. All three survive process restarts; the mutation queue is the
//! crash-safety backbone of offline marking.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{
    AttendanceStatus, LabSession, MarkedStudent, MutationKind, PendingMutation,
};

/// Persistent store for sessions, queued mutations, and recent marks.
///
/// Sessions and marked students are stored as JSON payloads; the mutation
/// queue is stored column-wise so replay order and targeting survive any
/// payload format change.
#[derive(Debug)]
pub struct Store {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Store {
    /// Open or create a store database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL keeps reads cheap while the scheduler writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // === Session cache ===

    /// Insert or replace a session.
    ///
    /// A new session is appended (assigned the next position); an existing
    /// session keeps its position so reads stay stably ordered across
    /// refreshes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails.
    pub fn put_session(&self, session: &LabSession) -> Result<()> {
        let payload = serde_json::to_string(session)?;

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT position FROM lab_sessions WHERE session_id = ?1",
                [&session.session_id],
                |row| row.get(0),
            )
            .optional()?;

        let position = match existing {
            Some(pos) => pos,
            None => self.next_session_position()?,
        };

        self.conn.execute(
            r"
            INSERT INTO lab_sessions (session_id, position, payload, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(session_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            ",
            params![session.session_id, position, payload],
        )?;

        Ok(())
    }

    /// Insert or replace a batch of sessions in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails.
    pub fn put_sessions(&mut self, sessions: &[LabSession]) -> Result<()> {
        let tx = self.conn.transaction()?;

        let mut next_position: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM lab_sessions",
                [],
                |row| row.get(0),
            )?;

        for session in sessions {
            let payload = serde_json::to_string(session)?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT position FROM lab_sessions WHERE session_id = ?1",
                    [&session.session_id],
                    |row| row.get(0),
                )
                .optional()?;

            let position = existing.unwrap_or_else(|| {
                let pos = next_position;
                next_position += 1;
                pos
            });

            tx.execute(
                r"
                INSERT INTO lab_sessions (session_id, position, payload, updated_at)
                VALUES (?1, ?2, ?3, datetime('now'))
                ON CONFLICT(session_id) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                ",
                params![session.session_id, position, payload],
            )?;
        }

        tx.commit()?;
        debug!("Stored {} sessions", sessions.len());
        Ok(())
    }

    /// Get a session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation or deserialization fails.
    pub fn get_session(&self, session_id: &str) -> Result<Option<LabSession>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM lab_sessions WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Get all cached sessions in stable insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation or deserialization fails.
    pub fn all_sessions(&self) -> Result<Vec<LabSession>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM lab_sessions ORDER BY position ASC")?;

        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|json| serde_json::from_str(json).map_err(Error::from))
            .collect()
    }

    /// Count cached sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn session_count(&self) -> Result<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM lab_sessions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete all cached sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_sessions(&self) -> Result<usize> {
        let affected = self.conn.execute("DELETE FROM lab_sessions", [])?;
        if affected > 0 {
            info!("Cleared {} cached sessions", affected);
        }
        Ok(affected)
    }

    fn next_session_position(&self) -> Result<i64> {
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM lab_sessions",
            [],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    // === Mutation queue ===

    /// Append a mutation to the replay queue.
    ///
    /// Returns the assigned queue id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn enqueue_mutation(&self, mutation: &PendingMutation) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO pending_mutations (kind, attendance_id, status)
            VALUES (?1, ?2, ?3)
            ",
            params![
                mutation.kind.to_string(),
                mutation.attendance_id,
                mutation.status.to_string(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Enqueued mutation {} for {}", id, mutation.attendance_id);
        Ok(id)
    }

    /// Get all queued mutations in replay (FIFO) order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a stored row is
    /// malformed.
    pub fn pending_mutations(&self) -> Result<Vec<PendingMutation>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, kind, attendance_id, status
            FROM pending_mutations ORDER BY id ASC
            ",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, kind, attendance_id, status)| {
                Ok(PendingMutation {
                    id: Some(id),
                    kind: MutationKind::parse(&kind)?,
                    attendance_id,
                    status: AttendanceStatus::parse(&status)?,
                })
            })
            .collect()
    }

    /// Remove a confirmed mutation from the queue.
    ///
    /// Returns `true` if a row was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_mutation(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM pending_mutations WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// Count queued mutations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn pending_count(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_mutations",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // === Marked students ===

    /// Insert or replace a marked-student record (last mark wins).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails.
    pub fn put_marked_student(&self, marked: &MarkedStudent) -> Result<()> {
        let payload = serde_json::to_string(marked)?;
        self.conn.execute(
            r"
            INSERT INTO marked_students (student_id, payload, marked_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(student_id) DO UPDATE SET
                payload = excluded.payload,
                marked_at = excluded.marked_at
            ",
            params![marked.student_id, payload],
        )?;
        Ok(())
    }

    /// Get a marked-student record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation or deserialization fails.
    pub fn get_marked_student(&self, student_id: &str) -> Result<Option<MarkedStudent>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM marked_students WHERE student_id = ?1",
                [student_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Get all marked-student records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation or deserialization fails.
    pub fn marked_students(&self) -> Result<Vec<MarkedStudent>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM marked_students ORDER BY marked_at ASC, student_id ASC")?;

        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|json| serde_json::from_str(json).map_err(Error::from))
            .collect()
    }

    /// Delete all marked-student records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_marked_students(&self) -> Result<usize> {
        let affected = self.conn.execute("DELETE FROM marked_students", [])?;
        Ok(affected)
    }

    /// Wipe every collection (terminal identity logout).
    ///
    /// # Errors
    ///
    /// Returns an error if a database operation fails.
    pub fn clear_all(&self) -> Result<()> {
        self.clear_sessions()?;
        self.conn.execute("DELETE FROM pending_mutations", [])?;
        self.clear_marked_students()?;
        info!("Cleared all local state");
        Ok(())
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let sessions = self.session_count()?;
        let pending = self.pending_count()?;
        let marked: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM marked_students",
            [],
            |row| row.get(0),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            sessions,
            pending_mutations: pending,
            marked_students: marked,
            db_size_bytes,
        })
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of cached sessions.
    pub sessions: i64,
    /// Number of queued mutations awaiting replay.
    pub pending_mutations: i64,
    /// Number of marked-student records.
    pub marked_students: i64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttendanceStatus;
    use chrono::{NaiveDate, NaiveTime};

    fn create_test_store() -> Store {
        Store::open_in_memory().expect("failed to create test store")
    }

    fn session_with_id(id: &str) -> LabSession {
        LabSession {
            session_id: id.to_string(),
            semester_id: "2024S1".to_string(),
            is_make_up_session: false,
            lab_name: "SWLAB1".to_string(),
            room: 1,
            module_code: "CZ1234".to_string(),
            class_group_id: "G1".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            students: Vec::new(),
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory();
        assert!(store.is_ok());
    }

    #[test]
    fn test_put_and_get_session() {
        let store = create_test_store();
        let session = session_with_id("s-1");

        store.put_session(&session).unwrap();
        let retrieved = store.get_session("s-1").unwrap();

        assert_eq!(retrieved, Some(session));
    }

    #[test]
    fn test_get_nonexistent_session() {
        let store = create_test_store();
        assert_eq!(store.get_session("missing").unwrap(), None);
    }

    #[test]
    fn test_put_session_upsert_replaces_payload() {
        let store = create_test_store();
        let mut session = session_with_id("s-1");

        store.put_session(&session).unwrap();
        session.room = 2;
        store.put_session(&session).unwrap();

        assert_eq!(store.session_count().unwrap(), 1);
        assert_eq!(store.get_session("s-1").unwrap().unwrap().room, 2);
    }

    #[test]
    fn test_all_sessions_stable_order() {
        let mut store = create_test_store();

        store
            .put_sessions(&[
                session_with_id("s-a"),
                session_with_id("s-b"),
                session_with_id("s-c"),
            ])
            .unwrap();

        // Re-upsert the first session; its position must not change
        let mut updated = session_with_id("s-a");
        updated.room = 9;
        store.put_session(&updated).unwrap();

        let ids: Vec<String> = store
            .all_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["s-a", "s-b", "s-c"]);
    }

    #[test]
    fn test_put_sessions_batch_mixes_new_and_existing() {
        let mut store = create_test_store();

        store.put_sessions(&[session_with_id("s-1")]).unwrap();
        store
            .put_sessions(&[session_with_id("s-1"), session_with_id("s-2")])
            .unwrap();

        assert_eq!(store.session_count().unwrap(), 2);

        let ids: Vec<String> = store
            .all_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["s-1", "s-2"]);
    }

    #[test]
    fn test_clear_sessions() {
        let mut store = create_test_store();
        store
            .put_sessions(&[session_with_id("s-1"), session_with_id("s-2")])
            .unwrap();

        assert_eq!(store.clear_sessions().unwrap(), 2);
        assert_eq!(store.session_count().unwrap(), 0);
    }

    #[test]
    fn test_enqueue_and_list_mutations_fifo() {
        let store = create_test_store();

        let first = PendingMutation::mark_attendance("att-1", AttendanceStatus::Present);
        let second = PendingMutation::mark_attendance("att-2", AttendanceStatus::Late);

        let id1 = store.enqueue_mutation(&first).unwrap();
        let id2 = store.enqueue_mutation(&second).unwrap();
        assert!(id2 > id1);

        let queued = store.pending_mutations().unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].attendance_id, "att-1");
        assert_eq!(queued[0].id, Some(id1));
        assert_eq!(queued[1].attendance_id, "att-2");
        assert_eq!(queued[1].status, AttendanceStatus::Late);
    }

    #[test]
    fn test_delete_mutation() {
        let store = create_test_store();
        let mutation = PendingMutation::mark_attendance("att-1", AttendanceStatus::Present);
        let id = store.enqueue_mutation(&mutation).unwrap();

        assert!(store.delete_mutation(id).unwrap());
        assert!(!store.delete_mutation(id).unwrap());
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_enqueue_is_preserved() {
        // Replaying the same mark twice is safe server-side; the queue
        // does not deduplicate.
        let store = create_test_store();
        let mutation = PendingMutation::mark_attendance("att-1", AttendanceStatus::Present);

        store.enqueue_mutation(&mutation).unwrap();
        store.enqueue_mutation(&mutation).unwrap();

        assert_eq!(store.pending_count().unwrap(), 2);
    }

    #[test]
    fn test_marked_student_last_mark_wins() {
        let store = create_test_store();

        let first = MarkedStudent {
            student_id: "U200001A".to_string(),
            name: "Alice Tan".to_string(),
            room: 1,
            seat: 1,
            status: AttendanceStatus::Present,
        };
        store.put_marked_student(&first).unwrap();

        let second = MarkedStudent {
            status: AttendanceStatus::Late,
            ..first.clone()
        };
        store.put_marked_student(&second).unwrap();

        let all = store.marked_students().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, AttendanceStatus::Late);

        let got = store.get_marked_student("U200001A").unwrap().unwrap();
        assert_eq!(got.status, AttendanceStatus::Late);
    }

    #[test]
    fn test_clear_marked_students() {
        let store = create_test_store();
        store
            .put_marked_student(&MarkedStudent {
                student_id: "U200001A".to_string(),
                name: "Alice Tan".to_string(),
                room: 1,
                seat: 1,
                status: AttendanceStatus::Present,
            })
            .unwrap();

        assert_eq!(store.clear_marked_students().unwrap(), 1);
        assert!(store.marked_students().unwrap().is_empty());
    }

    #[test]
    fn test_clear_all() {
        let mut store = create_test_store();
        store.put_sessions(&[session_with_id("s-1")]).unwrap();
        store
            .enqueue_mutation(&PendingMutation::mark_attendance(
                "att-1",
                AttendanceStatus::Present,
            ))
            .unwrap();
        store
            .put_marked_student(&MarkedStudent {
                student_id: "U200001A".to_string(),
                name: "Alice Tan".to_string(),
                room: 1,
                seat: 1,
                status: AttendanceStatus::Present,
            })
            .unwrap();

        store.clear_all().unwrap();

        assert_eq!(store.session_count().unwrap(), 0);
        assert_eq!(store.pending_count().unwrap(), 0);
        assert!(store.marked_students().unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let mut store = create_test_store();
        store.put_sessions(&[session_with_id("s-1")]).unwrap();
        store
            .enqueue_mutation(&PendingMutation::mark_attendance(
                "att-1",
                AttendanceStatus::Present,
            ))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.pending_mutations, 1);
        assert_eq!(stats.marked_students, 0);
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_path() {
        let store = create_test_store();
        assert_eq!(store.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_session_with_students_roundtrip() {
        let store = create_test_store();
        let mut session = session_with_id("s-1");
        session.students.push(crate::model::StudentAttendance {
            student_id: "U200001A".to_string(),
            name: "Alice Tan".to_string(),
            status: AttendanceStatus::Pending,
            session_id: "s-1".to_string(),
            attendance_id: "att-1".to_string(),
        });

        store.put_session(&session).unwrap();
        let back = store.get_session("s-1").unwrap().unwrap();
        assert_eq!(back.students.len(), 1);
        assert_eq!(back.students[0].name, "Alice Tan");
    }

    #[test]
    fn test_open_file_based() {
        let temp_dir = std::env::temp_dir();
        let db_path = temp_dir.join(format!("labsync_test_{}.db", std::process::id()));

        let store = Store::open(&db_path).unwrap();
        store.put_session(&session_with_id("s-1")).unwrap();
        assert_eq!(store.session_count().unwrap(), 1);
        assert_eq!(store.path(), db_path);

        drop(store);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = std::env::temp_dir();
        let nested_path = temp_dir.join(format!(
            "labsync_test_{}/nested/db.sqlite",
            std::process::id()
        ));

        if let Some(parent) = nested_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }

        let store = Store::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(store);
        if let Some(parent) = nested_path.parent() {
            let _ = std::fs::remove_dir_all(parent.parent().unwrap());
        }
    }

    #[test]
    fn test_queue_survives_reopen() {
        let temp_dir = std::env::temp_dir();
        let db_path = temp_dir.join(format!("labsync_reopen_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&db_path);

        {
            let store = Store::open(&db_path).unwrap();
            store
                .enqueue_mutation(&PendingMutation::mark_attendance(
                    "att-1",
                    AttendanceStatus::Present,
                ))
                .unwrap();
        }

        let store = Store::open(&db_path).unwrap();
        let queued = store.pending_mutations().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].attendance_id, "att-1");

        drop(store);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }
}
