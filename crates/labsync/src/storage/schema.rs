//! `SQLite` schema definitions for labsync.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the lab sessions cache table.
///
/// Sessions are stored as JSON payloads keyed by session id. The `position`
/// column records first-insertion order and survives upserts, so reads
/// always come back in a stable order.
pub const CREATE_LAB_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS lab_sessions (
    session_id TEXT PRIMARY KEY,
    position INTEGER NOT NULL,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create an index on position for ordered reads.
pub const CREATE_POSITION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_lab_sessions_position ON lab_sessions(position)
";

/// SQL statement to create the pending mutations queue table.
///
/// The AUTOINCREMENT id is the replay order; drains walk it ascending.
pub const CREATE_PENDING_MUTATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS pending_mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    attendance_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// SQL statement to create the marked students table (added in schema v2).
///
/// Keyed by student id; an upsert replaces the previous mark.
pub const CREATE_MARKED_STUDENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS marked_students (
    student_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    marked_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// Base schema creation statements in order (schema version 1).
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_LAB_SESSIONS_TABLE,
    CREATE_POSITION_INDEX,
    CREATE_PENDING_MUTATIONS_TABLE,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_lab_sessions_table_contains_required_columns() {
        assert!(CREATE_LAB_SESSIONS_TABLE.contains("session_id TEXT PRIMARY KEY"));
        assert!(CREATE_LAB_SESSIONS_TABLE.contains("position INTEGER NOT NULL"));
        assert!(CREATE_LAB_SESSIONS_TABLE.contains("payload TEXT NOT NULL"));
    }

    #[test]
    fn test_pending_mutations_table_has_autoincrement_id() {
        assert!(CREATE_PENDING_MUTATIONS_TABLE.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(CREATE_PENDING_MUTATIONS_TABLE.contains("attendance_id TEXT NOT NULL"));
        assert!(CREATE_PENDING_MUTATIONS_TABLE.contains("status TEXT NOT NULL"));
    }

    #[test]
    fn test_marked_students_table_structure() {
        assert!(CREATE_MARKED_STUDENTS_TABLE.contains("student_id TEXT PRIMARY KEY"));
        assert!(CREATE_MARKED_STUDENTS_TABLE.contains("payload TEXT NOT NULL"));
    }

    #[test]
    fn test_create_metadata_table_structure() {
        assert!(CREATE_METADATA_TABLE.contains("key TEXT PRIMARY KEY"));
        assert!(CREATE_METADATA_TABLE.contains("value TEXT NOT NULL"));
    }
}
