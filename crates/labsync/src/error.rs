//! Error types for labsync.
//!
//! This module defines all error types used throughout the labsync crate.
//! The taxonomy matters to callers: network failures are recoverable
//! (queue the write, fall back to cache), storage failures are propagated,
//! and authorization failures are fatal to the current view.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for labsync operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Network Errors ===
    /// The terminal is offline; the call was not issued.
    #[error("offline: network unavailable")]
    Offline,

    /// A backend request exceeded its deadline and was aborted.
    #[error("request timed out: {operation}")]
    RequestTimeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// The backend responded with a non-success status.
    #[error("backend returned HTTP {status} for {operation}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// Description of the failed operation.
        operation: String,
    },

    /// The HTTP request itself failed (connect, DNS, body).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    // === Authorization Errors ===
    /// The terminal identity does not grant access to the requested lab/room.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Why the permission check failed.
        message: String,
    },

    /// The resolved identity string is not of the `<lab>rm<room>` shape.
    #[error("invalid terminal identity: {identity}")]
    InvalidIdentity {
        /// The offending identity string.
        identity: String,
    },

    // === Validation Errors ===
    /// A raw attendance row failed validation during ingest.
    #[error("invalid attendance record: {message}")]
    InvalidRecord {
        /// What was malformed.
        message: String,
    },

    /// A lab-session id could not be parsed into its delimited fields.
    #[error("invalid lab session id {id:?}: {message}")]
    InvalidSessionId {
        /// The offending session id.
        id: String,
        /// What was malformed.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for labsync operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create an invalid-record validation error.
    #[must_use]
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Create an invalid-session-id validation error.
    #[must_use]
    pub fn invalid_session_id(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSessionId {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Check if this error is in the network class (timeout, non-2xx,
    /// offline). Callers treat these as "offline-degraded", never fatal.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Offline | Self::RequestTimeout { .. } | Self::HttpStatus { .. } | Self::Http(_)
        )
    }

    /// Check if this error is in the storage class.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. } | Self::DatabaseQuery(_) | Self::DatabaseMigration { .. }
        )
    }

    /// Check if this error is an authorization failure.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::InvalidIdentity { .. })
    }
}
