//! `labsync` - Offline-resilient lab attendance sync
//!
//! This library keeps a kiosk terminal's view of lab sessions and student
//! attendance usable across network failures: a local `SQLite` cache serves
//! reads while the backend is unreachable, attendance marks are classified
//! by a fixed decision policy and queued when they cannot be delivered, and
//! a background scheduler refreshes the cache and replays the queue.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod policy;
pub mod remote;
pub mod scheduler;
pub mod storage;

pub use auth::TerminalIdentity;
pub use config::Config;
pub use engine::{DrainOutcome, Engine, MarkOutcome, RefreshReport};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use model::{AttendanceStatus, LabSession, PendingMutation, StudentAttendance};
pub use remote::{HttpRemote, RemoteApi};
pub use storage::{Store, StoreStats};
