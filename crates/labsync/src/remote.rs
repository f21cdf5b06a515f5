//! Backend API client for labsync.
//!
//! The engine talks to the attendance backend through the [`RemoteApi`]
//! trait; [`HttpRemote`] is the production implementation. Tests substitute
//! in-memory fakes.
//!
//! The client keeps a process-wide online flag. Writes fast-fail with
//! [`Error::Offline`] while the flag is down so the caller can queue the
//! mutation immediately instead of burning the full request timeout; the
//! flag is updated from every request outcome and by the scheduler's
//! refresh cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{AttendanceStatus, RawAttendanceRow};

/// Abstraction over the attendance backend.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetch all attendance rows for a lab room from the given instant to
    /// the end of its day.
    ///
    /// The caller applies any backdate margin to `from`; this method sends
    /// it as-is.
    ///
    /// # Errors
    ///
    /// Returns a network-class error on timeout, connection failure, or a
    /// non-success HTTP status.
    async fn fetch_sessions(
        &self,
        lab_name: &str,
        room: u16,
        from: NaiveDateTime,
    ) -> Result<Vec<RawAttendanceRow>>;

    /// Submit one attendance mark.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Offline`] without issuing the request when the
    /// online flag is down, or a network-class error on failure.
    async fn submit_attendance(&self, attendance_id: &str, status: AttendanceStatus)
        -> Result<()>;

    /// Whether the backend was reachable at last contact.
    fn is_online(&self) -> bool;

    /// Record backend reachability (normally driven by request outcomes).
    fn set_online(&self, online: bool);
}

/// Request body for the sessions-to-end-of-day endpoint.
#[derive(Debug, Serialize)]
struct FetchSessionsRequest<'a> {
    #[serde(rename = "labName")]
    lab_name: &'a str,
    room: u16,
    #[serde(rename = "currentTime")]
    current_time: String,
    #[serde(rename = "currentDate")]
    current_date: String,
}

/// Request body for the mark endpoint.
#[derive(Debug, Serialize)]
struct MarkAttendanceRequest<'a> {
    #[serde(rename = "attendanceID")]
    attendance_id: &'a str,
    status: String,
}

/// HTTP client for the attendance backend.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
    online: Arc<AtomicBool>,
}

impl HttpRemote {
    /// Create a client for the given base URL and per-request timeout.
    ///
    /// Starts in the online state; the first failed request flips it.
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            auth_token: None,
            timeout,
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Attach a bearer token to every request.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn record_outcome<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.online.store(true, Ordering::SeqCst),
            Err(e) if e.is_network() => {
                if self.online.swap(false, Ordering::SeqCst) {
                    warn!("Backend unreachable, switching to offline mode");
                }
            }
            Err(_) => {}
        }
    }

    fn map_request_error(err: reqwest::Error, operation: &str) -> Error {
        if err.is_timeout() {
            Error::RequestTimeout {
                operation: operation.to_string(),
            }
        } else {
            Error::Http(err)
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn fetch_sessions(
        &self,
        lab_name: &str,
        room: u16,
        from: NaiveDateTime,
    ) -> Result<Vec<RawAttendanceRow>> {
        let operation = "fetch sessions";
        let url = format!("{}/attendance/sessions-to-end-of-day", self.base_url);
        let body = FetchSessionsRequest {
            lab_name,
            room,
            current_time: from.format("%H:%M:%S").to_string(),
            current_date: from.format("%Y-%m-%d").to_string(),
        };

        debug!("Fetching sessions for {} room {}", lab_name, room);
        let result = async {
            let response = self
                .apply_auth(self.client.post(&url))
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .map_err(|e| Self::map_request_error(e, operation))?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::HttpStatus {
                    status: status.as_u16(),
                    operation: operation.to_string(),
                });
            }

            let rows: Vec<RawAttendanceRow> = response
                .json()
                .await
                .map_err(|e| Self::map_request_error(e, operation))?;
            Ok(rows)
        }
        .await;

        self.record_outcome(&result);
        result
    }

    async fn submit_attendance(
        &self,
        attendance_id: &str,
        status: AttendanceStatus,
    ) -> Result<()> {
        let operation = "mark attendance";

        // Fast-fail so the caller queues immediately instead of waiting
        // out the request timeout.
        if !self.is_online() {
            return Err(Error::Offline);
        }

        let url = format!("{}/attendance/mark", self.base_url);
        let body = MarkAttendanceRequest {
            attendance_id,
            status: status.to_string(),
        };

        debug!("Submitting {} for attendance {}", status, attendance_id);
        let result = async {
            let response = self
                .apply_auth(self.client.put(&url))
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .map_err(|e| Self::map_request_error(e, operation))?;

            let http_status = response.status();
            if !http_status.is_success() {
                return Err(Error::HttpStatus {
                    status: http_status.as_u16(),
                    operation: operation.to_string(),
                });
            }
            Ok(())
        }
        .await;

        self.record_outcome(&result);
        result
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn remote() -> HttpRemote {
        HttpRemote::new("http://localhost:9", Duration::from_millis(200))
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let remote = HttpRemote::new("http://example.com/api/", Duration::from_secs(8));
        assert_eq!(remote.base_url, "http://example.com/api");
    }

    #[test]
    fn test_starts_online() {
        assert!(remote().is_online());
    }

    #[test]
    fn test_with_auth_token() {
        let remote = HttpRemote::new("http://example.com", Duration::from_secs(8))
            .with_auth_token("secret");
        assert_eq!(remote.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_set_online() {
        let remote = remote();
        remote.set_online(false);
        assert!(!remote.is_online());
        remote.set_online(true);
        assert!(remote.is_online());
    }

    #[tokio::test]
    async fn test_submit_fast_fails_when_offline() {
        let remote = remote();
        remote.set_online(false);

        let err = remote
            .submit_attendance("att-1", AttendanceStatus::Present)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Offline));
    }

    #[tokio::test]
    async fn test_fetch_failure_flips_online_flag() {
        // Port 9 (discard) refuses connections; the fetch must fail with a
        // network-class error and drop the flag.
        let remote = remote();
        let from = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap());

        let err = remote.fetch_sessions("SWLAB1", 1, from).await.unwrap_err();
        assert!(err.is_network());
        assert!(!remote.is_online());
    }

    #[test]
    fn test_fetch_request_body_shape() {
        let from = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        let body = FetchSessionsRequest {
            lab_name: "SWLAB1",
            room: 2,
            current_time: from.format("%H:%M:%S").to_string(),
            current_date: from.format("%Y-%m-%d").to_string(),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["labName"], "SWLAB1");
        assert_eq!(json["room"], 2);
        assert_eq!(json["currentTime"], "08:30:00");
        assert_eq!(json["currentDate"], "2024-05-01");
    }

    #[test]
    fn test_mark_request_body_shape() {
        let body = MarkAttendanceRequest {
            attendance_id: "att-1",
            status: AttendanceStatus::Late.to_string(),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["attendanceID"], "att-1");
        assert_eq!(json["status"], "Late");
    }
}
