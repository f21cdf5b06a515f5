//! Background refresh scheduler.
//!
//! Drives the engine on the kiosk cadence: one refresh immediately at
//! startup, a second aligned to the next clock boundary (half-hour marks by
//! default) so the cache flips over with the timetable, then a steady
//! interval after that. Each cycle also drains the mutation queue when the
//! backend is reachable.
//!
//! The scheduler is a single tokio task with a watch-channel shutdown; the
//! handle joins the task so a clean exit never abandons a cycle midway.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::engine::{DrainOutcome, Engine};

/// Handle to a running scheduler task.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Scheduler task failed: {}", e);
        }
    }
}

/// Spawn the refresh scheduler for the given engine.
#[must_use]
pub fn spawn(engine: Arc<Engine>, config: &Config) -> SchedulerHandle {
    let (tx, rx) = watch::channel(false);
    let boundary_minutes = config.sync.boundary_minutes;
    let interval = config.refresh_interval();

    let task = tokio::spawn(run(engine, rx, boundary_minutes, interval));

    SchedulerHandle { shutdown: tx, task }
}

async fn run(
    engine: Arc<Engine>,
    mut shutdown: watch::Receiver<bool>,
    boundary_minutes: u32,
    interval: Duration,
) {
    info!("Scheduler started for {}", engine.identity());

    // First refresh right away so the kiosk has data at startup
    run_cycle(&engine).await;

    // Second refresh aligned to the next clock boundary, so the cache
    // turns over together with the timetable
    let now = Local::now().naive_local();
    let wait = until_next_boundary(now, boundary_minutes);
    debug!("Next refresh in {:?} (boundary alignment)", wait);
    if wait_or_shutdown(&mut shutdown, wait).await {
        info!("Scheduler stopped");
        return;
    }
    run_cycle(&engine).await;

    // Steady state
    loop {
        if wait_or_shutdown(&mut shutdown, interval).await {
            break;
        }
        run_cycle(&engine).await;
    }

    info!("Scheduler stopped");
}

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns `true` when the scheduler should stop.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        // A dropped sender also stops the task
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// One refresh-and-drain cycle.
async fn run_cycle(engine: &Engine) {
    let now = Local::now().naive_local();

    match engine.refresh(now).await {
        Ok(report) => {
            debug!(
                "Refresh: {} rooms fetched, {} failed, {} sessions cached{}",
                report.rooms_fetched,
                report.rooms_failed,
                report.sessions_cached,
                if report.offline { " (offline)" } else { "" }
            );

            if !report.offline {
                match engine.drain_queue().await {
                    Ok(DrainOutcome::Completed { submitted, .. }) if submitted > 0 => {
                        info!("Replayed {} queued marks", submitted);
                    }
                    Ok(_) => {}
                    Err(e) => error!("Queue drain failed: {}", e),
                }
            }
        }
        Err(e) => error!("Refresh failed: {}", e),
    }
}

/// Time until the next `boundary_minutes` clock mark strictly after `now`.
///
/// With 30-minute boundaries, 09:00:00 waits the full 30 minutes to 09:30
/// rather than refreshing again immediately.
#[must_use]
pub fn until_next_boundary(now: NaiveDateTime, boundary_minutes: u32) -> Duration {
    let boundary_secs = u64::from(boundary_minutes) * 60;
    let secs_into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
    let secs_into_boundary = secs_into_hour % boundary_secs;

    Duration::from_secs(boundary_secs - secs_into_boundary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TerminalIdentity;
    use crate::remote::HttpRemote;
    use crate::storage::Store;
    use chrono::{NaiveDate, NaiveTime};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(h, m, s).unwrap())
    }

    #[test]
    fn test_until_next_boundary_mid_interval() {
        // 09:12:00 with 30-minute boundaries waits 18 minutes to 09:30
        let wait = until_next_boundary(at(9, 12, 0), 30);
        assert_eq!(wait, Duration::from_secs(18 * 60));
    }

    #[test]
    fn test_until_next_boundary_on_the_mark() {
        // Exactly on a boundary waits a full interval, never zero
        let wait = until_next_boundary(at(9, 30, 0), 30);
        assert_eq!(wait, Duration::from_secs(30 * 60));

        let wait = until_next_boundary(at(9, 0, 0), 30);
        assert_eq!(wait, Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_until_next_boundary_counts_seconds() {
        // 09:29:30 waits exactly 30 seconds
        let wait = until_next_boundary(at(9, 29, 30), 30);
        assert_eq!(wait, Duration::from_secs(30));
    }

    #[test]
    fn test_until_next_boundary_other_granularity() {
        let wait = until_next_boundary(at(9, 47, 0), 15);
        assert_eq!(wait, Duration::from_secs(13 * 60));

        let wait = until_next_boundary(at(9, 59, 0), 60);
        assert_eq!(wait, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let config = Config::default();
        let engine = Arc::new(
            Engine::new(
                Store::open_in_memory().unwrap(),
                // Connection-refused endpoint; the startup refresh fails
                // fast and the scheduler parks on its first wait
                Arc::new(HttpRemote::new(
                    "http://localhost:9",
                    Duration::from_millis(100),
                )),
                TerminalIdentity::parse("swlab1rm1").unwrap(),
                config.clone(),
            )
            .unwrap(),
        );

        let handle = spawn(Arc::clone(&engine), &config);
        handle.shutdown().await;
    }
}
