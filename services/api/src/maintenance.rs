//! Scheduled housekeeping: closing idle sessions and purging old GPS points

use std::sync::Arc;

use anyhow::Result;
use engine::model::SessionId;
use engine::{EngineResult, TrackingStore, Tracker};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[derive(Debug, Default, PartialEq)]
pub struct MaintenanceReport {
    pub closed_sessions: Vec<SessionId>,
    pub purged_points: u64,
}

pub struct Maintenance<S> {
    tracker: Arc<Tracker<S>>,
    idle_timeout: chrono::Duration,
    gps_retention: chrono::Duration,
}

impl<S> Clone for Maintenance<S> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
            idle_timeout: self.idle_timeout,
            gps_retention: self.gps_retention,
        }
    }
}

impl<S: TrackingStore> Maintenance<S> {
    pub fn new(
        tracker: Arc<Tracker<S>>,
        idle_timeout: chrono::Duration,
        gps_retention: chrono::Duration,
    ) -> Self {
        Self {
            tracker,
            idle_timeout,
            gps_retention,
        }
    }

    /// One maintenance pass. Idle sessions are closed before the purge so
    /// their last points are still inside the retention window.
    pub async fn run_once(&self) -> EngineResult<MaintenanceReport> {
        let closed_sessions = self.tracker.close_idle(self.idle_timeout).await?;
        let purged_points = self.tracker.purge_gps(self.gps_retention).await?;
        Ok(MaintenanceReport {
            closed_sessions,
            purged_points,
        })
    }

    /// Register the pass on a cron schedule and start the scheduler
    pub async fn start(&self, schedule: &str) -> Result<JobScheduler> {
        let maintenance = self.clone();

        let scheduler = JobScheduler::new().await?;
        let job = Job::new_async(schedule, move |_, _| {
            let maintenance = maintenance.clone();
            Box::pin(async move {
                match maintenance.run_once().await {
                    Ok(report) => info!(
                        "Maintenance run finished: {} idle sessions closed, {} GPS points purged",
                        report.closed_sessions.len(),
                        report.purged_points
                    ),
                    Err(e) => error!("Maintenance run failed: {}", e),
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started maintenance scheduler with schedule: {}", schedule);
        Ok(scheduler)
    }
}
