//! Periodic refresh and status ticks.

use crate::controller::{RefreshOutcome, SyncController};
use crate::error::SyncError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Scheduler {
    controller: Arc<SyncController>,
    refresh_every: Duration,
    status_every: Duration,
}

impl Scheduler {
    pub fn new(
        controller: Arc<SyncController>,
        refresh_every: Duration,
        status_every: Duration,
    ) -> Self {
        Self {
            controller,
            refresh_every,
            status_every,
        }
    }

    /// Runs both timers until `shutdown` is cancelled. A refresh already in progress is
    /// allowed to finish.
    pub async fn run(self, shutdown: CancellationToken) {
        let refresh = tokio::spawn(refresh_loop(
            self.controller.clone(),
            self.refresh_every,
            shutdown.clone(),
        ));
        let status = tokio::spawn(status_loop(
            self.controller.clone(),
            self.status_every,
            shutdown,
        ));

        let (refresh, status) = tokio::join!(refresh, status);
        for (name, res) in [("refresh", refresh), ("status", status)] {
            if let Err(e) = res {
                error!(task = name, error = %e, "scheduler task failed");
            }
        }
        debug!("scheduler stopped");
    }
}

/// First tick one full period from now; late ticks are skipped rather than bunched.
fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn refresh_loop(controller: Arc<SyncController>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match controller.refresh().await {
            Ok(RefreshOutcome::Unchanged) => debug!("manifest is up to date"),
            Ok(RefreshOutcome::Resumed { job }) => info!(job = %job, "distribution resumed"),
            Ok(RefreshOutcome::Swapped { digest, job }) => {
                info!(job = %job, digest = %digest, "new manifest is being distributed")
            }
            Err(SyncError::Busy) => warn!("previous refresh still running, skipping tick"),
            Err(e) => error!(error = %e, "refresh failed"),
        }
    }
}

async fn status_loop(controller: Arc<SyncController>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match controller.report_status().await {
            Ok(line) => info!("{}", line),
            Err(e) if e.is_not_found() => warn!(error = %e, "active job not found, skipping status"),
            Err(SyncError::NoActiveJob) => warn!("no active job to report on"),
            Err(e) => error!(error = %e, "status report failed"),
        }
    }
}
