//! Timer trigger
//!
//! Runs a pass every `schedule_interval_secs` until shutdown is broadcast.

use crate::api::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};
use watchdog_lib::health::components;

pub struct PassScheduler {
    state: Arc<AppState>,
    interval: Duration,
    run_on_startup: bool,
}

impl PassScheduler {
    pub fn new(state: Arc<AppState>, interval: Duration) -> Self {
        Self {
            state,
            interval,
            run_on_startup: false,
        }
    }

    pub fn run_on_startup(mut self, run_on_startup: bool) -> Self {
        self.run_on_startup = run_on_startup;
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            run_on_startup = self.run_on_startup,
            "Starting pass scheduler"
        );

        let first_tick = if self.run_on_startup {
            Instant::now()
        } else {
            Instant::now() + self.interval
        };
        let mut ticker = interval_at(first_tick, self.interval);
        // A pass longer than the interval delays the next one instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.state
            .health_registry
            .set_healthy(components::SCHEDULER)
            .await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    info!("Pass scheduler shutting down");
                    break;
                }
            }
        }

        self.state
            .health_registry
            .set_degraded(components::SCHEDULER, "scheduler stopped")
            .await;
    }

    async fn tick(&self) {
        info!("Scheduled pass starting");
        match self.state.run_pass().await {
            Ok(report) => {
                for line in report.render().lines() {
                    info!(line = %line, "Pass report");
                }
                info!(
                    downscaled = report.downscaled.len(),
                    deadline_exceeded = report.deadline_exceeded,
                    "Scheduled pass finished"
                );
            }
            Err(err) => error!(error = %err, "Scheduled pass failed"),
        }
    }
}
