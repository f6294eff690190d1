//! Periodic tick driver.
//!
//! One tokio task runs the whole tick: due-dose scan, then the voice-grace
//! sweep, then the SMS-grace sweep, in that order. Phases run sequentially
//! inside a single task, so two ticks can never mutate the same records
//! concurrently; a slow tick delays the next instead of overlapping it.
//! All reminder state lives in the store; the loop itself only holds the
//! interval and its shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::EscalationEngine;
use crate::scanner::DueDoseScanner;

pub struct Scheduler {
    scanner: DueDoseScanner,
    engine: Arc<EscalationEngine>,
    tick_interval: Duration,
}

/// Handle to a running scheduler: signal shutdown and join the task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop after the in-flight tick, if any, completes.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::error!("Scheduler task did not shut down cleanly: {}", e);
        }
    }
}

impl Scheduler {
    pub fn new(
        scanner: DueDoseScanner,
        engine: Arc<EscalationEngine>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            scanner,
            engine,
            tick_interval,
        }
    }

    /// Spawn the tick loop. The first tick fires one full interval after
    /// startup.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            log::info!(
                "Scheduler started (tick every {}s)",
                self.tick_interval.as_secs()
            );
            let mut interval = tokio::time::interval(self.tick_interval);
            // A delayed tick shifts the cadence instead of bursting to
            // catch up, which would double-run sweeps back to back
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval's first tick completes immediately; consume it so
            // the loop waits a full period before the first pass
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick(Utc::now()).await;
                    }
                    _ = shutdown_rx.changed() => {
                        log::info!("Scheduler stopped");
                        break;
                    }
                }
            }
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    /// One full tick: scan, voice-grace sweep, SMS-grace sweep. Failures
    /// are logged per phase; the next tick always runs.
    pub async fn tick(&self, now: chrono::DateTime<Utc>) {
        let scan = self.scanner.scan(now).await;
        if scan.created > 0 {
            log::info!("Tick created {} reminder(s)", scan.created);
        }

        match self.engine.sweep_voice_grace(now).await {
            Ok(escalated) if escalated > 0 => {
                log::info!("Tick escalated {} reminder(s) to SMS", escalated);
            }
            Ok(_) => {}
            Err(e) => log::error!("Voice grace sweep failed: {}", e),
        }

        match self.engine.sweep_sms_grace(now).await {
            Ok(missed) if missed > 0 => {
                log::info!("Tick marked {} reminder(s) missed", missed);
            }
            Ok(_) => {}
            Err(e) => log::error!("SMS grace sweep failed: {}", e),
        }
    }
}
